//! Rebalancing optimizer.
//!
//! `market_rebalancing.py`'s `_calculate_bregman_allocation` computes a
//! one-shot heuristic (deviation * liquidity / price, normalized) and
//! explicitly documents it as "a heuristic approximation of full Bregman
//! projection... full implementation would use Frank-Wolfe (50-150
//! iterations)". This module builds that fuller iterative version: a linear
//! objective maximized via Frank-Wolfe with backtracking line search, plus a
//! separate Bregman/KL-projection routine for reshaping an existing position
//! toward a target distribution.

use crate::decimal::{from_f64, to_f64};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct OutcomeInput {
    pub market_id: String,
    /// Price paid per contract for this outcome's side of the rebalance.
    pub price: Decimal,
    /// Executable depth available at that price.
    pub depth_qty: Decimal,
    /// Per-contract fee for this outcome's leg.
    pub fees: Decimal,
}

#[derive(Debug, Clone)]
pub struct RebalanceInput {
    pub outcomes: Vec<OutcomeInput>,
    pub available_capital: Decimal,
    pub max_capital_per_trade: Decimal,
    pub max_position_fraction: Decimal,
    /// How far per-outcome quantities may deviate from strict equality.
    /// 0 means every leg gets the same quantity.
    pub size_tolerance_contracts: Decimal,
}

#[derive(Debug, Clone)]
pub struct RebalanceAllocation {
    pub quantities: Vec<Decimal>,
    pub iterations_used: u32,
    pub converged: bool,
}

const LINE_SEARCH_STEPS: [f64; 4] = [0.1, 0.2, 0.5, 1.0];
const MAX_ITERATIONS: u32 = 50;
const CONVERGENCE_TOL: f64 = 1e-6;

/// Allocate contract quantities across `input.outcomes` maximizing the
/// linear payoff objective `sum_i (payoff - price_i - fees_i) * x_i` (payoff
/// is 1, since a winning categorical outcome settles at $1/contract) subject
/// to: total notional <= capital cap, per-outcome notional <= position cap,
/// per-outcome quantity <= executable depth, and (when tolerance is 0) equal
/// quantities across all outcomes so settlement pays exactly one unit
/// regardless of which outcome resolves.
pub fn allocate(input: &RebalanceInput) -> RebalanceAllocation {
    let n = input.outcomes.len();
    if n == 0 {
        return RebalanceAllocation {
            quantities: Vec::new(),
            iterations_used: 0,
            converged: true,
        };
    }

    let prices: Vec<f64> = input.outcomes.iter().map(|o| to_f64(o.price)).collect();
    let fees: Vec<f64> = input.outcomes.iter().map(|o| to_f64(o.fees)).collect();
    let depths: Vec<f64> = input.outcomes.iter().map(|o| to_f64(o.depth_qty)).collect();
    let capital_cap = to_f64(input.available_capital * input.max_capital_per_trade);
    let position_cap_notional = to_f64(input.available_capital * input.max_position_fraction);

    // Per-outcome cap: depth-limited and position-fraction-limited.
    let per_outcome_cap: Vec<f64> = prices
        .iter()
        .zip(depths.iter())
        .map(|(p, d)| {
            let pos_cap_qty = if *p > 0.0 { position_cap_notional / p } else { 0.0 };
            d.min(pos_cap_qty).max(0.0)
        })
        .collect();

    let equal_quantities = input.size_tolerance_contracts == Decimal::ZERO;

    // Uniform cap respecting both per-outcome caps and total capital, used
    // when quantities must be equal across outcomes.
    let uniform_cap = per_outcome_cap.iter().cloned().fold(f64::INFINITY, f64::min);
    let price_sum: f64 = prices.iter().sum();
    let capital_limited_uniform = if price_sum > 0.0 {
        capital_cap / price_sum
    } else {
        0.0
    };
    let uniform_x = uniform_cap.min(capital_limited_uniform).max(0.0);

    if equal_quantities {
        let quantities = prices.iter().map(|_| from_f64(uniform_x).trunc()).collect();
        return RebalanceAllocation {
            quantities,
            iterations_used: 1,
            converged: true,
        };
    }

    // Frank-Wolfe over the non-uniform feasible region: x_i in
    // [uniform_x - tol, uniform_x + tol] intersected with per-outcome and
    // capital constraints. Gradient of the linear objective is constant
    // (1 - price_i), so each iteration's linear subproblem picks the vertex
    // that puts as much weight as the gradient favors on the
    // highest-(1-price) outcomes within the tolerance band.
    let tol = to_f64(input.size_tolerance_contracts);
    let lower: Vec<f64> = per_outcome_cap
        .iter()
        .map(|_| (uniform_x - tol).max(0.0))
        .collect();
    let upper: Vec<f64> = per_outcome_cap
        .iter()
        .map(|cap| (uniform_x + tol).min(*cap))
        .collect();

    let mut x: Vec<f64> = lower.clone();
    let mut iterations_used = 0u32;
    let mut converged = false;

    for iter in 0..MAX_ITERATIONS {
        iterations_used = iter + 1;
        let gradient: Vec<f64> = prices
            .iter()
            .zip(fees.iter())
            .map(|(p, f)| 1.0 - p - f)
            .collect();

        // Linear subproblem: push each coordinate to its upper bound if the
        // gradient favors it, else leave at lower bound, then rescale to
        // respect the aggregate capital cap.
        let mut vertex: Vec<f64> = gradient
            .iter()
            .zip(lower.iter().zip(upper.iter()))
            .map(|(g, (lo, hi))| if *g > 0.0 { *hi } else { *lo })
            .collect();
        let vertex_cost: f64 = vertex.iter().zip(prices.iter()).map(|(q, p)| q * p).sum();
        if vertex_cost > capital_cap && vertex_cost > 0.0 {
            let scale = capital_cap / vertex_cost;
            for v in vertex.iter_mut() {
                *v *= scale;
            }
        }

        let mut best_gamma = 0.0;
        let mut best_objective = objective(&x, &gradient);
        for gamma in LINE_SEARCH_STEPS {
            let candidate: Vec<f64> = x
                .iter()
                .zip(vertex.iter())
                .map(|(xi, si)| xi + gamma * (si - xi))
                .collect();
            let candidate_cost: f64 = candidate.iter().zip(prices.iter()).map(|(q, p)| q * p).sum();
            if candidate_cost > capital_cap + 1e-9 {
                continue;
            }
            let value = objective(&candidate, &gradient);
            if value > best_objective {
                best_objective = value;
                best_gamma = gamma;
            }
        }

        let next: Vec<f64> = x
            .iter()
            .zip(vertex.iter())
            .map(|(xi, si)| xi + best_gamma * (si - xi))
            .collect();

        let delta: f64 = next
            .iter()
            .zip(x.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt();
        x = next;
        if delta < CONVERGENCE_TOL {
            converged = true;
            break;
        }
    }

    RebalanceAllocation {
        quantities: x.into_iter().map(|v| from_f64(v).trunc()).collect(),
        iterations_used,
        converged,
    }
}

fn objective(x: &[f64], gradient: &[f64]) -> f64 {
    x.iter().zip(gradient.iter()).map(|(xi, gi)| xi * gi).sum()
}

/// Reshape an existing position toward `target_weights` (both assumed to
/// sum to 1 already, or are normalized here) using multiplicative-update
/// Bregman/KL projection. Used to decide how to rebalance inventory, not to
/// size a new arbitrage opportunity.
pub fn bregman_reshape(current_weights: &[f64], target_weights: &[f64]) -> Vec<f64> {
    assert_eq!(current_weights.len(), target_weights.len());
    let n = current_weights.len();
    if n == 0 {
        return Vec::new();
    }

    let mut weights = normalize(current_weights);
    let target = normalize(target_weights);

    for _ in 0..MAX_ITERATIONS {
        let mut next = vec![0.0; n];
        let mut changed = 0.0;
        for i in 0..n {
            let w = weights[i];
            let t = target[i].max(1e-12);
            let c = w.max(1e-12);
            next[i] = w * (t / c).powf(0.5);
            changed += (next[i] - w).abs();
        }
        weights = normalize(&next);
        if changed < CONVERGENCE_TOL {
            break;
        }
    }
    weights
}

fn normalize(weights: &[f64]) -> Vec<f64> {
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        let n = weights.len().max(1);
        return vec![1.0 / n as f64; weights.len()];
    }
    weights.iter().map(|w| w / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn outcome(id: &str, price: Decimal, depth: Decimal) -> OutcomeInput {
        OutcomeInput {
            market_id: id.to_string(),
            price,
            depth_qty: depth,
            fees: Decimal::ZERO,
        }
    }

    #[test]
    fn equal_sizing_respects_tightest_depth() {
        let input = RebalanceInput {
            outcomes: vec![
                outcome("a", dec!(0.20), dec!(1000)),
                outcome("b", dec!(0.25), dec!(500)),
                outcome("c", dec!(0.30), dec!(2000)),
            ],
            available_capital: dec!(10000),
            max_capital_per_trade: dec!(0.10),
            max_position_fraction: dec!(0.25),
            size_tolerance_contracts: dec!(0),
        };
        let allocation = allocate(&input);
        assert_eq!(allocation.quantities.len(), 3);
        assert!(allocation.quantities.iter().all(|q| *q == allocation.quantities[0]));
    }

    #[test]
    fn zero_capital_yields_zero_allocation() {
        let input = RebalanceInput {
            outcomes: vec![outcome("a", dec!(0.5), dec!(100))],
            available_capital: dec!(0),
            max_capital_per_trade: dec!(0.10),
            max_position_fraction: dec!(0.25),
            size_tolerance_contracts: dec!(0),
        };
        let allocation = allocate(&input);
        assert_eq!(allocation.quantities[0], Decimal::ZERO);
    }

    #[test]
    fn tolerance_allows_uneven_allocation_within_band() {
        let input = RebalanceInput {
            outcomes: vec![
                outcome("a", dec!(0.10), dec!(1000)),
                outcome("b", dec!(0.80), dec!(1000)),
            ],
            available_capital: dec!(10000),
            max_capital_per_trade: dec!(0.10),
            max_position_fraction: dec!(0.5),
            size_tolerance_contracts: dec!(50),
        };
        let allocation = allocate(&input);
        assert!(allocation.converged || allocation.iterations_used == 50);
        // Cheaper outcome should get at least as much as the pricier one.
        assert!(allocation.quantities[0] >= allocation.quantities[1]);
    }

    #[test]
    fn bregman_reshape_converges_toward_target() {
        let current = [0.8, 0.2];
        let target = [0.2, 0.8];
        let result = bregman_reshape(&current, &target);
        assert!((result[0] + result[1] - 1.0).abs() < 1e-6);
        assert!(result[1] > result[0]);
    }
}
