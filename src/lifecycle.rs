//! Lifecycle state machine.
//!
//! Transition table ported verbatim from `arb_v1_state_machine.py`. Pure
//! guard: it tells the caller whether a transition is allowed and never
//! mutates state itself — state ownership belongs to whatever drives
//! execution (`executor.rs`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArbState {
    Discovered,
    PricedExecutable,
    RiskApproved,
    RiskRejected,
    ExecutionSubmitted,
    Filled,
    PartialFill,
    Failed,
    HedgedOrFlattened,
    Closed,
}

impl ArbState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArbState::Discovered => "DISCOVERED",
            ArbState::PricedExecutable => "PRICED_EXECUTABLE",
            ArbState::RiskApproved => "RISK_APPROVED",
            ArbState::RiskRejected => "RISK_REJECTED",
            ArbState::ExecutionSubmitted => "EXECUTION_SUBMITTED",
            ArbState::Filled => "FILLED",
            ArbState::PartialFill => "PARTIAL_FILL",
            ArbState::Failed => "FAILED",
            ArbState::HedgedOrFlattened => "HEDGED_OR_FLATTENED",
            ArbState::Closed => "CLOSED",
        }
    }

    fn allowed_targets(&self) -> &'static [ArbState] {
        use ArbState::*;
        match self {
            Discovered => &[PricedExecutable],
            PricedExecutable => &[RiskApproved, RiskRejected],
            RiskApproved => &[ExecutionSubmitted],
            RiskRejected => &[Closed],
            ExecutionSubmitted => &[Filled, PartialFill, Failed],
            Filled => &[Closed],
            PartialFill => &[HedgedOrFlattened],
            HedgedOrFlattened => &[Closed],
            Failed => &[Closed],
            Closed => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResult {
    pub from: ArbState,
    pub to: ArbState,
    pub valid: bool,
    pub reason: String,
}

/// One trade's transition history, recorded alongside (not by) the guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub current: ArbState,
    pub history: Vec<(ArbState, ArbState, String, i64)>,
}

impl LifecycleRecord {
    pub fn new() -> Self {
        Self {
            current: ArbState::Discovered,
            history: Vec::new(),
        }
    }

    /// A record that has already cleared DISCOVERED -> PRICED_EXECUTABLE ->
    /// RISK_APPROVED, for trades handed to the executor after an upstream
    /// risk-gate ALLOW. The executor only ever drives RISK_APPROVED onward,
    /// so the guard table rejects a premature jump to EXECUTION_SUBMITTED
    /// from a fresh DISCOVERED record unless the earlier hops are recorded
    /// first.
    pub fn risk_approved(now_ms: i64) -> Self {
        let mut record = Self::new();
        record.transition(ArbState::PricedExecutable, now_ms);
        record.transition(ArbState::RiskApproved, now_ms);
        record
    }

    /// Attempt to move to `to`. Mutates `current` only when the transition
    /// is valid; always appends to `history` so invalid attempts are
    /// auditable without being silently dropped.
    pub fn transition(&mut self, to: ArbState, now_ms: i64) -> TransitionResult {
        let result = ArbLifecycle::transition(self.current, to);
        self.history.push((result.from, result.to, result.reason.clone(), now_ms));
        if result.valid {
            self.current = to;
        }
        result
    }
}

impl Default for LifecycleRecord {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ArbLifecycle;

impl ArbLifecycle {
    pub fn transition(from: ArbState, to: ArbState) -> TransitionResult {
        if from.allowed_targets().contains(&to) {
            TransitionResult {
                from,
                to,
                valid: true,
                reason: String::new(),
            }
        } else {
            TransitionResult {
                from,
                to,
                valid: false,
                reason: format!("invalid transition {}->{}", from.as_str(), to.as_str()),
            }
        }
    }
}
