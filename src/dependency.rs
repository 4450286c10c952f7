//! Dependency detector.
//!
//! Stage 1 is ported near-verbatim from `dependency_detector.py`: the same
//! stopword list, identity-marker set, focus-token extraction, and
//! candidate-narrowing loop, so its constants are ground truth rather than
//! guessed from the distilled spec prose. Stage 2 is an optional async
//! verifier port the core never blocks on.

use async_trait::async_trait;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Equivalent,
    MutuallyExclusive,
    Implies,
    Independent,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentSource {
    Deterministic,
    Verifier,
}

#[derive(Debug, Clone)]
pub struct DependencyAssessment {
    pub market_a: String,
    pub market_b: String,
    pub relation: Relation,
    pub confidence: f64,
    pub source: AssessmentSource,
    pub reason: String,
}

/// Minimal view of a market the detector needs; the engine's full `Market`
/// type (in `opportunity.rs`) satisfies this via field access at the call
/// site rather than a trait, keeping this module self-contained.
#[derive(Debug, Clone)]
pub struct MarketRef {
    pub id: String,
    pub platform: String,
    pub title: String,
    pub resolved: bool,
    pub close_time_ms: i64,
}

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "of", "in", "on", "for", "to", "and", "or", "is", "be", "will", "by", "at",
    "as", "with", "than", "that", "this",
];

const IDENTITY_MARKERS: &[&str] = &[
    "win", "wins", "elected", "president", "nominee", "nomination", "primary",
];

const FOCUS_TERMINATORS: &[&str] = &["win", "wins", "be", "become", "get", "receive"];

fn normalize(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn words(title: &str) -> Vec<String> {
    normalize(title)
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

fn extract_year(title: &str) -> Option<i32> {
    let toks = words(title);
    for tok in toks {
        if tok.len() == 4 && tok.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(y) = tok.parse::<i32>() {
                if (2020..2050).contains(&y) {
                    return Some(y);
                }
            }
        }
    }
    None
}

/// Tokens between a leading "will" and the first focus-terminating verb,
/// capped at 3 tokens — the probable subject entity of the market question.
fn focus_tokens(title: &str) -> Vec<String> {
    let toks = words(title);
    let start = if toks.first().map(|t| t.as_str()) == Some("will") {
        1
    } else {
        0
    };
    let mut out = Vec::new();
    for tok in &toks[start..] {
        if FOCUS_TERMINATORS.contains(&tok.as_str()) {
            break;
        }
        if STOPWORDS.contains(&tok.as_str()) || tok.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        out.push(tok.clone());
        if out.len() >= 3 {
            break;
        }
    }
    out
}

/// Content tokens used for candidate narrowing: digits and identity markers
/// are kept regardless of length, everything else needs >= 4 characters.
fn event_signature_tokens(title: &str) -> HashSet<String> {
    words(title)
        .into_iter()
        .filter(|tok| {
            tok.chars().all(|c| c.is_ascii_digit())
                || IDENTITY_MARKERS.contains(&tok.as_str())
                || tok.len() >= 4
        })
        .collect()
}

const MAX_CLOSE_TIME_DELTA_MS: i64 = 45 * 24 * 60 * 60 * 1000;

/// Pairs qualify for assessment when they share a venue, are both
/// unresolved, close within 45 days of each other, agree on any year token,
/// and share >= 2 signature tokens.
pub fn generate_candidates<'a>(markets: &'a [MarketRef]) -> Vec<(&'a MarketRef, &'a MarketRef)> {
    let mut out = Vec::new();
    for i in 0..markets.len() {
        for j in (i + 1)..markets.len() {
            let a = &markets[i];
            let b = &markets[j];
            if a.resolved || b.resolved {
                continue;
            }
            if a.platform != b.platform {
                continue;
            }
            if (a.close_time_ms - b.close_time_ms).abs() > MAX_CLOSE_TIME_DELTA_MS {
                continue;
            }
            let year_a = extract_year(&a.title);
            let year_b = extract_year(&b.title);
            if year_a.is_some() && year_b.is_some() && year_a != year_b {
                continue;
            }
            let sig_a = event_signature_tokens(&a.title);
            let sig_b = event_signature_tokens(&b.title);
            let overlap = sig_a.intersection(&sig_b).count();
            if overlap >= 2 {
                out.push((a, b));
            }
        }
    }
    out
}

/// Tie-break order exactly as in `arbitrage_v1_plumbing.py`'s
/// `assess_pair`: identical title first, then focus+overlap combinations,
/// falling through to UNKNOWN.
pub fn assess_pair(a: &MarketRef, b: &MarketRef) -> DependencyAssessment {
    let norm_a = normalize(&a.title);
    let norm_b = normalize(&b.title);
    if norm_a == norm_b {
        return DependencyAssessment {
            market_a: a.id.clone(),
            market_b: b.id.clone(),
            relation: Relation::Equivalent,
            confidence: 0.99,
            source: AssessmentSource::Deterministic,
            reason: "identical normalized title".to_string(),
        };
    }

    let focus_a = focus_tokens(&a.title);
    let focus_b = focus_tokens(&b.title);
    let sig_a = event_signature_tokens(&a.title);
    let sig_b = event_signature_tokens(&b.title);
    let overlap = sig_a.intersection(&sig_b).count();
    let same_focus = !focus_a.is_empty() && focus_a == focus_b;

    if same_focus && overlap >= 3 {
        return DependencyAssessment {
            market_a: a.id.clone(),
            market_b: b.id.clone(),
            relation: Relation::Equivalent,
            confidence: 0.80,
            source: AssessmentSource::Deterministic,
            reason: "same focus entity, high signature overlap".to_string(),
        };
    }

    if !same_focus && overlap >= 3 {
        return DependencyAssessment {
            market_a: a.id.clone(),
            market_b: b.id.clone(),
            relation: Relation::MutuallyExclusive,
            confidence: 0.72,
            source: AssessmentSource::Deterministic,
            reason: "different focus entities, high signature overlap".to_string(),
        };
    }

    if same_focus {
        let a_has = sig_a.iter().any(|t| matches!(t.as_str(), "nominee" | "nomination" | "primary"));
        let b_has = sig_b.iter().any(|t| matches!(t.as_str(), "win" | "wins" | "elected" | "president"));
        let a_has_win = sig_a.iter().any(|t| matches!(t.as_str(), "win" | "wins" | "elected" | "president"));
        let b_has_nom = sig_b.iter().any(|t| matches!(t.as_str(), "nominee" | "nomination" | "primary"));
        if (a_has && b_has) || (a_has_win && b_has_nom) {
            return DependencyAssessment {
                market_a: a.id.clone(),
                market_b: b.id.clone(),
                relation: Relation::Implies,
                confidence: 0.66,
                source: AssessmentSource::Deterministic,
                reason: "nomination-vs-win split on same focus entity".to_string(),
            };
        }
    }

    DependencyAssessment {
        market_a: a.id.clone(),
        market_b: b.id.clone(),
        relation: Relation::Unknown,
        confidence: 0.35,
        source: AssessmentSource::Deterministic,
        reason: "no deterministic rule matched".to_string(),
    }
}

/// Run stage 1 over a market universe, keeping only assessments whose
/// relation is actionable (not UNKNOWN/INDEPENDENT) above `confidence_floor`.
pub fn detect(markets: &[MarketRef], confidence_floor: f64) -> Vec<DependencyAssessment> {
    generate_candidates(markets)
        .into_iter()
        .map(|(a, b)| assess_pair(a, b))
        .filter(|assessment| {
            !matches!(assessment.relation, Relation::Unknown | Relation::Independent)
                && assessment.confidence >= confidence_floor
        })
        .collect()
}

/// Stage 2 capability interface — the only dynamic-dispatch boundary in this
/// module.
#[async_trait]
pub trait DependencyVerifier: Send + Sync {
    async fn verify(&self, assessment: &DependencyAssessment) -> Option<DependencyAssessment>;
}
