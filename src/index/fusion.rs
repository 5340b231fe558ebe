//! Hybrid rank fusion.
//!
//! The text and vector lanes each produce a ranked list; fusion merges
//! them with weighted reciprocal-rank fusion. A rule-based classifier
//! biases the vector weight per query shape.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Rough query shape, used only to pick a default alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    Temporal,
    Factual,
    Semantic,
    Exploratory,
}

/// Fusion weights. `alpha` is the vector-lane weight in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    pub k0: u32,
    pub alpha_default: f64,
    pub alpha_temporal: f64,
    pub alpha_factual: f64,
    pub alpha_semantic: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k0: 60,
            alpha_default: 0.5,
            alpha_temporal: 0.2,
            alpha_factual: 0.3,
            alpha_semantic: 0.7,
        }
    }
}

impl FusionConfig {
    pub fn alpha_for(&self, class: QueryClass) -> f64 {
        match class {
            QueryClass::Temporal => self.alpha_temporal,
            QueryClass::Factual => self.alpha_factual,
            QueryClass::Semantic => self.alpha_semantic,
            QueryClass::Exploratory => self.alpha_default,
        }
    }
}

/// Rule-based query classifier. Patterns are compiled once and reused
/// across queries.
#[derive(Debug)]
pub struct QueryClassifier {
    temporal: Regex,
    factual: Regex,
    semantic: Regex,
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClassifier {
    pub fn new() -> Self {
        Self {
            temporal: Regex::new(
                r"(?i)\b(yesterday|today|tomorrow|last|ago|recent(ly)?|when|since|before|after|during|date|year|month|week|(19|20)\d{2})\b",
            )
            .expect("temporal pattern"),
            factual: Regex::new(r#"(?i)(^\s*(who|what|where|which|whose)\b|"[^"]+")"#)
                .expect("factual pattern"),
            semantic: Regex::new(
                r"(?i)\b(how|why|similar|like|related|about|explain|meaning|concept)\b",
            )
            .expect("semantic pattern"),
        }
    }

    /// Order matters: temporal cues win over factual, factual over
    /// semantic, anything else is exploratory.
    pub fn classify(&self, query: &str) -> QueryClass {
        if self.temporal.is_match(query) {
            QueryClass::Temporal
        } else if self.factual.is_match(query) {
            QueryClass::Factual
        } else if self.semantic.is_match(query) {
            QueryClass::Semantic
        } else {
            QueryClass::Exploratory
        }
    }
}

/// Weighted reciprocal-rank fusion:
/// `score(d) = alpha / (k0 + rank_vec(d)) + (1 - alpha) / (k0 + rank_text(d))`.
///
/// Ranks are 1-based positions in each lane; a document absent from a
/// lane contributes nothing for it. Output is sorted by descending
/// fused score, ties broken by ascending frame_id.
pub fn fuse(
    text_lane: &[(u64, f64)],
    vector_lane: &[(u64, f32)],
    alpha: f64,
    k0: u32,
) -> Vec<(u64, f64)> {
    let mut fused: std::collections::BTreeMap<u64, f64> = std::collections::BTreeMap::new();
    let k0 = f64::from(k0);

    for (rank, &(frame_id, _)) in text_lane.iter().enumerate() {
        let contribution = (1.0 - alpha) / (k0 + (rank as f64 + 1.0));
        *fused.entry(frame_id).or_insert(0.0) += contribution;
    }
    for (rank, &(frame_id, _)) in vector_lane.iter().enumerate() {
        let contribution = alpha / (k0 + (rank as f64 + 1.0));
        *fused.entry(frame_id).or_insert(0.0) += contribution;
    }

    let mut ranked: Vec<(u64, f64)> = fused.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked
}
