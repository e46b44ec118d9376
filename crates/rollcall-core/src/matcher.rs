//! Nearest-match classification of detections against the encoding store.

use crate::store::EncodingStore;
use crate::types::{Detection, FaceRegion};

/// The two cutoffs that split best-match distances into confirmed,
/// candidate, and unknown.
#[derive(Debug, Clone, Copy)]
pub struct MatchCutoffs {
    /// Distances strictly below this confirm a match outright.
    pub match_threshold: f32,
    /// Width of the ambiguous band above the match threshold; distances in
    /// `[match_threshold, match_threshold + confirm_margin)` become
    /// candidates for human confirmation.
    pub confirm_margin: f32,
}

impl MatchCutoffs {
    pub fn candidate_ceiling(&self) -> f32 {
        self.match_threshold + self.confirm_margin
    }
}

impl Default for MatchCutoffs {
    fn default() -> Self {
        Self {
            match_threshold: 0.5,
            confirm_margin: 0.1,
        }
    }
}

/// Classification of one detection against the student set.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Best distance fell strictly below the match threshold.
    Confirmed { reg_no: String, distance: f32 },
    /// Best distance fell inside the ambiguous band; needs a human decision.
    Candidate {
        reg_no: String,
        distance: f32,
        region: Option<FaceRegion>,
    },
    /// Nobody came close enough to name. Carries the best distance seen, or
    /// `None` when no student had any reference encodings.
    Unknown { best_distance: Option<f32> },
}

/// Strategy for classifying a probe detection against the store.
pub trait Matcher {
    fn classify(
        &self,
        probe: &Detection,
        store: &EncodingStore,
        cutoffs: MatchCutoffs,
    ) -> MatchOutcome;
}

/// Nearest-neighbor matcher over the union of per-student encoding
/// clusters.
///
/// Scans students in roster order with a strict less-than update, so an
/// exact distance tie resolves to the earliest roster entry. Students with
/// no reference encodings are skipped and can never be the best match.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn classify(
        &self,
        probe: &Detection,
        store: &EncodingStore,
        cutoffs: MatchCutoffs,
    ) -> MatchOutcome {
        let mut best: Option<(&str, f32)> = None;

        for (reg_no, encodings) in store.iter() {
            if encodings.is_empty() {
                continue;
            }
            let student_best = encodings
                .iter()
                .map(|e| probe.encoding.distance(e))
                .fold(f32::INFINITY, f32::min);
            match best {
                Some((_, current)) if student_best >= current => {}
                _ => best = Some((reg_no, student_best)),
            }
        }

        match best {
            Some((reg_no, distance)) if distance < cutoffs.match_threshold => {
                MatchOutcome::Confirmed {
                    reg_no: reg_no.to_string(),
                    distance,
                }
            }
            Some((reg_no, distance)) if distance < cutoffs.candidate_ceiling() => {
                MatchOutcome::Candidate {
                    reg_no: reg_no.to_string(),
                    distance,
                    region: probe.region,
                }
            }
            Some((_, distance)) => MatchOutcome::Unknown {
                best_distance: Some(distance),
            },
            None => MatchOutcome::Unknown {
                best_distance: None,
            },
        }
    }
}
