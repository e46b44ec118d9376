//! Candidate reconciliation and the rejection log.
//!
//! Ambiguous detections are resolved by a human: "is this really Alice?".
//! An accepted candidate's vector joins the student's reference encodings;
//! a rejected one is remembered so visually similar vectors stop prompting.

use crate::matcher::MatchOutcome;
use crate::store::{EncodingStore, StoreError};
use crate::types::{Detection, Encoding, FaceRegion};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// Previously rejected vectors, per student. Persisted beside the encoding
/// cache so suppression survives the session the rejection happened in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RejectionLog {
    rejected: HashMap<String, Vec<Encoding>>,
}

impl RejectionLog {
    /// Read the log from disk. An absent or unreadable file starts an empty
    /// log; a bad log only costs repeat prompts, never the run.
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(log) => log,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "rejection log unreadable; starting empty");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        fs::write(path, serde_json::to_vec(&self.rejected)?)?;
        Ok(())
    }

    pub fn record(&mut self, reg_no: &str, encoding: Encoding) {
        self.rejected
            .entry(reg_no.to_string())
            .or_default()
            .push(encoding);
    }

    /// True when `encoding` lies within `threshold` of a vector previously
    /// rejected for this student.
    pub fn suppresses(&self, reg_no: &str, encoding: &Encoding, threshold: f32) -> bool {
        self.rejected
            .get(reg_no)
            .is_some_and(|vectors| vectors.iter().any(|v| encoding.distance(v) < threshold))
    }

    pub fn total_rejections(&self) -> usize {
        self.rejected.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// A candidate awaiting a human decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCandidate {
    pub reg_no: String,
    pub distance: f32,
    pub region: Option<FaceRegion>,
    pub encoding: Encoding,
}

/// What one submission boils down to before any prompting.
#[derive(Debug, Clone, Default)]
pub struct Triage {
    /// Students matched strictly below the match threshold.
    pub confirmed: BTreeSet<String>,
    /// Ambiguous detections that survived rejection suppression.
    pub pending: Vec<PendingCandidate>,
    /// Detections nobody came close to.
    pub unknown: usize,
    /// Candidates dropped because of a prior rejection.
    pub suppressed: usize,
}

/// Applies human decisions to the store and the rejection log.
pub struct Reconciler {
    rejections: RejectionLog,
    reject_threshold: f32,
}

impl Reconciler {
    pub fn new(rejections: RejectionLog, reject_threshold: f32) -> Self {
        Self {
            rejections,
            reject_threshold,
        }
    }

    /// Sort one submission's classified detections into confirmed students
    /// and candidates worth prompting for.
    ///
    /// Candidates near a previously rejected vector are suppressed, and a
    /// candidate for a student already confirmed in the same submission is
    /// dropped — a second sighting adds nothing.
    pub fn triage(&self, results: &[(Detection, MatchOutcome)]) -> Triage {
        let mut triage = Triage::default();

        for (_, outcome) in results {
            if let MatchOutcome::Confirmed { reg_no, distance } = outcome {
                tracing::debug!(%reg_no, distance = *distance, "detection confirmed");
                triage.confirmed.insert(reg_no.clone());
            }
        }

        for (detection, outcome) in results {
            match outcome {
                MatchOutcome::Confirmed { .. } => {}
                MatchOutcome::Candidate {
                    reg_no,
                    distance,
                    region,
                } => {
                    if triage.confirmed.contains(reg_no) {
                        continue;
                    }
                    if self
                        .rejections
                        .suppresses(reg_no, &detection.encoding, self.reject_threshold)
                    {
                        tracing::debug!(
                            %reg_no,
                            distance = *distance,
                            "candidate near a prior rejection; not prompting"
                        );
                        triage.suppressed += 1;
                        continue;
                    }
                    triage.pending.push(PendingCandidate {
                        reg_no: reg_no.clone(),
                        distance: *distance,
                        region: *region,
                        encoding: detection.encoding.clone(),
                    });
                }
                MatchOutcome::Unknown { best_distance } => {
                    match best_distance {
                        Some(d) => tracing::info!(best_distance = *d, "unknown face"),
                        None => tracing::info!("unknown face; no reference encodings to compare"),
                    }
                    triage.unknown += 1;
                }
            }
        }

        triage
    }

    /// Accepted: the vector joins the student's reference encodings.
    pub fn accept(
        &self,
        store: &mut EncodingStore,
        candidate: &PendingCandidate,
    ) -> Result<(), StoreError> {
        tracing::info!(
            reg_no = %candidate.reg_no,
            distance = candidate.distance,
            "candidate accepted; reference encodings updated"
        );
        store.append(&candidate.reg_no, candidate.encoding.clone())
    }

    /// Rejected: remembered so a similar vector does not prompt again.
    pub fn reject(&mut self, candidate: &PendingCandidate) {
        tracing::info!(
            reg_no = %candidate.reg_no,
            distance = candidate.distance,
            "candidate rejected"
        );
        self.rejections
            .record(&candidate.reg_no, candidate.encoding.clone());
    }

    pub fn rejections(&self) -> &RejectionLog {
        &self.rejections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::{Roster, Student};

    fn enc(values: &[f32]) -> Encoding {
        Encoding::new(values.to_vec())
    }

    fn det(values: &[f32]) -> Detection {
        Detection {
            encoding: enc(values),
            region: None,
        }
    }

    fn candidate_for(reg_no: &str, values: &[f32], distance: f32) -> (Detection, MatchOutcome) {
        (
            det(values),
            MatchOutcome::Candidate {
                reg_no: reg_no.to_string(),
                distance,
                region: None,
            },
        )
    }

    #[test]
    fn test_triage_partitions_outcomes() {
        let reconciler = Reconciler::new(RejectionLog::default(), 0.08);
        let results = vec![
            (
                det(&[0.0, 0.0]),
                MatchOutcome::Confirmed {
                    reg_no: "R1".into(),
                    distance: 0.2,
                },
            ),
            candidate_for("R2", &[1.0, 0.0], 0.55),
            (
                det(&[9.0, 9.0]),
                MatchOutcome::Unknown {
                    best_distance: Some(2.0),
                },
            ),
        ];
        let triage = reconciler.triage(&results);
        assert!(triage.confirmed.contains("R1"));
        assert_eq!(triage.pending.len(), 1);
        assert_eq!(triage.pending[0].reg_no, "R2");
        assert_eq!(triage.unknown, 1);
        assert_eq!(triage.suppressed, 0);
    }

    #[test]
    fn test_candidate_for_confirmed_student_is_dropped() {
        let reconciler = Reconciler::new(RejectionLog::default(), 0.08);
        let results = vec![
            (
                det(&[0.0, 0.0]),
                MatchOutcome::Confirmed {
                    reg_no: "R1".into(),
                    distance: 0.1,
                },
            ),
            candidate_for("R1", &[0.6, 0.0], 0.55),
        ];
        let triage = reconciler.triage(&results);
        assert!(triage.pending.is_empty());
        assert_eq!(triage.suppressed, 0);
    }

    #[test]
    fn test_rejected_vector_suppresses_similar_candidate() {
        let mut log = RejectionLog::default();
        log.record("R1", enc(&[1.0, 0.0]));
        let reconciler = Reconciler::new(log, 0.08);

        // Within 0.08 of the rejected vector: suppressed.
        let near = reconciler.triage(&[candidate_for("R1", &[1.05, 0.0], 0.55)]);
        assert!(near.pending.is_empty());
        assert_eq!(near.suppressed, 1);

        // Same vector, different student: prompts as usual.
        let other = reconciler.triage(&[candidate_for("R2", &[1.05, 0.0], 0.55)]);
        assert_eq!(other.pending.len(), 1);

        // Farther than the threshold: prompts.
        let far = reconciler.triage(&[candidate_for("R1", &[1.2, 0.0], 0.55)]);
        assert_eq!(far.pending.len(), 1);
    }

    #[test]
    fn test_reject_then_retriage_suppresses() {
        let mut reconciler = Reconciler::new(RejectionLog::default(), 0.08);
        let results = vec![candidate_for("R1", &[1.0, 0.0], 0.55)];

        let first = reconciler.triage(&results);
        assert_eq!(first.pending.len(), 1);
        reconciler.reject(&first.pending[0]);

        let second = reconciler.triage(&results);
        assert!(second.pending.is_empty());
        assert_eq!(second.suppressed, 1);
    }

    #[test]
    fn test_accept_appends_to_store() {
        let roster = Roster::new(vec![Student {
            reg_no: "R1".into(),
            name: "Alice".into(),
            image_paths: Vec::new(),
        }]);
        let mut store = EncodingStore::empty(&roster);
        let reconciler = Reconciler::new(RejectionLog::default(), 0.08);

        let candidate = PendingCandidate {
            reg_no: "R1".into(),
            distance: 0.55,
            region: None,
            encoding: enc(&[0.5, 0.5]),
        };
        reconciler.accept(&mut store, &candidate).unwrap();
        assert_eq!(store.encodings("R1").unwrap(), &[enc(&[0.5, 0.5])][..]);
    }

    #[test]
    fn test_rejection_log_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rejections.json");

        let mut log = RejectionLog::default();
        log.record("R1", enc(&[1.0, 2.0]));
        log.record("R1", enc(&[3.0, 4.0]));
        log.save(&path).unwrap();

        let loaded = RejectionLog::load(&path);
        assert_eq!(loaded.total_rejections(), 2);
        assert!(loaded.suppresses("R1", &enc(&[1.0, 2.0]), 0.01));
    }

    #[test]
    fn test_rejection_log_absent_or_malformed_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let absent = RejectionLog::load(&dir.path().join("missing.json"));
        assert!(absent.is_empty());

        let path = dir.path().join("broken.json");
        fs::write(&path, "{{{").unwrap();
        let broken = RejectionLog::load(&path);
        assert!(broken.is_empty());
    }
}
