//! rollcall-core — attendance by face-encoding reconciliation.
//!
//! Matches unknown face encodings from a submitted photo against
//! per-student reference encodings, classifies each detection as a
//! confirmed match, an ambiguous candidate, or unknown, and folds
//! user-confirmed corrections back into the reference store. Detection and
//! embedding extraction are delegated to an external encoder tool; this
//! crate only consumes its (encoding, region) output.

pub mod encoder;
pub mod matcher;
pub mod reconcile;
pub mod report;
pub mod roster;
pub mod store;
pub mod types;

pub use encoder::{CommandEncoder, FaceEncoder};
pub use matcher::{MatchCutoffs, MatchOutcome, Matcher, NearestMatcher};
pub use reconcile::{PendingCandidate, Reconciler, RejectionLog, Triage};
pub use report::Attendance;
pub use roster::{Roster, Student};
pub use store::EncodingStore;
pub use types::{Detection, Encoding, FaceRegion};
