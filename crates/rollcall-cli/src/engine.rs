use crate::config::Config;
use chrono::NaiveDate;
use rollcall_core::{
    Attendance, CommandEncoder, EncodingStore, FaceEncoder, MatchCutoffs, Matcher, NearestMatcher,
    PendingCandidate, Reconciler, RejectionLog, Roster,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("roster error: {0}")]
    Roster(#[from] rollcall_core::roster::RosterError),
    #[error("store error: {0}")]
    Store(#[from] rollcall_core::store::StoreError),
    #[error("encoder error: {0}")]
    Encoder(#[from] rollcall_core::encoder::EncoderError),
    #[error("report error: {0}")]
    Report(#[from] rollcall_core::report::ReportError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// A candidate plus the student name for the prompt.
pub struct PendingPrompt {
    pub candidate: PendingCandidate,
    pub name: String,
}

/// Outcome of submitting one classroom photo.
pub struct SubmissionReport {
    pub detections: usize,
    /// Students confirmed outright, in roster order, as (reg no, name).
    pub confirmed: Vec<(String, String)>,
    pub pending: Vec<PendingPrompt>,
    pub unknown: usize,
    pub suppressed: usize,
}

/// Final attendance plus where it was written.
pub struct FinishReport {
    pub attendance: Attendance,
    pub present_path: PathBuf,
    pub absent_path: PathBuf,
}

/// Messages sent from the CLI to the engine thread.
enum EngineRequest {
    Submit {
        image: PathBuf,
        reply: oneshot::Sender<Result<SubmissionReport, EngineError>>,
    },
    Resolve {
        candidate: PendingCandidate,
        accept: bool,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    Finish {
        out_dir: PathBuf,
        date: NaiveDate,
        reply: oneshot::Sender<Result<FinishReport, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Submit a photo: encode it, match every detection, and triage the
    /// results into confirmed students and pending prompts.
    pub async fn submit(&self, image: PathBuf) -> Result<SubmissionReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Submit {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Apply a human decision for one candidate. Returns whether the
    /// student is newly marked present.
    pub async fn resolve(
        &self,
        candidate: PendingCandidate,
        accept: bool,
    ) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Resolve {
                candidate,
                accept,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Partition the roster and write the attendance files.
    pub async fn finish(
        &self,
        out_dir: PathBuf,
        date: NaiveDate,
    ) -> Result<FinishReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Finish {
                out_dir,
                date,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Per-session engine state, owned by the engine thread.
struct Session {
    roster: Roster,
    encoder: CommandEncoder,
    store: EncodingStore,
    reconciler: Reconciler,
    cutoffs: MatchCutoffs,
    present: BTreeSet<String>,
    cache_path: PathBuf,
    rejections_path: PathBuf,
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads the roster and the encoding store synchronously (rebuilding an
/// absent, stale, or malformed cache), fail-fast, then enters the request
/// loop. The thread exits when the last handle is dropped.
pub fn spawn_engine(cfg: &Config, roster_path: &Path) -> Result<EngineHandle, EngineError> {
    let roster = Roster::load(roster_path)?;
    let encoder = CommandEncoder::new(&cfg.encoder_cmd);
    let store = EncodingStore::load_or_rebuild(
        &roster,
        roster_path,
        &cfg.cache_path,
        &encoder,
        cfg.encode_workers,
    )?;
    tracing::info!(
        students = roster.len(),
        encodings = store.total_encodings(),
        "encoding store ready"
    );

    let reconciler = Reconciler::new(
        RejectionLog::load(&cfg.rejections_path),
        cfg.reject_threshold,
    );

    let mut session = Session {
        roster,
        encoder,
        store,
        reconciler,
        cutoffs: cfg.cutoffs(),
        present: BTreeSet::new(),
        cache_path: cfg.cache_path.clone(),
        rejections_path: cfg.rejections_path.clone(),
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Submit { image, reply } => {
                        let _ = reply.send(session.run_submit(&image));
                    }
                    EngineRequest::Resolve {
                        candidate,
                        accept,
                        reply,
                    } => {
                        let _ = reply.send(session.run_resolve(&candidate, accept));
                    }
                    EngineRequest::Finish {
                        out_dir,
                        date,
                        reply,
                    } => {
                        let _ = reply.send(session.run_finish(&out_dir, date));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

impl Session {
    fn run_submit(&mut self, image: &Path) -> Result<SubmissionReport, EngineError> {
        let detections = self.encoder.encode_image(image)?;
        if detections.is_empty() {
            tracing::warn!(image = %image.display(), "no faces detected in submission");
            return Ok(SubmissionReport {
                detections: 0,
                confirmed: Vec::new(),
                pending: Vec::new(),
                unknown: 0,
                suppressed: 0,
            });
        }

        let detection_count = detections.len();
        let matcher = NearestMatcher;
        let results: Vec<_> = detections
            .into_iter()
            .map(|d| {
                let outcome = matcher.classify(&d, &self.store, self.cutoffs);
                (d, outcome)
            })
            .collect();

        let triage = self.reconciler.triage(&results);
        let newly_confirmed: Vec<(String, String)> = self
            .roster
            .students()
            .iter()
            .filter(|s| triage.confirmed.contains(&s.reg_no) && !self.present.contains(&s.reg_no))
            .map(|s| (s.reg_no.clone(), s.name.clone()))
            .collect();
        self.present.extend(triage.confirmed);

        // Candidates for students already marked present add nothing.
        let pending: Vec<PendingPrompt> = triage
            .pending
            .into_iter()
            .filter(|c| !self.present.contains(&c.reg_no))
            .map(|candidate| {
                let name = self
                    .roster
                    .name_of(&candidate.reg_no)
                    .unwrap_or("?")
                    .to_string();
                PendingPrompt { candidate, name }
            })
            .collect();

        tracing::info!(
            detections = detection_count,
            confirmed = newly_confirmed.len(),
            pending = pending.len(),
            unknown = triage.unknown,
            suppressed = triage.suppressed,
            "submission matched"
        );

        Ok(SubmissionReport {
            detections: detection_count,
            confirmed: newly_confirmed,
            pending,
            unknown: triage.unknown,
            suppressed: triage.suppressed,
        })
    }

    fn run_resolve(
        &mut self,
        candidate: &PendingCandidate,
        accept: bool,
    ) -> Result<bool, EngineError> {
        if accept {
            if self.present.contains(&candidate.reg_no) {
                return Ok(false);
            }
            self.reconciler.accept(&mut self.store, candidate)?;
            self.store.save(&self.cache_path)?;
            self.present.insert(candidate.reg_no.clone());
            Ok(true)
        } else {
            self.reconciler.reject(candidate);
            self.reconciler.rejections().save(&self.rejections_path)?;
            Ok(false)
        }
    }

    fn run_finish(&mut self, out_dir: &Path, date: NaiveDate) -> Result<FinishReport, EngineError> {
        let attendance = Attendance::partition(&self.roster, &self.present);
        let (present_path, absent_path) = attendance.write_csv(out_dir, date)?;
        Ok(FinishReport {
            attendance,
            present_path,
            absent_path,
        })
    }
}
