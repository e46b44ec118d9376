use rollcall_core::MatchCutoffs;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// External encoder command line (program plus fixed arguments).
    pub encoder_cmd: String,
    /// Distances strictly below this confirm a match.
    pub match_threshold: f32,
    /// Width of the ambiguous band that prompts for confirmation.
    pub confirm_margin: f32,
    /// A candidate this close to a prior rejection is not re-prompted.
    pub reject_threshold: f32,
    /// Path of the JSON encoding cache.
    pub cache_path: PathBuf,
    /// Path of the JSON rejection log.
    pub rejections_path: PathBuf,
    /// Worker threads for reference-encoding precompute.
    pub encode_workers: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            encoder_cmd: std::env::var("ROLLCALL_ENCODER_CMD")
                .unwrap_or_else(|_| "face-encode".to_string()),
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", 0.5),
            confirm_margin: env_f32("ROLLCALL_CONFIRM_MARGIN", 0.1),
            reject_threshold: env_f32("ROLLCALL_REJECT_THRESHOLD", 0.08),
            cache_path: std::env::var("ROLLCALL_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("student_encodings.json")),
            rejections_path: std::env::var("ROLLCALL_REJECTIONS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("rejected_encodings.json")),
            encode_workers: env_usize("ROLLCALL_ENCODE_WORKERS", 4),
        }
    }

    pub fn cutoffs(&self) -> MatchCutoffs {
        MatchCutoffs {
            match_threshold: self.match_threshold,
            confirm_margin: self.confirm_margin,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
