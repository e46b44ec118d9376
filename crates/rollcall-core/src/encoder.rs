//! Seam to the external face-encoding tool.
//!
//! Detection, landmarking, and embedding extraction all happen outside this
//! repository. The contract here is "image in, (encoding, region) pairs
//! out"; the production implementation shells out to a configured command
//! and parses its JSON output.

use crate::types::Detection;
use std::path::Path;
use std::process::{Command, ExitStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("bad encoder output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Produces face detections for an image.
pub trait FaceEncoder {
    fn encode_image(&self, image: &Path) -> Result<Vec<Detection>, EncoderError>;
}

/// Runs an external encoder command and parses its JSON stdout.
///
/// The command is invoked as `<program> <args...> <image>` and must print a
/// JSON array of `{"encoding": [...], "region": {...}?}` objects, one per
/// detected face. An image with no faces is an empty array, not an error.
#[derive(Debug, Clone)]
pub struct CommandEncoder {
    program: String,
    args: Vec<String>,
}

impl CommandEncoder {
    /// Build from a command line: first word is the program, the rest are
    /// fixed arguments placed before the image path.
    pub fn new(command_line: &str) -> Self {
        let mut parts = command_line.split_whitespace().map(String::from);
        let program = parts.next().unwrap_or_default();
        Self {
            program,
            args: parts.collect(),
        }
    }
}

impl FaceEncoder for CommandEncoder {
    fn encode_image(&self, image: &Path) -> Result<Vec<Detection>, EncoderError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .output()
            .map_err(|source| EncoderError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(EncoderError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let detections: Vec<Detection> = serde_json::from_slice(&output.stdout)?;
        tracing::debug!(
            image = %image.display(),
            faces = detections.len(),
            "encoder output parsed"
        );
        Ok(detections)
    }
}
