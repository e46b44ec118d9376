//! Roster loading.
//!
//! The roster is a CSV file with a `Reg No,Name,File Paths` header row.
//! `File Paths` carries one or more comma-separated reference image paths
//! for the student (quoted when there is more than one).

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("roster not readable: {0}")]
    Csv(#[from] csv::Error),
    #[error("roster has no usable rows: {0}")]
    Empty(PathBuf),
}

/// One roster entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub reg_no: String,
    pub name: String,
    /// Reference image paths, consumed during precompute.
    pub image_paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(rename = "Reg No")]
    reg_no: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "File Paths", default)]
    file_paths: String,
}

/// The full student roster, in file order.
#[derive(Debug, Clone)]
pub struct Roster {
    students: Vec<Student>,
}

impl Roster {
    pub fn new(students: Vec<Student>) -> Self {
        Self { students }
    }

    /// Load a roster CSV.
    ///
    /// Rows with a missing reg no or name are logged and skipped, as are
    /// rows repeating an earlier reg no (first row wins). An empty result
    /// is an error — there is nobody to take attendance for.
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut students: Vec<Student> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for row in reader.deserialize::<RosterRow>() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed roster row");
                    continue;
                }
            };
            let reg_no = row.reg_no.trim().to_string();
            let name = row.name.trim().to_string();
            if reg_no.is_empty() || name.is_empty() {
                tracing::warn!("skipping roster row with empty reg no or name");
                continue;
            }
            if !seen.insert(reg_no.clone()) {
                tracing::warn!(%reg_no, "duplicate reg no in roster; keeping first row");
                continue;
            }
            let image_paths = row
                .file_paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
            students.push(Student {
                reg_no,
                name,
                image_paths,
            });
        }

        if students.is_empty() {
            return Err(RosterError::Empty(path.to_path_buf()));
        }
        tracing::info!(path = %path.display(), students = students.len(), "roster loaded");
        Ok(Self { students })
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn name_of(&self, reg_no: &str) -> Option<&str> {
        self.students
            .iter()
            .find(|s| s.reg_no == reg_no)
            .map(|s| s.name.as_str())
    }
}
