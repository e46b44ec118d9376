//! Present/absent partition and attendance CSV output.

use crate::roster::{Roster, Student};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("attendance write: {0}")]
    Csv(#[from] csv::Error),
    #[error("attendance write: {0}")]
    Io(#[from] std::io::Error),
}

/// Roster partition for one submission, both halves in roster order.
#[derive(Debug, Clone, PartialEq)]
pub struct Attendance {
    pub present: Vec<Student>,
    pub absent: Vec<Student>,
}

impl Attendance {
    /// Split the roster by the final confirmed-or-accepted set. An empty
    /// set (zero detections) marks everyone absent.
    pub fn partition(roster: &Roster, present_ids: &BTreeSet<String>) -> Self {
        let (present, absent): (Vec<_>, Vec<_>) = roster
            .students()
            .iter()
            .cloned()
            .partition(|s| present_ids.contains(&s.reg_no));
        Self { present, absent }
    }

    /// Write `Presentees <date>.csv` and `Absentees <date>.csv` under
    /// `dir`, returning the two paths.
    pub fn write_csv(&self, dir: &Path, date: NaiveDate) -> Result<(PathBuf, PathBuf), ReportError> {
        let present_path = dir.join(format!("Presentees {date}.csv"));
        let absent_path = dir.join(format!("Absentees {date}.csv"));
        write_list(&present_path, &self.present)?;
        write_list(&absent_path, &self.absent)?;
        tracing::info!(
            present = self.present.len(),
            absent = self.absent.len(),
            dir = %dir.display(),
            "attendance written"
        );
        Ok((present_path, absent_path))
    }
}

fn write_list(path: &Path, students: &[Student]) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Reg No", "Name"])?;
    for student in students {
        writer.write_record([&student.reg_no, &student.name])?;
    }
    writer.flush()?;
    Ok(())
}
