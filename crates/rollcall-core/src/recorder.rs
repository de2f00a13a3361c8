//! Per-class attendance sheet stored as CSV.
//!
//! Columns are exactly `Name,Timestamp,Location,Status`. A name appears at
//! most once per file, whatever the day, across restarts.

use crate::session::ClassName;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const STATUS_PRESENT: &str = "Present";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("No attendance file found: {0}")]
    Missing(PathBuf),
    #[error("attendance file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("attendance file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One row of the sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Status")]
    pub status: String,
}

/// Handle on `attendance_<class>.csv`.
#[derive(Debug, Clone)]
pub struct AttendanceSheet {
    path: PathBuf,
}

impl AttendanceSheet {
    pub fn for_class(dir: &Path, class: &ClassName) -> Self {
        Self {
            path: dir.join(format!("attendance_{}.csv", class.as_str())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// All rows; an absent file reads as an empty sheet.
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, RecorderError> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path).map_err(|e| self.csv_err(e))?;
        reader
            .deserialize()
            .collect::<Result<Vec<AttendanceRecord>, _>>()
            .map_err(|e| self.csv_err(e))
    }

    /// Mark `name` present unless the sheet already lists it.
    ///
    /// Returns `true` when a row was written. The whole sheet is rewritten
    /// through a temporary file and renamed into place.
    pub fn record(&self, name: &str, timestamp: NaiveDateTime, location: &str) -> Result<bool, RecorderError> {
        let mut rows = self.records()?;
        if rows.iter().any(|r| r.name == name) {
            tracing::debug!(name, path = %self.path.display(), "already on sheet");
            return Ok(false);
        }

        rows.push(AttendanceRecord {
            name: name.to_string(),
            timestamp: timestamp.format(TIMESTAMP_FORMAT).to_string(),
            location: location.to_string(),
            status: STATUS_PRESENT.to_string(),
        });
        self.write_all(&rows)?;

        tracing::info!(name, path = %self.path.display(), rows = rows.len(), "attendance row written");
        Ok(true)
    }

    /// Copy the sheet byte-for-byte to `dest`.
    pub fn export(&self, dest: &Path) -> Result<u64, RecorderError> {
        if !self.exists() {
            return Err(RecorderError::Missing(self.path.clone()));
        }
        let bytes = std::fs::copy(&self.path, dest).map_err(|source| RecorderError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        tracing::info!(from = %self.path.display(), to = %dest.display(), bytes, "sheet exported");
        Ok(bytes)
    }

    fn write_all(&self, rows: &[AttendanceRecord]) -> Result<(), RecorderError> {
        let io_err = |source| RecorderError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp = self.path.with_extension("csv.tmp");
        let mut writer = csv::Writer::from_path(&tmp).map_err(|e| self.csv_err(e))?;
        for row in rows {
            writer.serialize(row).map_err(|e| self.csv_err(e))?;
        }
        writer.flush().map_err(io_err)?;
        drop(writer);

        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }

    fn csv_err(&self, source: csv::Error) -> RecorderError {
        RecorderError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}
