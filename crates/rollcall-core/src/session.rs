//! Attendance session state: the active class, the running flag and the
//! names already marked since the session started.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClassNameError {
    #[error("Please enter class name.")]
    Empty,
    #[error("class name {0:?} cannot contain path separators")]
    InvalidCharacters(String),
}

/// A validated class name. It ends up in a file name, so it must be
/// non-empty and must not escape the attendance directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassName(String);

impl ClassName {
    pub fn parse(raw: &str) -> Result<Self, ClassNameError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(ClassNameError::Empty);
        }
        if name.contains(['/', '\\', '\0']) || name == "." || name == ".." {
            return Err(ClassNameError::InvalidCharacters(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One "start attendance" run. Never persisted.
#[derive(Debug)]
pub struct Session {
    class: ClassName,
    marked: HashSet<String>,
    running: Arc<AtomicBool>,
    total_marked: usize,
}

impl Session {
    /// Begin a fresh session with nobody marked yet.
    pub fn start(class: ClassName) -> Self {
        tracing::info!(class = %class, "session started");
        Self {
            class,
            marked: HashSet::new(),
            running: Arc::new(AtomicBool::new(true)),
            total_marked: 0,
        }
    }

    pub fn class(&self) -> &ClassName {
        &self.class
    }

    /// True the first time `name` is seen this session, false afterwards.
    pub fn should_mark(&mut self, name: &str) -> bool {
        self.marked.insert(name.to_string())
    }

    /// Count a row actually written to the sheet.
    pub fn record_marked(&mut self) -> usize {
        self.total_marked += 1;
        self.total_marked
    }

    pub fn total_marked(&self) -> usize {
        self.total_marked
    }

    /// Shared flag; clearing it stops the frame loop after the current frame.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
