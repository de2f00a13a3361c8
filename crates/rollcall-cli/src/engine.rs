use chrono::{Local, NaiveDateTime};
use rollcall_core::enroll::{self, EnrollError};
use rollcall_core::{
    AnalyzerError, AttendanceSheet, ClassName, FaceAnalyzer, FrameMatcher,
    Gallery, GalleryError, RecorderError, Session,
};
use rollcall_hw::{CameraError, Frame, FrameSource};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::location::Location;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to access the camera: {0}")]
    Camera(#[from] CameraError),
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
    #[error("{0}")]
    Recorder(#[from] RecorderError),
    #[error("{0}")]
    Enroll(#[from] EnrollError),
    #[error("No face encodings found. Please add at least one student.")]
    EmptyGallery,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread panicked")]
    Panicked,
}

/// A student newly written to the sheet.
#[derive(Debug, Clone)]
pub struct AttendanceEvent {
    pub name: String,
    pub timestamp: NaiveDateTime,
    pub location: String,
    pub distance: f32,
    /// Rows written by this session so far, including this one.
    pub total_marked: usize,
}

/// Why the frame loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Stopped,
    SourceFailed(String),
}

#[derive(Debug)]
pub struct SessionSummary {
    pub class: ClassName,
    pub total_marked: usize,
    pub frames: u64,
    pub reason: StopReason,
}

pub type Preview = Option<Arc<Frame>>;

/// Everything the worker needs besides its frame source and analyzer.
pub struct SessionSetup {
    pub session: Session,
    pub sheet: AttendanceSheet,
    pub matcher: FrameMatcher,
    pub location: Location,
}

/// Control handle for a running attendance worker.
pub struct EngineHandle {
    running: Arc<AtomicBool>,
    gallery: watch::Sender<Arc<Gallery>>,
    preview: watch::Receiver<Preview>,
    thread: JoinHandle<Result<SessionSummary, EngineError>>,
}

impl EngineHandle {
    /// Ask the worker to stop after the frame it is processing.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Swap in a freshly built gallery. The worker uses it from its next
    /// frame on.
    pub fn replace_gallery(&self, gallery: Gallery) {
        tracing::info!(enrolled = gallery.len(), "gallery replaced");
        self.gallery.send_replace(Arc::new(gallery));
    }

    /// Latest processed frame, for a display. Never blocks the worker.
    pub fn preview(&self) -> watch::Receiver<Preview> {
        self.preview.clone()
    }

    /// Wait for the worker to exit.
    pub fn join(self) -> Result<SessionSummary, EngineError> {
        self.thread.join().map_err(|_| EngineError::Panicked)?
    }
}

/// Start the frame loop on a dedicated thread.
///
/// Refuses an empty gallery before anything is spawned. Attendance events
/// arrive on the returned receiver; it closes when the worker exits.
pub fn spawn_engine<S, A>(
    source: S,
    analyzer: A,
    gallery: Gallery,
    setup: SessionSetup,
) -> Result<(EngineHandle, mpsc::UnboundedReceiver<AttendanceEvent>), EngineError>
where
    S: FrameSource + Send + 'static,
    A: FaceAnalyzer + Send + 'static,
{
    if gallery.is_empty() {
        return Err(EngineError::EmptyGallery);
    }

    let running = setup.session.running_flag();
    let (gallery_tx, gallery_rx) = watch::channel(Arc::new(gallery));
    let (preview_tx, preview_rx) = watch::channel::<Preview>(None);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let thread = std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let result = run_frames(source, analyzer, gallery_rx, setup, event_tx, preview_tx);
            match &result {
                Ok(summary) => tracing::info!(
                    marked = summary.total_marked,
                    frames = summary.frames,
                    reason = ?summary.reason,
                    "engine thread exiting"
                ),
                Err(e) => tracing::error!(error = %e, "engine thread failed"),
            }
            result
        })
        .map_err(EngineError::Spawn)?;

    Ok((
        EngineHandle {
            running,
            gallery: gallery_tx,
            preview: preview_rx,
            thread,
        },
        event_rx,
    ))
}

/// Read, match, dedup, record, publish; one frame at a time until the
/// running flag clears or the source fails.
fn run_frames<S: FrameSource, A: FaceAnalyzer>(
    mut source: S,
    mut analyzer: A,
    mut gallery_rx: watch::Receiver<Arc<Gallery>>,
    setup: SessionSetup,
    events: mpsc::UnboundedSender<AttendanceEvent>,
    preview: watch::Sender<Preview>,
) -> Result<SessionSummary, EngineError> {
    let SessionSetup {
        mut session,
        sheet,
        matcher,
        location,
    } = setup;
    let mut frames = 0u64;

    let reason = loop {
        if !session.is_running() {
            break StopReason::Stopped;
        }

        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "frame read failed; ending session");
                break StopReason::SourceFailed(e.to_string());
            }
        };
        frames += 1;

        let gallery = Arc::clone(&gallery_rx.borrow_and_update());
        let matches = matcher.match_frame(&mut analyzer, &frame.data, frame.width, frame.height, &gallery)?;

        for m in matches {
            if !session.should_mark(&m.name) {
                continue;
            }
            let now = Local::now().naive_local();
            if sheet.record(&m.name, now, location.as_str())? {
                let total_marked = session.record_marked();
                tracing::info!(
                    name = %m.name,
                    distance = m.distance,
                    location = %location,
                    total_marked,
                    "marked present"
                );
                // The front end may already be gone; the sheet is the record.
                let _ = events.send(AttendanceEvent {
                    name: m.name,
                    timestamp: now,
                    location: location.to_string(),
                    distance: m.distance,
                    total_marked,
                });
            }
        }

        preview.send_replace(Some(Arc::new(frame)));
    };

    Ok(SessionSummary {
        class: session.class().clone(),
        total_marked: session.total_marked(),
        frames,
        reason,
    })
}

/// "Add student": grab one frame, save the single face in it, rebuild the
/// gallery from disk.
pub fn run_enrollment<S: FrameSource, A: FaceAnalyzer>(
    source: &mut S,
    analyzer: &mut A,
    name: &str,
    gallery_dir: &Path,
    warmup_frames: usize,
) -> Result<(PathBuf, Gallery), EngineError> {
    let name = enroll::validate_student_name(name)?;

    source.discard(warmup_frames);
    let frame = source.next_frame()?;
    tracing::debug!(seq = frame.sequence, brightness = frame.avg_brightness(), "enrollment frame");

    let path = enroll::enroll_from_frame(analyzer, &frame.data, frame.width, frame.height, &name, gallery_dir)?;
    let gallery = Gallery::build(gallery_dir, analyzer)?;
    Ok((path, gallery))
}
