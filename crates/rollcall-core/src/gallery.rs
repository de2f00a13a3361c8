//! Gallery builder: one reference image per enrolled person.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::types::{Embedding, Enrollment};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot read gallery directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
}

/// Why a file in the gallery directory did not produce an enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Not an image the decoder understands.
    Undecodable(String),
    /// Decoded, but no face was found in it.
    NoFace,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Undecodable(e) => write!(f, "not a readable image ({e})"),
            SkipReason::NoFace => f.write_str("no face detected"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Skipped {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// The enrolled faces a session matches against.
///
/// Always rebuilt from scratch; a running engine holds an `Arc<Gallery>`
/// snapshot and never sees a half-built one.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<Enrollment>,
    skipped: Vec<Skipped>,
}

impl Gallery {
    /// Encode every image in `dir` (created if missing), in file-name order.
    ///
    /// Each image contributes the embedding of its first detected face.
    /// Files that fail to decode or contain no face are skipped with a
    /// warning and listed in [`Gallery::skipped`]; they never abort the
    /// build. An empty result is not an error here.
    pub fn build<A: FaceAnalyzer + ?Sized>(dir: &Path, analyzer: &mut A) -> Result<Self, GalleryError> {
        let io_err = |source| GalleryError::Io {
            path: dir.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let mut gallery = Gallery::default();
        for path in files {
            match encode_reference(&path, analyzer)? {
                Ok(embedding) => {
                    let name = path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    tracing::debug!(name = %name, path = %path.display(), "enrolled");
                    gallery.entries.push(Enrollment {
                        name,
                        embedding,
                        source: path,
                    });
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "skipping gallery image");
                    gallery.skipped.push(Skipped { path, reason });
                }
            }
        }

        tracing::info!(
            dir = %dir.display(),
            enrolled = gallery.entries.len(),
            skipped = gallery.skipped.len(),
            "gallery built"
        );
        Ok(gallery)
    }

    pub fn from_entries(entries: Vec<Enrollment>) -> Self {
        Self {
            entries,
            skipped: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[Enrollment] {
        &self.entries
    }

    pub fn skipped(&self) -> &[Skipped] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// The enrollment closest to `probe` and its distance. Every entry is
    /// compared; ties keep the earlier entry.
    pub fn nearest(&self, probe: &Embedding) -> Option<(&Enrollment, f32)> {
        let mut best: Option<(&Enrollment, f32)> = None;
        for entry in &self.entries {
            let d = probe.distance(&entry.embedding);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((entry, d));
            }
        }
        best
    }
}

/// Outer error: analyzer failure (fatal). Inner error: this file is skipped.
fn encode_reference<A: FaceAnalyzer + ?Sized>(
    path: &Path,
    analyzer: &mut A,
) -> Result<Result<Embedding, SkipReason>, AnalyzerError> {
    let img = match read_image(path) {
        Ok(img) => img.to_luma8(),
        Err(reason) => return Ok(Err(reason)),
    };
    let (w, h) = img.dimensions();

    let faces = analyzer.detect(img.as_raw(), w, h)?;
    let Some(first) = faces.first() else {
        return Ok(Err(SkipReason::NoFace));
    };

    let embedding = analyzer
        .encode(img.as_raw(), w, h, std::slice::from_ref(first))?
        .into_iter()
        .next();
    Ok(embedding.ok_or(SkipReason::NoFace))
}

/// Decode by content, not extension: reference photos are often saved
/// without one, or under the wrong one.
fn read_image(path: &Path) -> Result<image::DynamicImage, SkipReason> {
    image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| SkipReason::Undecodable(e.to_string()))?
        .decode()
        .map_err(|e| SkipReason::Undecodable(e.to_string()))
}
