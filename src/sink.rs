//! Verbose-mode side effects.
//!
//! A `FrameSink` receives a copy of each frame after the shared buffer lock
//! has been released, so slow I/O here never stalls the producer. Failures are
//! reported to the caller, which logs them and carries on.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;

use crate::frame::OwnedFrame;

const JPEG_QUALITY: u8 = 90;
const PREVIEW_FILE: &str = "preview.jpg";

pub trait FrameSink {
    fn name(&self) -> &'static str;

    /// Called once per processed frame.
    fn on_frame(&mut self, frame: &OwnedFrame) -> Result<()>;
}

/// Periodically persists frames as numbered JPEG files (`0.jpg`, `1.jpg`, ...).
///
/// At most one file per `interval`; frames in between are skipped.
pub struct SnapshotSink {
    dir: PathBuf,
    interval: Duration,
    next_index: u64,
    last_write: Option<Instant>,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>, interval: Duration) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create snapshot dir {}", dir.display()))?;
        Ok(Self {
            dir,
            interval,
            next_index: 0,
            last_write: None,
        })
    }

    /// Number of snapshots written so far.
    pub fn written(&self) -> u64 {
        self.next_index
    }
}

impl FrameSink for SnapshotSink {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn on_frame(&mut self, frame: &OwnedFrame) -> Result<()> {
        if let Some(last) = self.last_write {
            if last.elapsed() < self.interval {
                return Ok(());
            }
        }
        // A failed write still starts a new interval.
        self.last_write = Some(Instant::now());

        let path = self.dir.join(format!("{}.jpg", self.next_index));
        write_jpeg(frame, &path)?;
        log::debug!("snapshot written to {}", path.display());
        self.next_index += 1;
        Ok(())
    }
}

/// Rewrites a single preview image every frame for an external viewer.
///
/// Each frame goes to a temporary file first and is renamed into place, so a
/// viewer never reads a half-written JPEG.
pub struct PreviewSink {
    path: PathBuf,
    staging: PathBuf,
}

impl PreviewSink {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create preview dir {}", dir.display()))?;
        Ok(Self {
            path: dir.join(PREVIEW_FILE),
            staging: dir.join(format!(".{}.tmp", PREVIEW_FILE)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for PreviewSink {
    fn name(&self) -> &'static str {
        "preview"
    }

    fn on_frame(&mut self, frame: &OwnedFrame) -> Result<()> {
        write_jpeg(frame, &self.staging)?;
        std::fs::rename(&self.staging, &self.path)
            .with_context(|| format!("failed to publish preview {}", self.path.display()))
    }
}

fn write_jpeg(frame: &OwnedFrame, path: &Path) -> Result<()> {
    let image = frame.to_rgb_image()?;
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    image
        .write_with_encoder(JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY))
        .with_context(|| format!("failed to encode {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("failed to write {}", path.display()))
}
