//! Shared-memory camera consumer.
//!
//! This crate bridges a video feed published in shared memory by an external
//! producer process to a pub/sub bus:
//!
//! 1. **Wait** for the producer to signal a new frame (no lock held).
//! 2. **Lock** the segment and copy the frame out.
//! 3. **Unlock**, run the detector on the copy, then the optional side effect
//!    (snapshot or preview).
//! 4. **Publish** one `DetectionMessage` stamped with wall-clock time and the
//!    configured sender stamp.
//!
//! The loop ends when the publishing session reports itself inactive.
//!
//! # Module Structure
//!
//! - `frame`: Geometry, lock-scoped `FrameView`, owned copies
//! - `shm`: `FrameSource` contract and the POSIX shared memory segment
//! - `detect`: `DetectorBackend` trait and backends
//! - `publish`: `DetectionPublisher` contract and the MQTT session
//! - `acquisition`: The wait/lock/detect/publish state machine
//! - `sink`: Verbose-mode snapshot and preview writers
//! - `config`, `cli`, `ui`: Program surface

pub mod acquisition;
pub mod cli;
pub mod config;
pub mod detect;
pub mod frame;
pub mod publish;
pub mod shm;
pub mod sink;
pub mod ui;

pub use acquisition::{run_to_exit, AcquisitionLoop, LoopConfig, LoopState, LoopStats, Verbosity};
pub use detect::{select_backend, DetectionResult, DetectorBackend, StubBackend};
pub use frame::{FrameGeometry, FrameView, OwnedFrame, GEOMETRY_1280X960, GEOMETRY_848X480};
pub use publish::{
    DetectionMessage, DetectionPublisher, MqttSession, MqttSessionConfig, SessionStopHandle,
    TimeStamp,
};
#[cfg(target_os = "linux")]
pub use shm::SharedMemory;
pub use shm::{normalize_segment_name, FrameSource};
pub use sink::{FrameSink, PreviewSink, SnapshotSink};

/// Segment used when `--name` is given but empty.
pub const DEFAULT_SEGMENT_NAME: &str = "/cam0";
