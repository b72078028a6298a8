//! Shared frame sources.
//!
//! A `FrameSource` is a producer/consumer rendezvous over one frame buffer:
//! - `wait_for_next` blocks until the producer signals a new frame
//! - `with_lock` runs a closure on a `FrameView` while holding the buffer lock
//!
//! Callers MUST NOT:
//! - Hold the lock across `wait_for_next` (the producer would deadlock)
//! - Keep a `FrameView` beyond the closure (the producer may overwrite it)
//! - Perform file or UI I/O inside `with_lock`

use anyhow::Result;

use crate::frame::FrameView;

#[cfg(target_os = "linux")]
pub mod posix;

#[cfg(target_os = "linux")]
pub use posix::SharedMemory;

/// Minimal wait/lock contract over a shared frame buffer.
///
/// Any cross-process or cross-thread primitive pair (semaphore + mutex,
/// condition variable, file lock) can sit behind this trait.
pub trait FrameSource {
    /// Identifier of the underlying buffer (segment name).
    fn name(&self) -> &str;

    /// Block until the producer announces a new frame. No timeout.
    fn wait_for_next(&mut self) -> Result<()>;

    /// Run `f` with the buffer locked. The lock is released on every exit
    /// path, including a panic inside `f`.
    fn with_lock<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(FrameView<'_>) -> R;

    /// True once successfully attached.
    fn is_valid(&self) -> bool;
}

/// Shared memory names are absolute (`/cam0`); bare names get a leading slash.
pub fn normalize_segment_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        crate::DEFAULT_SEGMENT_NAME.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
