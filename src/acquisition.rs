//! Frame acquisition and publish loop.
//!
//! ```text
//! Idle --open source + publisher--> Attached --run--> Running --inactive--> Stopped
//!   \______________ open failed _____________________________________________/
//! ```
//!
//! Each iteration, strictly in order:
//! 1. `wait_for_next` on the frame source (unlocked)
//! 2. `with_lock`: copy the frame out of the shared buffer
//! 3. run the detector on the copy (lock released), then hand the copy to the
//!    sink when verbose
//! 4. publish the detection with the current wall-clock time
//!
//! The session's active flag is checked once per iteration. A stop request
//! that arrives while `wait_for_next` is blocked takes effect after the next
//! frame; a stalled producer blocks the loop indefinitely.

use std::time::{Duration, Instant, SystemTime};

use anyhow::{anyhow, Result};

use crate::detect::{DetectionResult, DetectorBackend};
use crate::frame::OwnedFrame;
use crate::publish::DetectionPublisher;
use crate::shm::FrameSource;
use crate::sink::FrameSink;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Attached,
    Running,
    Stopped,
}

/// Optional per-frame side effect level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// No side effects, no frame copies.
    #[default]
    Silent,
    /// Periodically persist a frame to local storage.
    Persist,
    /// Render every frame to the preview surface.
    Display,
}

impl Verbosity {
    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            0 => Ok(Self::Silent),
            1 => Ok(Self::Persist),
            2 => Ok(Self::Display),
            other => Err(anyhow!("verbose level must be 0, 1 or 2 (got {})", other)),
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Self::Silent => 0,
            Self::Persist => 1,
            Self::Display => 2,
        }
    }

    pub fn is_silent(self) -> bool {
        self == Self::Silent
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoopConfig {
    /// Sender stamp attached to every published detection.
    pub sender_stamp: u32,
    pub verbosity: Verbosity,
}

/// Counters for one `run`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub published: u64,
    pub inference_failures: u64,
    pub sink_failures: u64,
}

pub struct AcquisitionLoop<S, P> {
    source: S,
    publisher: P,
    detector: Box<dyn DetectorBackend>,
    sink: Option<Box<dyn FrameSink>>,
    config: LoopConfig,
    state: LoopState,
    stats: LoopStats,
}

impl<S: FrameSource, P: DetectionPublisher> AcquisitionLoop<S, P> {
    /// Open the frame source, then the publisher. Either failure is a startup
    /// error; nothing has been waited on or published when it is returned.
    pub fn attach<FS, FP>(
        open_source: FS,
        open_publisher: FP,
        mut detector: Box<dyn DetectorBackend>,
        config: LoopConfig,
    ) -> Result<Self>
    where
        FS: FnOnce() -> Result<S>,
        FP: FnOnce() -> Result<P>,
    {
        let source = open_source()?;
        if !source.is_valid() {
            return Err(anyhow!("frame source '{}' is not valid", source.name()));
        }
        let publisher = open_publisher()?;
        detector.warm_up()?;

        log::info!(
            "attached to '{}' (detector={}, sender_stamp={}, verbose={})",
            source.name(),
            detector.name(),
            config.sender_stamp,
            config.verbosity.level()
        );

        Ok(Self {
            source,
            publisher,
            detector,
            sink: None,
            config,
            state: LoopState::Attached,
            stats: LoopStats::default(),
        })
    }

    /// Side-effect hook. Ignored while verbosity is `Silent`.
    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Release the frame source and publisher.
    pub fn into_parts(self) -> (S, P) {
        (self.source, self.publisher)
    }

    /// Run until the publisher reports its session inactive.
    ///
    /// A wait or lock failure ends the loop with an error.
    pub fn run(&mut self) -> Result<LoopStats> {
        if self.state != LoopState::Attached {
            return Err(anyhow!("acquisition loop cannot run from {:?}", self.state));
        }
        self.state = LoopState::Running;
        let outcome = self.run_iterations();
        self.state = LoopState::Stopped;
        log::info!(
            "acquisition stopped: frames={} published={} inference_failures={} sink_failures={}",
            self.stats.frames,
            self.stats.published,
            self.stats.inference_failures,
            self.stats.sink_failures
        );
        outcome.map(|()| self.stats)
    }

    fn run_iterations(&mut self) -> Result<()> {
        let mut last_health_log = Instant::now();
        while self.publisher.is_active() {
            self.step()?;

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "source={} frames={} published={} failures={}",
                    self.source.name(),
                    self.stats.frames,
                    self.stats.published,
                    self.stats.inference_failures + self.stats.sink_failures
                );
                last_health_log = Instant::now();
            }
        }
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        self.source.wait_for_next()?;

        let frame: OwnedFrame = self.source.with_lock(|view| view.to_owned_frame())?;
        self.stats.frames += 1;

        let inference = self.detector.infer(&frame.view());

        if !self.config.verbosity.is_silent() {
            if let Some(sink) = self.sink.as_mut() {
                if let Err(e) = sink.on_frame(&frame) {
                    self.stats.sink_failures += 1;
                    log::warn!("{} sink failed: {:#}", sink.name(), e);
                }
            }
        }

        let result: DetectionResult = match inference {
            Ok(result) => result,
            Err(e) => {
                self.stats.inference_failures += 1;
                log::warn!("{} detector failed: {:#}", self.detector.name(), e);
                return Ok(());
            }
        };

        log::trace!(
            "frame {}: azimuth={:.3} distance={:.3}",
            self.stats.frames,
            result.azimuth_angle,
            result.distance
        );
        self.publisher
            .publish(&result, SystemTime::now(), self.config.sender_stamp);
        self.stats.published += 1;
        Ok(())
    }
}

/// Attach, run, and map the outcome to a process exit code.
///
/// Returns 0 when the session ended normally and 1 on a startup or runtime
/// error (reported through the log).
pub fn run_to_exit<S, P, FS, FP>(
    open_source: FS,
    open_publisher: FP,
    detector: Box<dyn DetectorBackend>,
    config: LoopConfig,
    sink: Option<Box<dyn FrameSink>>,
) -> i32
where
    S: FrameSource,
    P: DetectionPublisher,
    FS: FnOnce() -> Result<S>,
    FP: FnOnce() -> Result<P>,
{
    let mut acquisition = match AcquisitionLoop::attach(open_source, open_publisher, detector, config)
    {
        Ok(acquisition) => acquisition,
        Err(e) => {
            log::error!("startup failed: {:#}", e);
            return 1;
        }
    };
    if let Some(sink) = sink {
        acquisition = acquisition.with_sink(sink);
    }
    match acquisition.run() {
        Ok(_) => 0,
        Err(e) => {
            log::error!("acquisition failed: {:#}", e);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() -> Result<()> {
        assert_eq!(Verbosity::from_level(0)?, Verbosity::Silent);
        assert_eq!(Verbosity::from_level(1)?, Verbosity::Persist);
        assert_eq!(Verbosity::from_level(2)?, Verbosity::Display);
        assert!(Verbosity::from_level(3).is_err());
        assert_eq!(Verbosity::Display.level(), 2);
        assert!(Verbosity::default().is_silent());
        Ok(())
    }
}
