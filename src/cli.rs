//! Command line surface shared by the `shm-detect` program variants.
//!
//! The variants differ only in the compiled-in frame geometry.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::Parser;

use crate::acquisition::{run_to_exit, LoopConfig, Verbosity};
use crate::config::{BridgeConfig, OutputSettings};
use crate::detect::select_backend;
use crate::frame::FrameGeometry;
use crate::publish::{MqttSession, MqttSessionConfig};
use crate::shm::normalize_segment_name;
use crate::sink::{FrameSink, PreviewSink, SnapshotSink};
use crate::ui::{Ui, UiMode};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Read camera frames from shared memory, run detection and publish the result",
    after_help = "Example: shm-detect --cid=111 --name=cam0 --verbose=1"
)]
pub struct Args {
    /// Numeric id of the pub/sub session to join.
    #[arg(long, env = "SHM_PERCEPTION_CID")]
    pub cid: u16,

    /// Name of the shared memory segment to attach to (empty selects /cam0).
    #[arg(long, env = "SHM_PERCEPTION_NAME")]
    pub name: String,

    /// Sender stamp attached to published detections.
    #[arg(long, default_value_t = 0)]
    pub id: u32,

    /// 0 = silent, 1 = periodically save a frame, 2 = live preview image.
    #[arg(
        long,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = 0,
        default_missing_value = "1",
        value_parser = clap::value_parser!(u8).range(0..=2)
    )]
    pub verbose: u8,

    /// Detector backend (stub|tract).
    #[arg(long, default_value = "stub")]
    pub detector: String,

    /// ONNX model for the tract detector.
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// UI mode for stderr startup stages.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    pub ui: UiMode,
}

/// Parse arguments, run, and map the outcome to an exit code.
///
/// Usage errors exit 1, `--help`/`--version` exit 0.
pub fn main_for(geometry: FrameGeometry) -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };
    match run(&args, geometry) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Build every collaborator from `args` and run the acquisition loop.
pub fn run(args: &Args, geometry: FrameGeometry) -> Result<i32> {
    let verbosity = Verbosity::from_level(args.verbose)?;
    let config = BridgeConfig::load()?;
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());
    let segment = normalize_segment_name(&args.name);

    let detector = select_backend(&args.detector, geometry, args.model.as_deref())?;
    let sink = build_sink(verbosity, &config.output)?;
    let session_config = MqttSessionConfig {
        endpoint: config.mqtt_endpoint()?,
        client_id: config.mqtt.client_id.clone(),
        topic_prefix: config.mqtt.topic_prefix.clone(),
        keep_alive: config.mqtt.keep_alive,
        cid: args.cid,
    };
    let loop_config = LoopConfig {
        sender_stamp: args.id,
        verbosity,
    };

    log::info!(
        "frame geometry {} from '{}', session {}",
        geometry,
        segment,
        args.cid
    );

    Ok(run_to_exit(
        || ui.stage("Attach shared memory", || open_segment(&segment, geometry)),
        || ui.stage("Open MQTT session", || open_session(session_config)),
        detector,
        loop_config,
        sink,
    ))
}

fn build_sink(
    verbosity: Verbosity,
    output: &OutputSettings,
) -> Result<Option<Box<dyn FrameSink>>> {
    let sink: Option<Box<dyn FrameSink>> = match verbosity {
        Verbosity::Silent => None,
        Verbosity::Persist => {
            log::info!(
                "saving a frame every {}ms to {}",
                output.snapshot_interval.as_millis(),
                output.dir.display()
            );
            Some(Box::new(SnapshotSink::new(
                &output.dir,
                output.snapshot_interval,
            )?))
        }
        Verbosity::Display => {
            let sink = PreviewSink::new(&output.dir)?;
            log::info!("live preview at {}", sink.path().display());
            Some(Box::new(sink))
        }
    };
    Ok(sink)
}

fn open_session(config: MqttSessionConfig) -> Result<MqttSession> {
    let session = MqttSession::open(config)?;
    let stop = session.stop_handle();
    ctrlc::set_handler(move || {
        log::info!("stop requested; exiting after the next frame");
        stop.stop();
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    Ok(session)
}

#[cfg(target_os = "linux")]
fn open_segment(name: &str, geometry: FrameGeometry) -> Result<crate::shm::SharedMemory> {
    use crate::shm::FrameSource;

    let shm = crate::shm::SharedMemory::open(name, geometry).map_err(|e| {
        log::error!("Failed to access shared memory '{}'.", name);
        e
    })?;
    log::info!("Found shared memory '{}' ({} bytes).", shm.name(), shm.size());
    Ok(shm)
}

#[cfg(not(target_os = "linux"))]
fn open_segment(name: &str, _geometry: FrameGeometry) -> Result<UnsupportedSource> {
    log::error!("Failed to access shared memory '{}'.", name);
    Err(anyhow!("shared memory frame sources require Linux"))
}

#[cfg(not(target_os = "linux"))]
enum UnsupportedSource {}

#[cfg(not(target_os = "linux"))]
impl crate::shm::FrameSource for UnsupportedSource {
    fn name(&self) -> &str {
        match *self {}
    }

    fn wait_for_next(&mut self) -> Result<()> {
        match *self {}
    }

    fn with_lock<R, F>(&mut self, _f: F) -> Result<R>
    where
        F: FnOnce(crate::frame::FrameView<'_>) -> R,
    {
        match *self {}
    }

    fn is_valid(&self) -> bool {
        match *self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn parses_full_argument_set() -> Result<()> {
        let args = Args::try_parse_from([
            "shm-detect",
            "--cid=111",
            "--name=cam0",
            "--id=3",
            "--verbose=2",
        ])?;
        assert_eq!(args.cid, 111);
        assert_eq!(args.name, "cam0");
        assert_eq!(args.id, 3);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.detector, "stub");
        Ok(())
    }

    #[test]
    fn optional_arguments_have_defaults() -> Result<()> {
        let args = Args::try_parse_from(["shm-detect", "--cid=111", "--name="])?;
        assert_eq!(args.id, 0);
        assert_eq!(args.verbose, 0);
        assert_eq!(normalize_segment_name(&args.name), "/cam0");
        Ok(())
    }

    #[test]
    fn bare_verbose_flag_means_level_one() -> Result<()> {
        let args = Args::try_parse_from(["shm-detect", "--cid=1", "--name=cam0", "--verbose"])?;
        assert_eq!(args.verbose, 1);
        Ok(())
    }

    #[test]
    fn verbose_level_out_of_range_is_rejected() {
        let err = Args::try_parse_from(["shm-detect", "--cid=1", "--name=cam0", "--verbose=3"])
            .expect_err("level 3 must be rejected");
        assert!(err.use_stderr());
    }

    #[test]
    fn missing_required_arguments_are_usage_errors() {
        let err = Args::try_parse_from(["shm-detect", "--name=cam0"])
            .expect_err("cid is required");
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert!(err.use_stderr());
    }

    #[test]
    fn silent_verbosity_builds_no_sink() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = OutputSettings {
            dir: dir.path().to_path_buf(),
            snapshot_interval: std::time::Duration::from_secs(1),
        };
        assert!(build_sink(Verbosity::Silent, &output)?.is_none());
        assert_eq!(
            build_sink(Verbosity::Persist, &output)?.map(|s| s.name()),
            Some("snapshot")
        );
        assert_eq!(
            build_sink(Verbosity::Display, &output)?.map(|s| s.name()),
            Some("preview")
        );
        Ok(())
    }
}
