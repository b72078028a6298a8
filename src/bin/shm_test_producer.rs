//! shm-test-producer - synthetic camera for exercising shm-detect without hardware.
//!
//! Creates the shared memory segment, writes a moving gradient at the requested
//! rate and signals consumers after every frame. The segment is removed on exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Write synthetic frames into a shared memory segment")]
struct Args {
    /// Name of the shared memory segment to create.
    #[arg(long, default_value = "/cam0")]
    name: String,

    /// Frame width in pixels.
    #[arg(long, default_value_t = 848)]
    width: u32,

    /// Frame height in pixels.
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Frames per second.
    #[arg(long, default_value_t = 10)]
    fps: u32,

    /// Stop after this many seconds (0 runs until Ctrl-C).
    #[arg(long, default_value_t = 0)]
    seconds: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    run(&args)
}

#[cfg(target_os = "linux")]
fn run(args: &Args) -> Result<()> {
    use shm_perception::{FrameGeometry, FrameSource, SharedMemory};

    let geometry = FrameGeometry::new(args.width, args.height, 24);
    let mut segment = SharedMemory::create(&args.name, geometry)?;
    log::info!(
        "created shared memory '{}' ({} bytes, {})",
        segment.name(),
        segment.size(),
        geometry
    );

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("failed to install Ctrl-C handler")?;
    }

    let period = Duration::from_secs_f64(1.0 / args.fps as f64);
    let deadline = (args.seconds > 0).then(|| Instant::now() + Duration::from_secs(args.seconds));
    let mut pattern = GradientPattern::new(geometry.width, geometry.height);
    let mut last_health_log = Instant::now();

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        let started = Instant::now();
        let pixels = pattern.next_frame();
        segment.write_frame(&pixels)?;
        segment.notify_all()?;

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            log::info!("frames written: {}", pattern.frame_count);
            last_health_log = Instant::now();
        }
        if let Some(remaining) = period.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    log::info!(
        "producer stopped after {} frames; removing '{}'",
        pattern.frame_count,
        segment.name()
    );
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn run(_args: &Args) -> Result<()> {
    Err(anyhow!("shared memory frame sources require Linux"))
}

/// Diagonal RGB gradient that shifts by one step per frame.
struct GradientPattern {
    width: u32,
    height: u32,
    frame_count: u64,
}

impl GradientPattern {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
        }
    }

    fn next_frame(&mut self) -> Vec<u8> {
        let shift = self.frame_count;
        self.frame_count += 1;

        let mut pixels = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height as u64 {
            for x in 0..self.width as u64 {
                pixels.push(((x + shift) % 256) as u8);
                pixels.push(((y + shift) % 256) as u8);
                pixels.push(((x + y) % 256) as u8);
            }
        }
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_fills_frame_and_moves() {
        let mut pattern = GradientPattern::new(4, 3);
        let first = pattern.next_frame();
        let second = pattern.next_frame();
        assert_eq!(first.len(), 4 * 3 * 3);
        assert_ne!(first, second);
        assert_eq!(pattern.frame_count, 2);
    }
}
