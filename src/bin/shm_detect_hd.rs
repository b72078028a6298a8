//! shm-detect-hd - 1280x960 camera variant of shm-detect.

use std::process::ExitCode;

use shm_perception::{cli, GEOMETRY_1280X960};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    cli::main_for(GEOMETRY_1280X960)
}
