//! shm-detect - 848x480 camera variant.
//!
//! 1. Attaches to the camera's shared memory segment (fails fast if missing)
//! 2. Joins the MQTT session selected by --cid
//! 3. Per frame: wait, lock, detect, unlock, optional snapshot/preview, publish
//! 4. Exits 0 once the session is stopped (Ctrl-C)

use std::process::ExitCode;

use shm_perception::{cli, GEOMETRY_848X480};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    cli::main_for(GEOMETRY_848X480)
}
