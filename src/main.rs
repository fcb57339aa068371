use std::path::PathBuf;
use std::process::ExitCode;

use gpu_particle_sandbox::app;
use gpu_particle_sandbox::config::SimSettings;

fn main() -> ExitCode {
    env_logger::init();

    // Optional scene file, loaded once the window exists
    let scene_path = std::env::args_os().nth(1).map(PathBuf::from);

    match app::run(SimSettings::default(), scene_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            log::error!("{error}");
            ExitCode::FAILURE
        }
    }
}
