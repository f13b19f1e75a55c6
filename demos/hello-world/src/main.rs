use std::io;
use std::process::ExitCode;

use hello_world::{HELLO_WORLD_INT8, run};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    log::debug!("Model size: {} bytes", HELLO_WORLD_INT8.len());

    match run(&HELLO_WORLD_INT8, &mut io::stdout(), &mut io::stderr()) {
        Ok(status) => ExitCode::from(status),
        Err(_) => ExitCode::FAILURE,
    }
}
