use std::process::ExitCode;

use clap::Parser;
use smart_studio_lib::{run, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:?}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
