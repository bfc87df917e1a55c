//! epoch-decoder command-line entry point

use anyhow::Context;
use clap::Parser;
use epoch_decoder::cli::{cmd_list_pipelines, cmd_run, exit_code, Cli};
use epoch_decoder::DecoderError;
use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "epoch_decoder=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if cli.list_pipelines {
        cmd_list_pipelines();
        return ExitCode::SUCCESS;
    }

    let dataset = cli
        .dataset_dir
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_default();
    match cmd_run(&cli).with_context(|| format!("decoding {} failed", dataset)) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            let code = err.downcast_ref::<DecoderError>().map_or(1, exit_code);
            ExitCode::from(code as u8)
        }
    }
}
