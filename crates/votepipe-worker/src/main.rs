use anyhow::Context;
use std::process::ExitCode;

use votepipe_core::WorkerConfig;
use votepipe_worker::shutdown::spawn_signal_listener;
use votepipe_worker::telemetry::{init_telemetry, LogFormat};
use votepipe_worker::{Shutdown, Worker, WorkerError};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    if let Err(e) = init_telemetry(LogFormat::from_env()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<WorkerError>()
                .map_or(1, WorkerError::exit_code);
            tracing::error!(error = format!("{e:#}"), exit_code = code, "votepipe worker exited with error");
            ExitCode::from(code)
        }
    }
}

async fn run() -> anyhow::Result<()> {
    // Before any connection is opened, so a signal during startup is handled in order.
    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let config = WorkerConfig::from_env().context("Failed to load worker configuration")?;
    let worker = Worker::from_config(config, shutdown).context("Failed to build worker")?;

    worker.run().await?;
    Ok(())
}
