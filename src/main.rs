// SPDX-License-Identifier: Apache-2.0

//! `simtel`: loads a declarative pipeline topology, registers the
//! reference `className` constructors, and runs it until interrupted.
//!
//! The topology itself runs on its own dedicated OS thread (see
//! `simtel_controller::Orchestrator`); this binary's job is config
//! loading, registry setup, lifecycle of the orchestrator, and mapping
//! the outcome to a process exit code.

mod cli;

use clap::Parser;
use cli::Cli;
use simtel_controller::{Orchestrator, Registry};
use simtel_engine::message::SimMessage;
use simtel_engine::service::ServiceState;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_registry() -> Registry<SimMessage> {
    let mut registry = Registry::new();
    simtel_demo_services::register_defaults(&mut registry);
    registry
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let source = tokio::fs::read_to_string(&cli.config).await?;
    let config = simtel_config::PipelineConfig::from_yaml(&source)?;

    let registry = build_registry();
    let mut orchestrator = Orchestrator::new(config, registry)?;
    orchestrator.start_all()?;
    tracing::info!(config = %cli.config.display(), "pipeline started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, stopping every service");

    let statuses = orchestrator.get_pipeline_status();
    let any_errored = statuses.iter().any(|s| s.state == ServiceState::Error);
    for status in &statuses {
        tracing::info!(service = %status.name, state = ?status.state, "final service state");
    }

    orchestrator.stop_all()?;
    Ok(!any_errored)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(error = %err, "simtel exited with an error");
            ExitCode::FAILURE
        }
    }
}
