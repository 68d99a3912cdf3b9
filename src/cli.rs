// SPDX-License-Identifier: Apache-2.0

//! Command-line surface for the `simtel` binary.

use clap::Parser;
use std::path::PathBuf;

/// Runs a pipeline topology described by a declarative YAML configuration
/// file until interrupted.
#[derive(Debug, Parser)]
#[command(name = "simtel", version, about, long_about = None)]
pub struct Cli {
    /// Path to the pipeline configuration file.
    pub config: PathBuf,
}
