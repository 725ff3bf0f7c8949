//! CadMesh CLI: convert CAD drawings, documents and solids into 3D meshes.
//!
//! Classifies and normalizes local input files, estimates processing time,
//! and drives generation jobs against the configured mesh engine.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
