//! Deploy command - infrastructure template and function code

pub mod function;
pub mod template;

use anyhow::{Context, Result};
use clap::Subcommand;
use datapipe_config::RuntimeConfig;

#[derive(Subcommand)]
pub enum DeployCommand {
    /// Generate template.yaml declaring the whole pipeline
    Template(template::TemplateArgs),
    /// Upload a new Lambda zip to the deployed function and test it
    Function(function::FunctionArgs),
}

impl DeployCommand {
    pub fn run(self, config: &RuntimeConfig) -> Result<()> {
        match self {
            DeployCommand::Template(args) => template::run(args, config),
            DeployCommand::Function(args) => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?
                .block_on(function::run(args, config)),
        }
    }
}
