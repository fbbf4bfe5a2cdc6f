mod cli;
mod commands;
mod prompt;
mod setup;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use keyward_core::config::AppConfig;
use keyward_core::lifecycle;

use cli::{BypassAction, Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    lifecycle::init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(cli.config.as_deref());

    lifecycle::log_startup();
    let code = match run(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    };
    lifecycle::log_shutdown();
    code
}

async fn run(command: Commands, config: &AppConfig) -> Result<ExitCode> {
    match command {
        Commands::Init { protect } => commands::init(config, protect).await?,
        Commands::Status => commands::status(config)?,
        Commands::Put { key, value } => commands::put(config, key, value).await?,
        Commands::Get { key } => commands::get(config, key).await?,
        Commands::List => commands::list(config).await?,
        Commands::Remove { key } => commands::remove(config, key).await?,
        Commands::Passphrase => return commands::passphrase(config).await,
        Commands::Bypass { action } => match action {
            BypassAction::Enable => commands::bypass_enable(config).await?,
            BypassAction::Disable => commands::bypass_disable(config)?,
        },
        Commands::Unlock { bypass } => commands::unlock(config, bypass).await?,
    }
    Ok(ExitCode::SUCCESS)
}
