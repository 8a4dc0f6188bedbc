mod app;
mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use comply_core::config::{self, Config};
use comply_rules::lifecycle::Actor;

use crate::app::App;
use crate::cli::{CliArgs, Command, StoreCommand};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let json = args.json;

    match args.command {
        Command::Keygen {
            algorithm,
            key_id,
            out,
        } => commands::keygen(algorithm.into(), &key_id, out.as_deref(), json),
        Command::Validate { dir } => {
            let config = load_config()?;
            commands::validate(&dir, config.evaluation.max_expression_depth, json)
        }
        Command::Migrate => commands::migrate(&load_config()?).await,
        Command::Store(command) => {
            let app = App::connect(load_config()?).await?;
            run(&app, command, json).await
        }
    }
}

fn load_config() -> Result<Config> {
    config::load_dotenv();
    let config = Config::from_env();
    config.validate().context("invalid configuration")?;
    config.log_summary();
    Ok(config)
}

async fn run(app: &App, command: StoreCommand, json: bool) -> Result<()> {
    match command {
        StoreCommand::Import { dir } => commands::import(app, &dir, json).await,
        StoreCommand::Transition {
            policy_id,
            transition,
            actor,
            capabilities,
            justification,
        } => {
            let actor = Actor::new(actor, capabilities.into_iter().map(Into::into));
            commands::transition(app, policy_id, &transition, actor, &justification, json).await
        }
        StoreCommand::Submit { file } => commands::submit(app, &file, json).await,
        StoreCommand::SignPending { limit } => commands::sign_pending(app, limit, json).await,
        StoreCommand::ProcessPending { limit } => commands::process_pending(app, limit, json).await,
        StoreCommand::VerifyChain { stream } => commands::verify_chain(app, &stream, json).await,
        StoreCommand::Export { from, to, out } => commands::export(app, from, to, &out, json).await,
        StoreCommand::VerifyBundle { dir } => commands::verify_exported(app, &dir, json).await,
        StoreCommand::Score { user } => commands::score(app, &user, json).await,
        StoreCommand::RotateKeys { batch_size, dry_run } => {
            commands::rotate_keys(app, batch_size, dry_run, json).await
        }
    }
}
