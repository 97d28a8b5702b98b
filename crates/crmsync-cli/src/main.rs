//! crmsync CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use crmsync_core::{TracingConfig, init_tracing};

use crmsync_cli::cli::{ChannelAction, Cli, Command, ConfigAction, EventsAction};
use crmsync_cli::commands::{self, App};
use crmsync_cli::config::CrmsyncConfig;
use crmsync_cli::error::CliResult;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(TracingConfig::for_cli(cli.debug, cli.json_logs)) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = CrmsyncConfig::load(cli.config.as_deref())?;
    let source = cli.config.clone().unwrap_or_else(CrmsyncConfig::default_path);
    let store_path = cli.store.clone().unwrap_or_else(|| config.store_path());
    let connect = || -> CliResult<App> {
        App::connect(&config, commands::open_store(&store_path)?)
    };

    match cli.command {
        Command::Channel { action } => match action {
            ChannelAction::Register { collection } => {
                commands::channel::register(&connect()?, &collection).await
            }
            ChannelAction::Stop { channel_id } => {
                commands::channel::stop(&connect()?, &channel_id).await
            }
            ChannelAction::Renew { channel_id } => {
                commands::channel::renew(&connect()?, &channel_id).await
            }
            ChannelAction::List { all, json } => {
                let store = commands::open_store(&store_path)?;
                commands::channel::list(store.as_ref(), all, json)
            }
        },
        Command::Notify(args) => commands::notify::run(&connect()?, &args).await,
        Command::Sync {
            channel_id,
            collection,
            json,
        } => {
            commands::sync::run(
                &connect()?,
                channel_id.as_deref(),
                collection.as_deref(),
                json,
            )
            .await
        }
        Command::Renew { watch } => {
            commands::renew::run(&connect()?, config.renewal_config(), watch).await
        }
        Command::Events { action } => match action {
            EventsAction::List {
                collection,
                include_cancelled,
                json,
            } => {
                let store = commands::open_store(&store_path)?;
                commands::events::list(store.as_ref(), &collection, include_cancelled, json)
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &source),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config, &source),
        },
    }
}
