//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crmsync_engine::DEFAULT_COLLECTION;

/// crmsync - mirror Google Calendar collections through push notifications
#[derive(Debug, Parser)]
#[command(name = "crmsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CRMSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database (overrides [store] path)
    #[arg(long, env = "CRMSYNC_STORE", global = true)]
    pub store: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch channel commands
    Channel {
        #[command(subcommand)]
        action: ChannelAction,
    },

    /// Deliver one push notification to the engine
    Notify(NotifyArgs),

    /// Apply pending changes without waiting for a notification
    Sync {
        /// Channel to sync; defaults to every active channel
        channel_id: Option<String>,

        /// Sync the active channel of this collection instead
        #[arg(long, conflicts_with = "channel_id")]
        collection: Option<String>,

        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Renew channels that are about to expire
    Renew {
        /// Keep running and renew on every check interval
        #[arg(long)]
        watch: bool,
    },

    /// Mirrored event commands
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Channel actions.
#[derive(Debug, Subcommand)]
pub enum ChannelAction {
    /// Register a channel, superseding the collection's active one
    Register {
        /// Collection to watch
        #[arg(default_value = DEFAULT_COLLECTION)]
        collection: String,
    },

    /// Stop a channel
    Stop { channel_id: String },

    /// Replace a channel with a fresh one that keeps its sync position
    Renew { channel_id: String },

    /// List channels
    List {
        /// Include stopped and superseded channels
        #[arg(long, short)]
        all: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Notification fields, given as flags or as raw `X-Goog-*` headers.
#[derive(Debug, Args)]
pub struct NotifyArgs {
    /// Raw header, e.g. "X-Goog-Channel-ID: 4ba78bf0" (repeatable)
    #[arg(long = "header", short = 'H', action = clap::ArgAction::Append)]
    pub headers: Vec<String>,

    /// X-Goog-Channel-ID
    #[arg(long, required_unless_present = "headers")]
    pub channel_id: Option<String>,

    /// X-Goog-Resource-ID
    #[arg(long, required_unless_present = "headers")]
    pub resource_id: Option<String>,

    /// X-Goog-Resource-State (sync, exists, not_exists)
    #[arg(long, default_value = "exists")]
    pub resource_state: String,

    /// X-Goog-Message-Number
    #[arg(long)]
    pub message_number: Option<u64>,

    /// X-Goog-Channel-Token
    #[arg(long)]
    pub token: Option<String>,
}

/// Mirrored event actions.
#[derive(Debug, Subcommand)]
pub enum EventsAction {
    /// List mirrored events of a collection
    List {
        #[arg(default_value = DEFAULT_COLLECTION)]
        collection: String,

        /// Include cancelled (tombstoned) events
        #[arg(long)]
        include_cancelled: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration and database paths
    Path,
}
