use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// rota: rotate messages across a pool of chat accounts.
#[derive(Debug, Parser)]
#[command(name = "rota", version, about)]
pub struct Cli {
    /// Settings file (overrides ROTA_SETTINGS_FILE).
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,
    /// Credential list file (overrides ROTA_CREDENTIALS_FILE).
    #[arg(long, global = true)]
    pub credentials: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect or edit dispatch and voice settings.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage the stored credential list.
    #[command(subcommand)]
    Credentials(CredentialsCommand),
    /// Print which account would send which message, assuming all are ready.
    Plan {
        #[arg(long, default_value_t = 10)]
        ticks: usize,
        /// Seed for random mode.
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the sanitized settings.
    Show,
    /// Set the destination channel ("clear", "none", "null" or "0" unsets it).
    SetChannel { channel: String },
    /// Set the delay between ticks, in seconds.
    SetDelay { seconds: f64 },
    /// random, sequential (or order), assigned.
    SetMode { mode: String },
    /// Add dispatch accounts.
    AddAccount {
        #[arg(required = true)]
        credentials: Vec<String>,
    },
    /// Remove dispatch accounts by comma-separated 1-based positions.
    RemoveAccount { selection: String },
    AddMessage { text: String },
    RemoveMessage { id: u64 },
    /// Toggle the assignment of a message to the account at 1-based `account`.
    Assign { account: usize, message_id: u64 },
    /// Set or clear the voice target.
    SetVoice {
        #[arg(long)]
        guild: Option<String>,
        #[arg(long)]
        channel: Option<String>,
        /// Clear both guild and channel.
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum CredentialsCommand {
    /// List stored credentials (masked).
    List,
    /// Check every stored credential against the REST API.
    Validate {
        /// Rewrite the store with only the valid credentials.
        #[arg(long)]
        prune: bool,
    },
    /// Check whether each stored credential is a member of `guild`.
    Membership { guild: String },
    /// Make every stored credential leave `guild`.
    Leave { guild: String },
}
