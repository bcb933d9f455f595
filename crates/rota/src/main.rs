mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use rota_core::{
    config::Config,
    dispatch::{parse_selection, selection, AssignmentEdit, DispatchConfig, DispatchMode},
    domain::{ChannelId, Credential, GuildId, MessageId},
    store::{AppSettings, CredentialStore, SettingsStore},
};
use rota_http::{CredentialValidator, Membership};
use tracing::info;

use crate::cli::{Cli, Command, ConfigCommand, CredentialsCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rota_core::logging::init("rota")?;

    let cli = Cli::parse();
    let mut cfg = Config::load()?;
    if let Some(path) = cli.settings {
        cfg.settings_file = path;
    }
    if let Some(path) = cli.credentials {
        cfg.credentials_file = path;
    }

    match cli.command {
        Command::Config(cmd) => run_config(&cfg, cmd),
        Command::Credentials(cmd) => run_credentials(&cfg, cmd).await,
        Command::Plan { ticks, seed } => {
            let settings = SettingsStore::new(&cfg.settings_file).load()?;
            print_plan(&settings.dispatch, ticks, seed);
            Ok(())
        }
    }
}

fn run_config(cfg: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    let store = SettingsStore::new(&cfg.settings_file);
    let mut settings = store.load()?;

    match cmd {
        ConfigCommand::Show => {
            print_settings(&settings);
            return Ok(());
        }
        ConfigCommand::SetChannel { channel } => {
            settings.edit_dispatch(|raw| raw.set_destination(&channel));
        }
        ConfigCommand::SetDelay { seconds } => {
            let mut accepted = false;
            settings.edit_dispatch(|raw| accepted = raw.set_delay_seconds(seconds));
            if !accepted {
                bail!("delay must be a non-negative number of seconds");
            }
        }
        ConfigCommand::SetMode { mode } => {
            let Some(mode) = DispatchMode::parse(&mode) else {
                bail!("unknown mode {mode:?} (expected random, sequential or assigned)");
            };
            settings.edit_dispatch(|raw| raw.set_mode(mode));
        }
        ConfigCommand::AddAccount { credentials } => {
            let mut added = 0;
            settings.edit_dispatch(|raw| added = raw.add_accounts(credentials));
            println!("added {added} account(s)");
        }
        ConfigCommand::RemoveAccount { selection } => {
            let indexes = parse_selection(&selection, settings.dispatch.accounts().len());
            if indexes.is_empty() {
                bail!("no valid account positions in {selection:?}");
            }
            let mut removed = 0;
            settings.edit_dispatch(|raw| removed = raw.remove_accounts(&indexes));
            println!("removed {removed} account(s)");
        }
        ConfigCommand::AddMessage { text } => {
            let mut added = false;
            settings.edit_dispatch(|raw| added = raw.add_message(&text));
            if !added {
                bail!("message text is empty");
            }
        }
        ConfigCommand::RemoveMessage { id } => {
            let mut removed = false;
            settings.edit_dispatch(|raw| removed = raw.remove_message(MessageId(id)));
            if !removed {
                bail!("no message with id {id}");
            }
        }
        ConfigCommand::Assign { account, message_id } => {
            let credential = account
                .checked_sub(1)
                .and_then(|i| settings.dispatch.accounts().get(i))
                .cloned()
                .with_context(|| format!("no account at position {account}"))?;
            let message_id = MessageId(message_id);
            if settings.dispatch.message(message_id).is_none() {
                bail!("no message with id {message_id}");
            }

            let mut outcome = AssignmentEdit::MessageTaken;
            settings.edit_dispatch(|raw| {
                outcome = raw.toggle_assignment(credential.expose(), message_id)
            });
            match outcome {
                AssignmentEdit::Assigned => {
                    println!("message {message_id} assigned to {credential}")
                }
                AssignmentEdit::Unassigned => {
                    println!("message {message_id} unassigned from {credential}")
                }
                AssignmentEdit::MessageTaken => {
                    bail!("message {message_id} is already assigned to another account")
                }
            }
        }
        ConfigCommand::SetVoice { guild, channel, clear } => {
            if clear {
                settings.guild_id = None;
                settings.voice_channel_id = None;
            }
            if let Some(guild) = guild.filter(|g| !g.trim().is_empty()) {
                settings.guild_id = Some(GuildId(guild.trim().to_string()));
            }
            if let Some(channel) = channel.filter(|c| !c.trim().is_empty()) {
                settings.voice_channel_id = Some(ChannelId(channel.trim().to_string()));
            }
        }
    }

    store.save(&settings)?;
    info!(path = %store.path().display(), "settings saved");
    print_settings(&settings);
    Ok(())
}

async fn run_credentials(cfg: &Config, cmd: CredentialsCommand) -> anyhow::Result<()> {
    let store = CredentialStore::new(&cfg.credentials_file);
    let credentials = store.load()?;

    match cmd {
        CredentialsCommand::List => {
            if credentials.is_empty() {
                println!("no credentials in {}", store.path().display());
            }
            for (i, credential) in credentials.iter().enumerate() {
                println!("{:>3}. {credential}", i + 1);
            }
        }
        CredentialsCommand::Validate { prune } => {
            let validator = CredentialValidator::from_config(cfg)?;
            let report = validator.validate_all(&credentials).await;
            for credential in &report.valid {
                println!("valid    {credential}");
            }
            for credential in &report.invalid {
                println!("invalid  {credential}");
            }
            if prune && !report.invalid.is_empty() {
                let kept = store.save(&report.valid)?;
                println!("kept {kept} credential(s), removed {}", report.invalid.len());
            }
        }
        CredentialsCommand::Membership { guild } => {
            let validator = CredentialValidator::from_config(cfg)?;
            let guild = GuildId(guild);
            for credential in &credentials {
                match validator.check_membership(credential, &guild).await {
                    Ok(Membership::Present) => println!("member   {credential}"),
                    Ok(Membership::Missing(detail)) => {
                        println!("missing  {credential} ({detail})")
                    }
                    Err(e) => println!("error    {credential} ({e})"),
                }
            }
        }
        CredentialsCommand::Leave { guild } => {
            let validator = CredentialValidator::from_config(cfg)?;
            let report = validator.leave_guild_all(&credentials, &GuildId(guild)).await;
            for (credential, detail) in &report.failed {
                println!("failed   {credential} ({detail})");
            }
            println!(
                "leave summary: {} succeeded, {} failed",
                report.left,
                report.failed.len()
            );
        }
    }
    Ok(())
}

fn print_settings(settings: &AppSettings) {
    let d = &settings.dispatch;
    let or_unset = |v: Option<String>| v.unwrap_or_else(|| "(unset)".to_string());

    let guild = settings.guild_id.as_ref().map(|g| g.to_string());
    let voice_channel = settings.voice_channel_id.as_ref().map(|c| c.to_string());
    let destination = d.destination_channel_id().map(|c| c.to_string());
    println!("guild:          {}", or_unset(guild));
    println!("voice channel:  {}", or_unset(voice_channel));
    println!("destination:    {}", or_unset(destination));
    println!("delay:          {}s", d.delay_seconds());
    println!("mode:           {}", d.dispatch_mode().as_str());
    println!("accounts:");
    for (i, account) in d.accounts().iter().enumerate() {
        println!("  {:>3}. {account}", i + 1);
    }
    println!("messages:");
    for message in d.messages() {
        println!("  [{}] {}", message.id, message.text);
    }
    println!("assignments:");
    for a in d.assignments() {
        println!("  {} -> {}", a.credential, a.message_id);
    }
    println!(
        "dispatchable:   {}",
        if d.is_dispatchable() { "yes" } else { "no" }
    );
}

fn print_plan(config: &DispatchConfig, ticks: usize, seed: Option<u64>) {
    if !config.is_dispatchable() {
        println!("settings are not dispatchable; a run would not start");
        return;
    }
    let ready: Vec<Credential> = config.accounts().to_vec();
    let mut cursors = selection::Cursors::default();
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    for tick in 1..=ticks {
        match selection::select(config, &ready, &mut cursors, &mut rng) {
            Some(pick) => {
                let text = config
                    .message(pick.message_id)
                    .map(|m| m.text.as_str())
                    .unwrap_or_default();
                println!(
                    "tick {tick:>3}: {} sends [{}] {text} ({:?})",
                    pick.credential, pick.message_id, pick.source
                );
            }
            None => println!("tick {tick:>3}: skipped"),
        }
    }
}
