use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use sinli_relay::channels::{Channel, EmailChannel, FilesystemChannel};
use sinli_relay::config::Settings;
use sinli_relay::error::{ConfigError, Result};
use sinli_relay::pipeline::pipe_channels;

/// Relay SINLI messages between a filesystem mailbox and an email mailbox.
#[derive(Parser)]
#[command(name = "sinli-relay", version)]
struct Cli {
    /// Source channel.
    #[arg(long, short = 'i', value_enum)]
    input: ChannelKind,

    /// Destination channel.
    #[arg(long, short = 'o', value_enum)]
    output: ChannelKind,

    /// Settings file path.
    #[arg(long, short = 's', default_value = "settings.json")]
    settings: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChannelKind {
    /// Directory-tree transport.
    Files,
    /// POP3/SMTP transport.
    Emails,
}

fn build_channel(kind: ChannelKind, settings: &Settings) -> Result<Box<dyn Channel>> {
    match kind {
        ChannelKind::Files => {
            let section = settings
                .filesystem
                .as_ref()
                .ok_or_else(|| ConfigError::MissingRequired {
                    key: "filesystem".into(),
                    hint: "the files channel needs a filesystem section in the settings file"
                        .into(),
                })?;
            let channel = FilesystemChannel::new(section.base_path.clone(), &section.dir_pattern)?;
            Ok(Box::new(channel))
        }
        ChannelKind::Emails => {
            let section = settings
                .email
                .as_ref()
                .ok_or_else(|| ConfigError::MissingRequired {
                    key: "email".into(),
                    hint: "the emails channel needs an email section in the settings file".into(),
                })?;
            Ok(Box::new(EmailChannel::new(section.clone())?))
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(&cli.settings)
        .with_context(|| format!("loading settings from {}", cli.settings.display()))?;

    let default_level = settings.log_level.clone().unwrap_or_else(|| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let mut source = build_channel(cli.input, &settings)?;
    let mut destination = build_channel(cli.output, &settings)?;

    // Per-message failures are logged inside the run and do not affect
    // the exit code; only settings, construction, or enumeration
    // failures exit nonzero.
    pipe_channels(source.as_mut(), destination.as_mut())?;
    Ok(())
}
