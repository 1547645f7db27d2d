//! TOML config loading and option merging.
//!
//! Command-line flags win, then environment variables (both handled by clap),
//! then the config file. The file is discovered at `~/.notify_slack.toml`,
//! `~/etc/notify_slack.toml` or `/etc/notify_slack.toml` unless `-c` names one
//! explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use crate::cli::Args;

const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Fully merged options for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub slack_url: Option<String>,
    pub token: Option<String>,
    pub channel: Option<String>,
    pub channel_id: Option<String>,
    pub username: Option<String>,
    pub icon_emoji: Option<String>,
    pub interval: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    slack: SlackSection,
}

#[derive(Debug, Default, Deserialize)]
struct SlackSection {
    url: Option<String>,
    token: Option<String>,
    channel: Option<String>,
    channel_id: Option<String>,
    username: Option<String>,
    icon_emoji: Option<String>,
    interval_ms: Option<u64>,
    // Removed upstream; kept only to reject configs that still carry it.
    snippet_channel: Option<String>,
}

impl Settings {
    /// Builds the effective settings for `args`, reading the config file if
    /// one is found.
    pub fn resolve(args: &Args) -> Result<Self> {
        let file = match discover(args.config.as_deref()) {
            Some(path) => load(&path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(args, file))
    }

    fn merge(args: &Args, file: FileConfig) -> Self {
        let slack = file.slack;
        let interval_ms = args
            .interval
            .or(slack.interval_ms)
            .unwrap_or(DEFAULT_INTERVAL_MS);

        Self {
            slack_url: args.slack_url.clone().or(slack.url),
            token: args.token.clone().or(slack.token),
            channel: args.channel.clone().or(slack.channel),
            channel_id: args.channel_id.clone().or(slack.channel_id),
            username: args.username.clone().or(slack.username),
            icon_emoji: args.icon_emoji.clone().or(slack.icon_emoji),
            interval: Duration::from_millis(interval_ms),
        }
    }
}

fn load(path: &Path) -> Result<FileConfig> {
    debug!(path = %path.display(), "loading config file");
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    if config.slack.snippet_channel.is_some() {
        bail!("the snippet_channel option is deprecated; use channel_id");
    }

    Ok(config)
}

fn discover(explicit: Option<&Path>) -> Option<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    discover_from(explicit, home.as_deref())
}

fn discover_from(explicit: Option<&Path>, home: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Some(home) = home {
        for candidate in [
            home.join(".notify_slack.toml"),
            home.join("etc/notify_slack.toml"),
        ] {
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    let system = PathBuf::from("/etc/notify_slack.toml");
    system.is_file().then_some(system)
}
