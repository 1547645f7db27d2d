//! Argument parsing and the two run modes: stream stdin to the webhook, or
//! upload a file/snippet through the Slack API.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use slack_client::{Client, PostFileParam};
use throttle::Throttle;
use tokio::io::AsyncReadExt;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::sink::SlackSink;

/// Slack notification pipe.
#[derive(Parser, Debug)]
#[command(name = "notify-slack", version)]
#[command(about = "Posts piped stdin to Slack, batched on an interval")]
pub struct Args {
    /// File to upload instead of streaming stdin.
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Slack Incoming Webhook URL.
    #[arg(long = "slack-url", env = "NOTIFY_SLACK_WEBHOOK_URL")]
    pub slack_url: Option<String>,

    /// Bot token (required for uploading files).
    #[arg(long, env = "NOTIFY_SLACK_TOKEN")]
    pub token: Option<String>,

    /// Channel to post to (ignored by newer Incoming Webhooks).
    #[arg(long, env = "NOTIFY_SLACK_CHANNEL")]
    pub channel: Option<String>,

    /// Channel id to share an uploaded file into.
    #[arg(long = "channel-id", env = "NOTIFY_SLACK_CHANNEL_ID")]
    pub channel_id: Option<String>,

    /// Username to post as (ignored by newer Incoming Webhooks).
    #[arg(long, env = "NOTIFY_SLACK_USERNAME")]
    pub username: Option<String>,

    /// Icon emoji to post with (ignored by newer Incoming Webhooks).
    #[arg(long = "icon-emoji", env = "NOTIFY_SLACK_ICON_EMOJI")]
    pub icon_emoji: Option<String>,

    /// Flush interval in milliseconds.
    #[arg(long, env = "NOTIFY_SLACK_INTERVAL_MS")]
    pub interval: Option<u64>,

    /// Config file (default: ~/.notify_slack.toml, ~/etc/notify_slack.toml,
    /// /etc/notify_slack.toml).
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Name for the uploaded file (defaults to the source file name).
    #[arg(long)]
    pub filename: Option<String>,

    /// Snippet type hint for uploads, e.g. "text" or "diff".
    #[arg(long)]
    pub filetype: Option<String>,

    /// Upload piped stdin as a snippet instead of streaming it.
    #[arg(long)]
    pub snippet: bool,

    /// Verbose logging to stderr.
    #[arg(long)]
    pub debug: bool,
}

pub async fn run(args: Args) -> Result<()> {
    init_tracing(args.debug);

    let settings = Settings::resolve(&args)?;

    if args.file.is_some() || args.snippet {
        upload(&args, &settings).await
    } else {
        stream(&settings).await
    }
}

/// Streams stdin to the webhook, echoing it to stdout like tee(1).
async fn stream(settings: &Settings) -> Result<()> {
    let url = settings
        .slack_url
        .as_deref()
        .ok_or_else(|| anyhow!("must specify Slack URL"))?;

    if std::io::stdin().is_terminal() {
        return Err(anyhow!("no input: pipe something into notify-slack"));
    }

    let client = Client::new(url)?;
    let sink = SlackSink::new(client, settings);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    watch_signals(cancel_tx)?;

    Throttle::with_echo(tokio::io::stdin(), tokio::io::stdout())
        .run(settings.interval, cancel_rx, &sink)
        .await?;

    Ok(())
}

/// Uploads a file, or stdin when no file is given.
async fn upload(args: &Args, settings: &Settings) -> Result<()> {
    let token = settings
        .token
        .as_deref()
        .ok_or_else(|| anyhow!("must specify Slack token for uploading a file"))?;
    let client = Client::for_upload(token)?;

    let content = match &args.file {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("can't read {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .context("failed to read stdin")?;
            buf
        }
    };

    let filename = args
        .filename
        .clone()
        .or_else(|| {
            args.file
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
        })
        .ok_or_else(|| anyhow!("must specify --filename when uploading stdin"))?;

    let param = PostFileParam {
        channel_id: settings.channel_id.clone(),
        filename,
        snippet_type: args.filetype.clone(),
    };
    client.post_file(&param, &content).await?;

    Ok(())
}

/// Flips the cancellation channel on SIGTERM or SIGINT.
fn watch_signals(cancel: watch::Sender<bool>) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        let _ = cancel.send(true);
    });

    Ok(())
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}
