//! notify-slack - Slack Notification Pipe
//!
//! Streams stdin to a Slack Incoming Webhook, batching lines on an interval
//! so a chatty command does not turn into one message per line. Also uploads
//! files or piped snippets through the Slack file upload API.
//!
//! # Usage
//!
//! ```bash
//! # Batch a long-running command's output into one message per second
//! ./run-batch.sh | notify-slack
//!
//! # Slower cadence, explicit webhook
//! tail -f app.log | notify-slack --slack-url https://hooks.slack.com/... --interval 10000
//!
//! # Upload a file as a snippet (requires a bot token)
//! notify-slack result.log
//!
//! # Upload piped output as a snippet
//! make test | notify-slack --snippet --filename result.log
//! ```

use clap::Parser;

mod cli;
mod config;
mod sink;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();

    if let Err(err) = cli::run(args).await {
        eprintln!("notify-slack: {err:#}");
        std::process::exit(1);
    }
}
