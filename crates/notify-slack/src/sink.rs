//! Adapter from the Slack client to the throttle's delivery seam.

use async_trait::async_trait;
use slack_client::{Client, PostTextParam};
use throttle::Sink;

use crate::config::Settings;

/// Posts every batch as one webhook message. The final batch goes through the
/// same path; the client already skips empty text.
pub struct SlackSink {
    client: Client,
    param: PostTextParam,
}

impl SlackSink {
    pub fn new(client: Client, settings: &Settings) -> Self {
        Self {
            client,
            param: PostTextParam {
                channel: settings.channel.clone(),
                username: settings.username.clone(),
                icon_emoji: settings.icon_emoji.clone(),
                text: String::new(),
            },
        }
    }

    async fn post(&self, text: &str) -> anyhow::Result<()> {
        let mut param = self.param.clone();
        param.text = text.to_string();
        self.client.post_text(&param).await?;
        Ok(())
    }
}

#[async_trait]
impl Sink for SlackSink {
    async fn flush(&self, text: &str) -> anyhow::Result<()> {
        self.post(text).await
    }

    async fn finalize(&self, text: &str) -> anyhow::Result<()> {
        self.post(text).await
    }
}
