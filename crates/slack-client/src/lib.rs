//! Slack delivery client.
//!
//! Two delivery paths, mirroring what the CLI needs:
//!
//! - [`Client::post_text`]: JSON POST to an Incoming Webhook URL.
//! - [`Client::post_file`]: the three-step external upload flow
//!   (`files.getUploadURLExternal`, raw multipart upload,
//!   `files.completeUploadExternal`), which requires a bot token.
//!
//! The client carries no retry policy; a failed call surfaces as an [`Error`]
//! and the caller decides.

use reqwest::{Client as HttpClient, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_API_BASE: &str = "https://slack.com/api/";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("client: missing webhook url")]
    MissingWebhookUrl,
    #[error("failed to parse url: {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("provide Slack token")]
    MissingToken,
    #[error("provide filename")]
    MissingFilename,
    #[error("provide non-empty file content")]
    EmptyContent,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("status code: {status}; body: {body}")]
    Status { status: StatusCode, body: String },
    #[error("slack api call failed; body: {body}")]
    Api { body: String },
    #[error("response returned from slack is not json; body: {body}")]
    Json {
        body: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Payload for an Incoming Webhook post. Channel, username and icon are
/// ignored by webhooks created after Slack deprecated per-request overrides,
/// but older webhooks still honor them.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PostTextParam {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_emoji: Option<String>,
    pub text: String,
}

/// Parameters for a file upload.
#[derive(Debug, Default, Clone)]
pub struct PostFileParam {
    /// Channel to share the finished upload into. Optional; without it the
    /// file lands in the uploader's own space.
    pub channel_id: Option<String>,
    pub filename: String,
    /// Slack `snippet_type` hint, e.g. `text` or `diff`.
    pub snippet_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetUploadUrlRes {
    ok: bool,
    #[serde(default)]
    upload_url: String,
    #[serde(default)]
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct CompleteUploadRes {
    ok: bool,
}

pub struct Client {
    webhook_url: Option<Url>,
    token: Option<String>,
    api_base: Url,
    http: HttpClient,
}

impl Client {
    /// Client for webhook text posts. `webhook_url` must be a valid absolute URL.
    pub fn new(webhook_url: &str) -> Result<Self, Error> {
        if webhook_url.is_empty() {
            return Err(Error::MissingWebhookUrl);
        }
        let url = parse_url(webhook_url)?;

        Ok(Self {
            webhook_url: Some(url),
            token: None,
            api_base: default_api_base(),
            http: HttpClient::new(),
        })
    }

    /// Upload-only client; no webhook URL involved.
    pub fn for_upload(token: &str) -> Result<Self, Error> {
        if token.is_empty() {
            return Err(Error::MissingToken);
        }

        Ok(Self {
            webhook_url: None,
            token: Some(token.to_string()),
            api_base: default_api_base(),
            http: HttpClient::new(),
        })
    }

    /// Overrides the `slack.com/api/` base. Intended for tests.
    pub fn with_api_base(mut self, base: Url) -> Self {
        self.api_base = base;
        self
    }

    /// Posts `param.text` to the webhook. Posting the empty string is a no-op,
    /// so interval flushes with nothing buffered cost nothing.
    pub async fn post_text(&self, param: &PostTextParam) -> Result<(), Error> {
        if param.text.is_empty() {
            return Ok(());
        }

        let url = self.webhook_url.as_ref().ok_or(Error::MissingWebhookUrl)?;
        let res = self.http.post(url.clone()).json(param).send().await?;
        check_status(res).await?;

        Ok(())
    }

    /// Uploads `content` as `param.filename` and shares it, running the full
    /// three-step external upload flow.
    pub async fn post_file(&self, param: &PostFileParam, content: &[u8]) -> Result<(), Error> {
        if param.filename.is_empty() {
            return Err(Error::MissingFilename);
        }
        if content.is_empty() {
            return Err(Error::EmptyContent);
        }

        let (upload_url, file_id) = self
            .get_upload_url(&param.filename, content.len(), param.snippet_type.as_deref())
            .await?;
        debug!(file_id = %file_id, "upload slot acquired");

        self.upload_to_url(&upload_url, &param.filename, content)
            .await?;
        debug!(file_id = %file_id, "file content uploaded");

        self.complete_upload(&file_id, &param.filename, param.channel_id.as_deref())
            .await?;
        debug!(file_id = %file_id, "upload completed");

        Ok(())
    }

    async fn get_upload_url(
        &self,
        filename: &str,
        length: usize,
        snippet_type: Option<&str>,
    ) -> Result<(String, String), Error> {
        let token = self.token.as_ref().ok_or(Error::MissingToken)?;

        let mut form = vec![
            ("filename".to_string(), filename.to_string()),
            ("length".to_string(), length.to_string()),
        ];
        if let Some(snippet_type) = snippet_type {
            form.push(("snippet_type".to_string(), snippet_type.to_string()));
        }

        let res = self
            .http
            .post(self.endpoint("files.getUploadURLExternal")?)
            .bearer_auth(token)
            .form(&form)
            .send()
            .await?;
        let body = check_status(res).await?;

        let parsed: GetUploadUrlRes = parse_json(&body)?;
        if !parsed.ok {
            return Err(Error::Api { body });
        }

        Ok((parsed.upload_url, parsed.file_id))
    }

    async fn upload_to_url(
        &self,
        upload_url: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<(), Error> {
        let part = reqwest::multipart::Part::bytes(content.to_vec()).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let res = self
            .http
            .post(parse_url(upload_url)?)
            .multipart(form)
            .send()
            .await?;
        check_status(res).await?;

        Ok(())
    }

    async fn complete_upload(
        &self,
        file_id: &str,
        title: &str,
        channel_id: Option<&str>,
    ) -> Result<(), Error> {
        let token = self.token.as_ref().ok_or(Error::MissingToken)?;

        let files = serde_json::json!([{ "id": file_id, "title": title }]).to_string();
        let mut form = vec![("files".to_string(), files)];
        if let Some(channel_id) = channel_id {
            form.push(("channel_id".to_string(), channel_id.to_string()));
        }

        let res = self
            .http
            .post(self.endpoint("files.completeUploadExternal")?)
            .bearer_auth(token)
            .form(&form)
            .send()
            .await?;
        let body = check_status(res).await?;

        let parsed: CompleteUploadRes = parse_json(&body)?;
        if !parsed.ok {
            return Err(Error::Api { body });
        }

        Ok(())
    }

    fn endpoint(&self, method: &str) -> Result<Url, Error> {
        self.api_base.join(method).map_err(|err| Error::InvalidUrl {
            url: format!("{}{method}", self.api_base),
            reason: err.to_string(),
        })
    }
}

fn default_api_base() -> Url {
    match Url::parse(DEFAULT_API_BASE) {
        Ok(url) => url,
        // The literal is a valid absolute URL.
        Err(_) => unreachable!("default api base must parse"),
    }
}

fn parse_url(raw: &str) -> Result<Url, Error> {
    Url::parse(raw).map_err(|err| Error::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })
}

async fn check_status(res: reqwest::Response) -> Result<String, Error> {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();

    if !status.is_success() {
        return Err(Error::Status { status, body });
    }

    Ok(body)
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, Error> {
    serde_json::from_str(body).map_err(|source| Error::Json {
        body: body.to_string(),
        source,
    })
}
