use crate::api::{soft, Connector};
use crate::client::{with_query, PlatformClient};
use crate::config::{all_present, default_timeout_secs, parse_settings, validate_common, Platform};
use crate::error::{ConnectorError, ConnectorResult};
use crate::http::headers;
use crate::models::{
    list_at, value_as_string, MediaKind, Options, Outcome, PlatformCapability, PlatformType,
    PostContent, Profile, TokenEnvelope, WriteResult,
};
use crate::oauth::{authorize_url, join_scopes, AuthorizationRequest};
use crate::ratelimit::RateLimitState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

const API_URL: &str = "https://slack.com/api";
const AUTHORIZE_URL: &str = "https://slack.com/oauth/v2/authorize";
const DEFAULT_SCOPES: &[&str] = &[
    "chat:write",
    "channels:read",
    "channels:history",
    "groups:read",
    "im:write",
    "users:read",
];
const DEFAULT_LIMIT: u64 = 100;

const CONTENT_TYPES: &[PlatformCapability] = &[
    PlatformCapability::Text,
    PlatformCapability::Image,
    PlatformCapability::File,
    PlatformCapability::Link,
];

#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub default_channel_id: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    API_URL.to_string()
}

impl SlackConfig {
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_common(Platform::Slack, self.timeout_secs, &[&self.api_url])
    }
}

pub struct SlackConnector {
    config: SlackConfig,
    client: PlatformClient,
}

impl SlackConnector {
    pub fn new(config: SlackConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let client = PlatformClient::new(Platform::Slack, config.timeout_secs)?;
        Ok(SlackConnector { config, client })
    }

    pub fn from_settings(settings: &Value) -> ConnectorResult<Self> {
        Self::new(parse_settings(Platform::Slack, settings)?)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), method)
    }

    /// Slack отвечает 200 даже на ошибки: `{"ok": false, "error": "..."}`
    fn check_ok(body: Value) -> ConnectorResult<Value> {
        if body.get("ok").and_then(Value::as_bool) == Some(false) {
            let error = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error")
                .to_string();
            return Err(ConnectorError::api(200, error));
        }
        Ok(body)
    }

    async fn call(&self, method: &str, token: &str, body: Value) -> ConnectorResult<Value> {
        debug!("Calling Slack method {}", method);
        let response = self
            .client
            .post_json(&self.method_url(method), &[headers::bearer(token)], body)
            .await?;
        Self::check_ok(response)
    }

    async fn query(
        &self,
        method: &str,
        token: &str,
        params: &[(&str, &str)],
    ) -> ConnectorResult<Value> {
        let url = with_query(&self.method_url(method), params)?;
        Self::check_ok(self.client.get(&url, &[headers::bearer(token)]).await?)
    }

    fn channel_of(&self, options: &Options) -> Option<String> {
        options
            .str("channel_id")
            .or_else(|| self.config.default_channel_id.clone())
    }

    /// Разбирает `channel:ts`; без канала берётся канал по умолчанию
    fn message_ref(&self, id: &str) -> ConnectorResult<(String, String)> {
        if let Some((channel, ts)) = id.split_once(':') {
            return Ok((channel.to_string(), ts.to_string()));
        }

        let channel = self
            .config
            .default_channel_id
            .clone()
            .ok_or_else(|| ConnectorError::config("Slack message reference needs a channel id"))?;
        Ok((channel, id.to_string()))
    }

    fn message_body(channel: &str, content: &PostContent) -> Value {
        let mut text = content.text.clone();
        if let Some(link) = &content.link {
            text.push('\n');
            text.push_str(link);
        }

        let images: Vec<Value> = content
            .media
            .iter()
            .filter(|item| item.kind == MediaKind::Image)
            .map(|item| {
                json!({
                    "type": "image",
                    "image_url": item.url,
                    "alt_text": content.title.as_deref().unwrap_or("image"),
                })
            })
            .collect();

        let mut body = json!({ "channel": channel, "text": text });
        if !images.is_empty() {
            let mut blocks = vec![json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": text },
            })];
            blocks.extend(images);
            body["blocks"] = Value::Array(blocks);
        }
        body
    }

    fn posted(response: &Value) -> ConnectorResult<(String, String)> {
        let channel = value_as_string(response.get("channel"))
            .ok_or_else(|| ConnectorError::unexpected("No channel in Slack response"))?;
        let ts = value_as_string(response.get("ts"))
            .or_else(|| value_as_string(response.pointer("/message/ts")))
            .ok_or_else(|| ConnectorError::unexpected("No ts in Slack response"))?;
        Ok((channel, ts))
    }

    fn write_result(channel: String, ts: String) -> WriteResult {
        WriteResult::published("slack", format!("{}:{}", channel, ts))
            .with_extra("channel", channel)
            .with_extra("ts", ts)
    }
}

#[async_trait]
impl Connector for SlackConnector {
    fn platform(&self) -> Platform {
        Platform::Slack
    }

    fn platform_type(&self) -> PlatformType {
        PlatformType::Messaging
    }

    fn supported_content_types(&self) -> &'static [PlatformCapability] {
        CONTENT_TYPES
    }

    fn rate_limits(&self) -> RateLimitState {
        self.client.rate_limits()
    }

    fn is_configured(&self) -> bool {
        all_present(&[&self.config.client_id, &self.config.client_secret])
    }

    fn authorization_url(
        &self,
        redirect_uri: &str,
        scopes: &[String],
    ) -> ConnectorResult<AuthorizationRequest> {
        let scope = join_scopes(scopes, DEFAULT_SCOPES, ",");
        authorize_url(
            AUTHORIZE_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("scope", scope.as_str()),
                ("redirect_uri", redirect_uri),
            ],
        )
    }

    async fn access_token(
        &self,
        code: &str,
        redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> ConnectorResult<TokenEnvelope> {
        let response = self
            .client
            .post_form(
                &self.method_url("oauth.v2.access"),
                &[],
                &[
                    ("client_id", self.config.client_id.as_str()),
                    ("client_secret", self.config.client_secret.as_str()),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                ],
            )
            .await?;
        TokenEnvelope::from_response(Self::check_ok(response)?)
    }

    async fn revoke_token(&self, access_token: &str) -> bool {
        let result = self
            .call("auth.revoke", access_token, json!({}))
            .await
            .map(|body| body.get("revoked").and_then(Value::as_bool).unwrap_or(true));
        soft(Platform::Slack, "token revocation", result, false)
    }

    async fn profile(&self, access_token: &str) -> ConnectorResult<Profile> {
        let identity = self.call("auth.test", access_token, json!({})).await?;
        let user_id = value_as_string(identity.get("user_id"))
            .ok_or_else(|| ConnectorError::unexpected("No user_id in Slack auth.test"))?;

        let raw = self
            .query("users.info", access_token, &[("user", user_id.as_str())])
            .await?;
        let mut profile = Profile::from_pointers(
            "slack",
            raw,
            "/user/id",
            "/user/real_name",
            "/user/name",
            "/user/profile/image_72",
        )?;
        profile.email = value_as_string(profile.raw.pointer("/user/profile/email"));
        Ok(profile)
    }

    async fn publish_post(
        &self,
        access_token: &str,
        content: &PostContent,
        options: &Options,
    ) -> ConnectorResult<WriteResult> {
        let Some(channel) = self.channel_of(options) else {
            return Ok(WriteResult::failure("channel_id is required"));
        };

        let response = self
            .call("chat.postMessage", access_token, Self::message_body(&channel, content))
            .await?;
        let (channel, ts) = Self::posted(&response)?;
        info!("Successfully posted to Slack channel {}: {}", channel, ts);

        Ok(Self::write_result(channel, ts))
    }

    async fn connected_accounts(&self, access_token: &str) -> ConnectorResult<Outcome<Vec<Value>>> {
        let channels = self
            .query(
                "conversations.list",
                access_token,
                &[("types", "public_channel,private_channel"), ("exclude_archived", "true")],
            )
            .await?;
        Ok(Outcome::Done(list_at(&channels, "/channels")))
    }

    async fn schedule_post(
        &self,
        access_token: &str,
        content: &PostContent,
        publish_at: DateTime<Utc>,
        options: &Options,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let Some(channel) = self.channel_of(options) else {
            return Ok(Outcome::Done(WriteResult::failure("channel_id is required")));
        };
        if publish_at <= Utc::now() {
            return Ok(Outcome::Done(WriteResult::failure("Scheduled time must be in the future")));
        }

        let mut body = Self::message_body(&channel, content);
        body["post_at"] = json!(publish_at.timestamp());
        let response = self.call("chat.scheduleMessage", access_token, body).await?;

        let scheduled_id = value_as_string(response.get("scheduled_message_id"))
            .ok_or_else(|| {
                ConnectorError::unexpected("No scheduled_message_id in Slack response")
            })?;
        info!("Scheduled Slack message {} for {}", scheduled_id, publish_at);

        Ok(Outcome::Done(
            WriteResult::published("slack", scheduled_id)
                .with_extra("channel", channel)
                .with_extra("scheduled_at", publish_at.to_rfc3339()),
        ))
    }

    async fn messages(
        &self,
        access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let Some(channel) = self.channel_of(options) else {
            return Err(ConnectorError::config("channel_id is required to read Slack messages"));
        };
        let limit = options.u64("limit").unwrap_or(DEFAULT_LIMIT).to_string();

        let history = self
            .query(
                "conversations.history",
                access_token,
                &[("channel", channel.as_str()), ("limit", limit.as_str())],
            )
            .await?;
        Ok(Outcome::Done(list_at(&history, "/messages")))
    }

    async fn send_message(
        &self,
        access_token: &str,
        recipient: &str,
        text: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let conversation = self
            .call("conversations.open", access_token, json!({ "users": recipient }))
            .await?;
        let channel = value_as_string(conversation.pointer("/channel/id"))
            .ok_or_else(|| ConnectorError::unexpected("No DM channel in Slack response"))?;

        let response = self
            .call("chat.postMessage", access_token, json!({ "channel": channel, "text": text }))
            .await?;
        let (channel, ts) = Self::posted(&response)?;

        Ok(Outcome::Done(
            WriteResult::sent("slack", format!("{}:{}", channel, ts))
                .with_extra("channel", channel),
        ))
    }

    async fn delete_post(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<bool>> {
        let result = match self.message_ref(post_id) {
            Ok((channel, ts)) => self
                .call("chat.delete", access_token, json!({ "channel": channel, "ts": ts }))
                .await
                .map(|_| true),
            Err(e) => Err(e),
        };
        Ok(Outcome::Done(soft(Platform::Slack, "delete", result, false)))
    }

    async fn comments(
        &self,
        access_token: &str,
        post_id: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let (channel, ts) = self.message_ref(post_id)?;
        let replies = self
            .query(
                "conversations.replies",
                access_token,
                &[("channel", channel.as_str()), ("ts", ts.as_str())],
            )
            .await?;

        // Первое сообщение ветки: сам пост
        let thread = list_at(&replies, "/messages").into_iter().skip(1).collect();
        Ok(Outcome::Done(thread))
    }

    async fn reply_to_comment(
        &self,
        access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let (channel, thread_ts) = self.message_ref(comment_id)?;
        let response = self
            .call(
                "chat.postMessage",
                access_token,
                json!({ "channel": channel, "text": text, "thread_ts": thread_ts }),
            )
            .await?;
        let (channel, ts) = Self::posted(&response)?;

        Ok(Outcome::Done(Self::write_result(channel, ts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaItem;

    fn connector() -> SlackConnector {
        SlackConnector::from_settings(&json!({
            "client_id": "cid",
            "client_secret": "secret",
            "default_channel_id": "C1"
        }))
        .unwrap()
    }

    #[test]
    fn ok_false_becomes_api_error() {
        let err = SlackConnector::check_ok(json!({"ok": false, "error": "channel_not_found"}))
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectorError::Api { code: 200, ref message } if message == "channel_not_found"
        ));
        assert!(SlackConnector::check_ok(json!({"ok": true, "ts": "1.2"})).is_ok());
    }

    #[test]
    fn message_refs_split_on_channel() {
        let slack = connector();
        assert_eq!(
            slack.message_ref("C9:1700000000.000100").unwrap(),
            ("C9".to_string(), "1700000000.000100".to_string())
        );
        assert_eq!(slack.message_ref("1.2").unwrap(), ("C1".to_string(), "1.2".to_string()));
    }

    #[test]
    fn images_become_blocks() {
        let content = PostContent::text("release notes")
            .with_media(MediaItem::image("https://img/1.png"))
            .with_link("https://example.com");
        let body = SlackConnector::message_body("C1", &content);

        assert_eq!(body["text"], "release notes\nhttps://example.com");
        assert_eq!(body["blocks"][0]["type"], "section");
        assert_eq!(body["blocks"][1]["image_url"], "https://img/1.png");
    }

    #[tokio::test]
    async fn past_schedule_is_rejected() {
        let outcome = connector()
            .schedule_post(
                "t",
                &PostContent::text("late"),
                Utc::now() - chrono::Duration::minutes(5),
                &Options::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome.into_write_result().error.as_deref(),
            Some("Scheduled time must be in the future")
        );
    }
}
