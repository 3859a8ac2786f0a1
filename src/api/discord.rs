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
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

const API_URL: &str = "https://discord.com/api/v10";
const AUTHORIZE_URL: &str = "https://discord.com/oauth2/authorize";
const CDN_URL: &str = "https://cdn.discordapp.com";
const DEFAULT_SCOPES: &[&str] = &["identify", "guilds"];
const DEFAULT_MESSAGE_LIMIT: u64 = 50;

const CONTENT_TYPES: &[PlatformCapability] = &[
    PlatformCapability::Text,
    PlatformCapability::Image,
    PlatformCapability::Video,
    PlatformCapability::Embed,
    PlatformCapability::File,
];

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub client_id: String,
    pub client_secret: String,
    pub bot_token: String,
    /// Канал по умолчанию для публикаций и удаления
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

impl DiscordConfig {
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_common(Platform::Discord, self.timeout_secs, &[&self.api_url])
    }
}

pub struct DiscordConnector {
    config: DiscordConfig,
    client: PlatformClient,
}

impl DiscordConnector {
    pub fn new(config: DiscordConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let client = PlatformClient::new(Platform::Discord, config.timeout_secs)?;
        Ok(DiscordConnector { config, client })
    }

    pub fn from_settings(settings: &Value) -> ConnectorResult<Self> {
        Self::new(parse_settings(Platform::Discord, settings)?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Токен бота без префикса "Bot ", если его вставили целиком
    fn bot_headers(&self) -> Vec<String> {
        let token = self
            .config
            .bot_token
            .strip_prefix("Bot ")
            .unwrap_or(&self.config.bot_token);
        vec![headers::bot(token)]
    }

    /// Разбирает `channel:message`; без канала берётся канал по умолчанию
    fn message_ref(&self, id: &str) -> ConnectorResult<(String, String)> {
        if let Some((channel, message)) = id.split_once(':') {
            return Ok((channel.to_string(), message.to_string()));
        }

        let channel = self
            .config
            .default_channel_id
            .clone()
            .ok_or_else(|| ConnectorError::config("Discord message reference needs a channel id"))?;
        Ok((channel, id.to_string()))
    }

    async fn post_message(&self, channel_id: &str, body: Value) -> ConnectorResult<String> {
        let response = self
            .client
            .post_json(
                &self.endpoint(&format!("/channels/{}/messages", channel_id)),
                &self.bot_headers(),
                body,
            )
            .await?;

        value_as_string(response.get("id"))
            .ok_or_else(|| ConnectorError::unexpected("No message id in Discord response"))
    }

    async fn oauth_token(&self, params: &[(&str, &str)]) -> ConnectorResult<TokenEnvelope> {
        let mut form = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        let response = self
            .client
            .post_form(&self.endpoint("/oauth2/token"), &[], &form)
            .await?;
        TokenEnvelope::from_response(response)
    }

    fn message_body(content: &PostContent) -> Value {
        let mut text = content.text.clone();
        let mut embeds = Vec::new();

        for item in &content.media {
            match item.kind {
                MediaKind::Image => embeds.push(json!({ "image": { "url": item.url } })),
                // Видео и файлы Discord разворачивает сам по ссылке
                MediaKind::Video | MediaKind::Document => {
                    text.push('\n');
                    text.push_str(&item.url);
                }
            }
        }

        if let Some(link) = &content.link {
            let mut embed = json!({ "url": link });
            if let Some(title) = &content.title {
                embed["title"] = Value::String(title.clone());
            }
            embeds.push(embed);
        }

        let mut body = json!({ "content": text });
        if !embeds.is_empty() {
            body["embeds"] = Value::Array(embeds);
        }
        body
    }
}

#[async_trait]
impl Connector for DiscordConnector {
    fn platform(&self) -> Platform {
        Platform::Discord
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
        all_present(&[&self.config.client_id, &self.config.client_secret, &self.config.bot_token])
    }

    fn authorization_url(
        &self,
        redirect_uri: &str,
        scopes: &[String],
    ) -> ConnectorResult<AuthorizationRequest> {
        let scope = join_scopes(scopes, DEFAULT_SCOPES, " ");
        authorize_url(
            AUTHORIZE_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
            ],
        )
    }

    async fn access_token(
        &self,
        code: &str,
        redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> ConnectorResult<TokenEnvelope> {
        debug!("Exchanging Discord authorization code");
        self.oauth_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> ConnectorResult<TokenEnvelope> {
        self.oauth_token(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await
    }

    async fn revoke_token(&self, access_token: &str) -> bool {
        let result = self
            .client
            .post_form(
                &self.endpoint("/oauth2/token/revoke"),
                &[],
                &[
                    ("client_id", self.config.client_id.as_str()),
                    ("client_secret", self.config.client_secret.as_str()),
                    ("token", access_token),
                ],
            )
            .await
            .map(|_| true);
        soft(Platform::Discord, "token revocation", result, false)
    }

    async fn profile(&self, access_token: &str) -> ConnectorResult<Profile> {
        let raw = self
            .client
            .get(&self.endpoint("/users/@me"), &[headers::bearer(access_token)])
            .await?;

        let mut profile =
            Profile::from_pointers("discord", raw, "/id", "/global_name", "/username", "/avatar")?;
        profile.email = value_as_string(profile.raw.get("email"));
        profile.avatar_url = profile
            .avatar_url
            .map(|hash| format!("{}/avatars/{}/{}.png", CDN_URL, profile.id, hash));
        Ok(profile)
    }

    async fn publish_post(
        &self,
        _access_token: &str,
        content: &PostContent,
        options: &Options,
    ) -> ConnectorResult<WriteResult> {
        let Some(channel_id) = options
            .str("channel_id")
            .or_else(|| self.config.default_channel_id.clone())
        else {
            return Ok(WriteResult::failure("channel_id is required"));
        };

        let message_id = self.post_message(&channel_id, Self::message_body(content)).await?;
        info!("Successfully posted to Discord channel {}: {}", channel_id, message_id);

        Ok(WriteResult::published("discord", message_id).with_extra("channel_id", channel_id))
    }

    async fn connected_accounts(&self, access_token: &str) -> ConnectorResult<Outcome<Vec<Value>>> {
        let guilds = self
            .client
            .get(&self.endpoint("/users/@me/guilds"), &[headers::bearer(access_token)])
            .await?;
        Ok(Outcome::Done(list_at(&guilds, "")))
    }

    async fn messages(
        &self,
        _access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let Some(channel_id) = options
            .str("channel_id")
            .or_else(|| self.config.default_channel_id.clone())
        else {
            return Err(ConnectorError::config("channel_id is required to read Discord messages"));
        };
        let limit = options.u64("limit").unwrap_or(DEFAULT_MESSAGE_LIMIT).to_string();

        let url = with_query(
            &self.endpoint(&format!("/channels/{}/messages", channel_id)),
            &[("limit", limit.as_str())],
        )?;
        let messages = self.client.get(&url, &self.bot_headers()).await?;
        Ok(Outcome::Done(list_at(&messages, "")))
    }

    async fn send_message(
        &self,
        _access_token: &str,
        recipient: &str,
        text: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        // Личный канал открывается заново при каждом сообщении
        let channel = self
            .client
            .post_json(
                &self.endpoint("/users/@me/channels"),
                &self.bot_headers(),
                json!({ "recipient_id": recipient }),
            )
            .await?;
        let channel_id = value_as_string(channel.get("id"))
            .ok_or_else(|| ConnectorError::unexpected("No DM channel id in Discord response"))?;

        let message_id = self.post_message(&channel_id, json!({ "content": text })).await?;
        info!("Sent Discord direct message {} to {}", message_id, recipient);

        Ok(Outcome::Done(
            WriteResult::sent("discord", message_id).with_extra("channel_id", channel_id),
        ))
    }

    async fn delete_post(
        &self,
        _access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<bool>> {
        let result = match self.message_ref(post_id) {
            Ok((channel_id, message_id)) => self
                .client
                .delete(
                    &self.endpoint(&format!("/channels/{}/messages/{}", channel_id, message_id)),
                    &self.bot_headers(),
                )
                .await
                .map(|_| true),
            Err(e) => Err(e),
        };
        Ok(Outcome::Done(soft(Platform::Discord, "delete", result, false)))
    }

    async fn reply_to_comment(
        &self,
        _access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let (channel_id, message_id) = self.message_ref(comment_id)?;
        let reply_id = self
            .post_message(
                &channel_id,
                json!({
                    "content": text,
                    "message_reference": { "message_id": message_id },
                }),
            )
            .await?;

        Ok(Outcome::Done(
            WriteResult::published("discord", reply_id).with_extra("channel_id", channel_id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaItem;

    fn connector() -> DiscordConnector {
        DiscordConnector::from_settings(&json!({
            "client_id": "cid",
            "client_secret": "secret",
            "bot_token": "Bot tok",
            "default_channel_id": "c1"
        }))
        .unwrap()
    }

    #[test]
    fn message_body_turns_images_into_embeds() {
        let content = PostContent::text("hi")
            .with_media(MediaItem::image("https://img/1.png"))
            .with_media(MediaItem::video("https://vid/1.mp4"))
            .with_link("https://example.com")
            .with_title("Example");

        let body = DiscordConnector::message_body(&content);
        assert_eq!(body["content"], "hi\nhttps://vid/1.mp4");
        assert_eq!(body["embeds"][0]["image"]["url"], "https://img/1.png");
        assert_eq!(body["embeds"][1]["title"], "Example");
    }

    #[test]
    fn message_refs_fall_back_to_default_channel() {
        let discord = connector();
        assert_eq!(discord.message_ref("c9:m1").unwrap(), ("c9".to_string(), "m1".to_string()));
        assert_eq!(discord.message_ref("m2").unwrap(), ("c1".to_string(), "m2".to_string()));
    }

    #[test]
    fn bot_prefix_is_not_doubled() {
        assert_eq!(connector().bot_headers(), vec!["Authorization: Bot tok".to_string()]);
    }

    #[test]
    fn empty_credentials_mean_not_configured() {
        let discord = DiscordConnector::from_settings(&json!({
            "client_id": "",
            "client_secret": "s",
            "bot_token": "t"
        }))
        .unwrap();
        assert!(!discord.is_configured());
        assert!(connector().is_configured());
    }
}
