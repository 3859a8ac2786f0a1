use crate::api::{soft, Connector};
use crate::client::{with_query, PlatformClient};
use crate::config::{all_present, default_timeout_secs, parse_settings, validate_common, Platform};
use crate::error::{ConnectorError, ConnectorResult};
use crate::http::headers;
use crate::models::{
    list_at, object_of, value_as_string, MediaItem, Options, Outcome, Payload, PlatformCapability,
    PlatformType, PostContent, Profile, TokenEnvelope, Unsupported, WriteResult,
};
use crate::oauth::{authorize_url_with_pkce, join_scopes, AuthorizationRequest};
use crate::ratelimit::RateLimitState;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

const API_URL: &str = "https://api.twitter.com";
const AUTHORIZE_URL: &str = "https://twitter.com/i/oauth2/authorize";
const STATUS_URL: &str = "https://twitter.com/i/web/status";
const DEFAULT_SCOPES: &[&str] = &[
    "tweet.read",
    "tweet.write",
    "users.read",
    "offline.access",
    "dm.read",
    "dm.write",
];
const MEDIA_UNSUPPORTED: &str =
    "Twitter media upload requires OAuth 1.0a user context, which is not supported";

const CONTENT_TYPES: &[PlatformCapability] = &[
    PlatformCapability::Text,
    PlatformCapability::Link,
    PlatformCapability::Poll,
];

#[derive(Debug, Clone, Deserialize)]
pub struct TwitterConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    API_URL.to_string()
}

impl TwitterConfig {
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_common(Platform::Twitter, self.timeout_secs, &[&self.api_url])
    }
}

pub struct TwitterConnector {
    config: TwitterConfig,
    client: PlatformClient,
}

impl TwitterConnector {
    pub fn new(config: TwitterConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let client = PlatformClient::new(Platform::Twitter, config.timeout_secs)?;
        Ok(TwitterConnector { config, client })
    }

    pub fn from_settings(settings: &Value) -> ConnectorResult<Self> {
        Self::new(parse_settings(Platform::Twitter, settings)?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn app_auth(&self) -> String {
        headers::basic(&self.config.client_id, &self.config.client_secret)
    }

    async fn oauth_token(&self, params: &[(&str, &str)]) -> ConnectorResult<TokenEnvelope> {
        let mut form = params.to_vec();
        form.push(("client_id", self.config.client_id.as_str()));

        let response = self
            .client
            .post_form(&self.endpoint("/2/oauth2/token"), &[self.app_auth()], &form)
            .await?;
        TokenEnvelope::from_response(response)
    }

    /// Загрузка медиа в v1.1 требует подписи OAuth 1.0a
    pub async fn upload_media(
        &self,
        _access_token: &str,
        media: &MediaItem,
    ) -> ConnectorResult<Outcome<String>> {
        warn!("Skipping Twitter media upload for {}: {}", media.url, MEDIA_UNSUPPORTED);
        Ok(Outcome::Unsupported(Unsupported::Platform(MEDIA_UNSUPPORTED)))
    }

    fn tweet_body(content: &PostContent, options: &Options) -> Value {
        let text = match &content.link {
            Some(link) if !content.text.contains(link.as_str()) => {
                format!("{} {}", content.text, link)
            }
            _ => content.text.clone(),
        };

        let mut body = json!({ "text": text });
        if let Some(poll) = &content.poll {
            body["poll"] = json!({
                "options": poll.options,
                "duration_minutes": poll.duration_minutes,
            });
        }
        if let Some(reply_to) = options.str("reply_to") {
            body["reply"] = json!({ "in_reply_to_tweet_id": reply_to });
        }
        body
    }

    async fn create_tweet(&self, token: &str, body: Value) -> ConnectorResult<String> {
        let response = self
            .client
            .post_json(&self.endpoint("/2/tweets"), &[headers::bearer(token)], body)
            .await?;
        value_as_string(response.pointer("/data/id"))
            .ok_or_else(|| ConnectorError::unexpected("No tweet id in Twitter response"))
    }

    async fn public_metrics(&self, token: &str, path: &str) -> ConnectorResult<Payload> {
        let url = with_query(
            &self.endpoint(path),
            &[("tweet.fields", "public_metrics"), ("user.fields", "public_metrics")],
        )?;
        let body = self.client.get(&url, &[headers::bearer(token)]).await?;
        Ok(body
            .pointer("/data/public_metrics")
            .cloned()
            .map(object_of)
            .unwrap_or_default())
    }
}

#[async_trait]
impl Connector for TwitterConnector {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    fn platform_type(&self) -> PlatformType {
        PlatformType::Social
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
        let scope = join_scopes(scopes, DEFAULT_SCOPES, " ");
        authorize_url_with_pkce(
            AUTHORIZE_URL,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", scope.as_str()),
            ],
        )
    }

    async fn access_token(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> ConnectorResult<TokenEnvelope> {
        let Some(verifier) = code_verifier else {
            return Err(ConnectorError::Config(
                "Twitter token exchange requires the PKCE code_verifier".to_string(),
            ));
        };
        self.oauth_token(&[
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier),
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
                &self.endpoint("/2/oauth2/revoke"),
                &[self.app_auth()],
                &[("token", access_token), ("token_type_hint", "access_token")],
            )
            .await
            .map(|_| true);
        soft(Platform::Twitter, "token revocation", result, false)
    }

    async fn profile(&self, access_token: &str) -> ConnectorResult<Profile> {
        let url = with_query(
            &self.endpoint("/2/users/me"),
            &[("user.fields", "profile_image_url,name,username")],
        )?;
        let raw = self.client.get(&url, &[headers::bearer(access_token)]).await?;
        Profile::from_pointers(
            "twitter",
            raw,
            "/data/id",
            "/data/name",
            "/data/username",
            "/data/profile_image_url",
        )
    }

    async fn publish_post(
        &self,
        access_token: &str,
        content: &PostContent,
        options: &Options,
    ) -> ConnectorResult<WriteResult> {
        // Медиа не отбрасываются молча: пост с ними не публикуется
        for item in &content.media {
            if let Outcome::Unsupported(reason) = self.upload_media(access_token, item).await? {
                return Ok(WriteResult::failure(reason.message()));
            }
        }

        let tweet_id = self
            .create_tweet(access_token, Self::tweet_body(content, options))
            .await?;
        info!("Successfully posted tweet: {}", tweet_id);

        let url = format!("{}/{}", STATUS_URL, tweet_id);
        Ok(WriteResult::published("twitter", tweet_id).with_url(url))
    }

    async fn messages(
        &self,
        access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let limit = options.u64("limit").unwrap_or(50).to_string();
        let url = with_query(
            &self.endpoint("/2/dm_events"),
            &[
                ("dm_event.fields", "id,text,sender_id,created_at,dm_conversation_id"),
                ("max_results", limit.as_str()),
            ],
        )?;
        let events = self.client.get(&url, &[headers::bearer(access_token)]).await?;
        Ok(Outcome::Done(list_at(&events, "/data")))
    }

    async fn send_message(
        &self,
        access_token: &str,
        recipient: &str,
        text: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let response = self
            .client
            .post_json(
                &self.endpoint(&format!("/2/dm_conversations/with/{}/messages", recipient)),
                &[headers::bearer(access_token)],
                json!({ "text": text }),
            )
            .await?;

        let event_id = value_as_string(response.pointer("/data/dm_event_id"))
            .ok_or_else(|| ConnectorError::unexpected("No dm_event_id in Twitter response"))?;
        let mut result = WriteResult::sent("twitter", event_id);
        if let Some(conversation) = value_as_string(response.pointer("/data/dm_conversation_id")) {
            result = result.with_extra("conversation_id", conversation);
        }
        Ok(Outcome::Done(result))
    }

    async fn delete_post(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<bool>> {
        let result = self
            .client
            .delete(
                &self.endpoint(&format!("/2/tweets/{}", post_id)),
                &[headers::bearer(access_token)],
            )
            .await
            .map(|body| body.pointer("/data/deleted").and_then(Value::as_bool).unwrap_or(false));
        Ok(Outcome::Done(soft(Platform::Twitter, "delete", result, false)))
    }

    async fn comments(
        &self,
        access_token: &str,
        post_id: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let query = format!("conversation_id:{}", post_id);
        let limit = options.u64("limit").unwrap_or(100).to_string();
        let url = with_query(
            &self.endpoint("/2/tweets/search/recent"),
            &[
                ("query", query.as_str()),
                ("tweet.fields", "author_id,created_at,in_reply_to_user_id,conversation_id"),
                ("max_results", limit.as_str()),
            ],
        )?;
        let replies = self.client.get(&url, &[headers::bearer(access_token)]).await?;
        Ok(Outcome::Done(list_at(&replies, "/data")))
    }

    async fn reply_to_comment(
        &self,
        access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let tweet_id = self
            .create_tweet(
                access_token,
                json!({ "text": text, "reply": { "in_reply_to_tweet_id": comment_id } }),
            )
            .await?;
        Ok(Outcome::Done(WriteResult::published("twitter", tweet_id)))
    }

    async fn post_analytics(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<Payload>> {
        let metrics = self
            .public_metrics(access_token, &format!("/2/tweets/{}", post_id))
            .await?;
        Ok(Outcome::Done(metrics))
    }

    async fn account_analytics(
        &self,
        access_token: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<Payload>> {
        let metrics = self.public_metrics(access_token, "/2/users/me").await?;
        Ok(Outcome::Done(metrics))
    }
}
