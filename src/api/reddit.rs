use crate::api::{soft, Connector};
use crate::client::{with_query, PlatformClient};
use crate::config::{all_present, default_timeout_secs, parse_settings, validate_common, Platform};
use crate::error::{ConnectorError, ConnectorResult};
use crate::http::headers;
use crate::models::{
    list_at, value_as_string, MediaKind, Options, Outcome, Payload, PlatformCapability,
    PlatformType, PostContent, Profile, TokenEnvelope, WriteResult,
};
use crate::oauth::{authorize_url, join_scopes, AuthorizationRequest};
use crate::ratelimit::RateLimitState;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

const WWW_URL: &str = "https://www.reddit.com";
const API_URL: &str = "https://oauth.reddit.com";
const DEFAULT_USER_AGENT: &str = "socon/0.2";
const DEFAULT_SCOPES: &[&str] = &[
    "identity",
    "submit",
    "read",
    "edit",
    "privatemessages",
    "history",
    "mysubreddits",
];
const TITLE_LIMIT: usize = 300;
const POST_PREFIX: &str = "t3_";
const STAT_FIELDS: &[&str] =
    &["score", "ups", "downs", "upvote_ratio", "num_comments", "view_count"];

const CONTENT_TYPES: &[PlatformCapability] = &[
    PlatformCapability::Text,
    PlatformCapability::Link,
    PlatformCapability::Image,
    PlatformCapability::Video,
    PlatformCapability::Poll,
];

#[derive(Debug, Clone, Deserialize)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Reddit отклоняет запросы без осмысленного User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_www_url")]
    pub www_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_www_url() -> String {
    WWW_URL.to_string()
}

fn default_api_url() -> String {
    API_URL.to_string()
}

impl RedditConfig {
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_common(Platform::Reddit, self.timeout_secs, &[&self.www_url, &self.api_url])
    }
}

pub struct RedditConnector {
    config: RedditConfig,
    client: PlatformClient,
}

impl RedditConnector {
    pub fn new(config: RedditConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let client = PlatformClient::new(Platform::Reddit, config.timeout_secs)?;
        Ok(RedditConnector { config, client })
    }

    pub fn from_settings(settings: &Value) -> ConnectorResult<Self> {
        Self::new(parse_settings(Platform::Reddit, settings)?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn www(&self, path: &str) -> String {
        format!("{}{}", self.config.www_url.trim_end_matches('/'), path)
    }

    fn user_agent(&self) -> String {
        headers::named("User-Agent", &self.config.user_agent)
    }

    fn app_headers(&self) -> Vec<String> {
        vec![
            headers::basic(&self.config.client_id, &self.config.client_secret),
            self.user_agent(),
        ]
    }

    fn user_headers(&self, token: &str) -> Vec<String> {
        vec![headers::bearer(token), self.user_agent()]
    }

    async fn oauth_token(&self, params: &[(&str, &str)]) -> ConnectorResult<TokenEnvelope> {
        let response = self
            .client
            .post_form(&self.www("/api/v1/access_token"), &self.app_headers(), params)
            .await?;
        TokenEnvelope::from_response(response)
    }

    /// Ошибки формата `{"json": {"errors": [["CODE", "message", "field"]]}}`
    fn json_errors(body: &Value) -> Option<String> {
        let errors = body.pointer("/json/errors")?.as_array()?;
        if errors.is_empty() {
            return None;
        }

        let messages: Vec<String> = errors
            .iter()
            .map(|error| match error.as_array() {
                Some(parts) => parts
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join(": "),
                None => error.to_string(),
            })
            .collect();
        Some(messages.join("; "))
    }

    /// Полное имя поста `t3_<id>`
    fn fullname(post_id: &str) -> String {
        if post_id.contains('_') {
            post_id.to_string()
        } else {
            format!("{}{}", POST_PREFIX, post_id)
        }
    }

    fn title_of(content: &PostContent) -> String {
        content
            .title
            .clone()
            .unwrap_or_else(|| content.text.lines().next().unwrap_or_default().to_string())
            .chars()
            .take(TITLE_LIMIT)
            .collect()
    }

    fn children_data(listing: &Value, pointer: &str) -> Vec<Value> {
        list_at(listing, pointer)
            .into_iter()
            .filter_map(|child| child.get("data").cloned())
            .collect()
    }
}

#[async_trait]
impl Connector for RedditConnector {
    fn platform(&self) -> Platform {
        Platform::Reddit
    }

    fn platform_type(&self) -> PlatformType {
        PlatformType::Community
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
        authorize_url(
            &self.www("/api/v1/authorize"),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("duration", "permanent"),
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
                &self.www("/api/v1/revoke_token"),
                &self.app_headers(),
                &[("token", access_token), ("token_type_hint", "access_token")],
            )
            .await
            .map(|_| true);
        soft(Platform::Reddit, "token revocation", result, false)
    }

    async fn profile(&self, access_token: &str) -> ConnectorResult<Profile> {
        let raw = self
            .client
            .get(&self.endpoint("/api/v1/me"), &self.user_headers(access_token))
            .await?;
        Profile::from_pointers("reddit", raw, "/id", "/subreddit/title", "/name", "/icon_img")
    }

    async fn publish_post(
        &self,
        access_token: &str,
        content: &PostContent,
        options: &Options,
    ) -> ConnectorResult<WriteResult> {
        let Some(subreddit) = options.str("subreddit") else {
            return Ok(WriteResult::failure("subreddit is required"));
        };
        let title = Self::title_of(content);

        // Ссылка или медиа публикуются как link-пост, остальное как self-пост
        let link = content
            .link
            .clone()
            .or_else(|| content.first_media(MediaKind::Image).map(|item| item.url.clone()))
            .or_else(|| content.first_media(MediaKind::Video).map(|item| item.url.clone()));
        let mut form = vec![
            ("sr", subreddit.as_str()),
            ("title", title.as_str()),
            ("api_type", "json"),
            ("resubmit", "true"),
        ];
        match &link {
            Some(url) => {
                form.push(("kind", "link"));
                form.push(("url", url.as_str()));
                if !content.text.is_empty() {
                    form.push(("text", content.text.as_str()));
                }
            }
            None => {
                form.push(("kind", "self"));
                form.push(("text", content.text.as_str()));
            }
        }

        let response = self
            .client
            .post_form(&self.endpoint("/api/submit"), &self.user_headers(access_token), &form)
            .await?;
        if let Some(errors) = Self::json_errors(&response) {
            warn!("Reddit rejected submission to r/{}: {}", subreddit, errors);
            return Ok(WriteResult::failure(errors));
        }

        let post_id = value_as_string(response.pointer("/json/data/name"))
            .or_else(|| value_as_string(response.pointer("/json/data/id")))
            .ok_or_else(|| ConnectorError::unexpected("No post id in Reddit response"))?;
        info!("Successfully submitted Reddit post {} to r/{}", post_id, subreddit);

        let mut result =
            WriteResult::published("reddit", post_id).with_extra("subreddit", subreddit);
        if let Some(url) = value_as_string(response.pointer("/json/data/url")) {
            result = result.with_url(url);
        }
        Ok(result)
    }

    async fn connected_accounts(&self, access_token: &str) -> ConnectorResult<Outcome<Vec<Value>>> {
        let subreddits = self
            .client
            .get(&self.endpoint("/subreddits/mine/subscriber"), &self.user_headers(access_token))
            .await?;
        Ok(Outcome::Done(Self::children_data(&subreddits, "/data/children")))
    }

    async fn messages(
        &self,
        access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let limit = options.u64("limit").unwrap_or(25).to_string();
        let url = with_query(&self.endpoint("/message/inbox"), &[("limit", limit.as_str())])?;
        let inbox = self.client.get(&url, &self.user_headers(access_token)).await?;
        Ok(Outcome::Done(Self::children_data(&inbox, "/data/children")))
    }

    async fn send_message(
        &self,
        access_token: &str,
        recipient: &str,
        text: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let subject = options.str("subject").unwrap_or_else(|| "Message".to_string());
        let response = self
            .client
            .post_form(
                &self.endpoint("/api/compose"),
                &self.user_headers(access_token),
                &[
                    ("to", recipient),
                    ("subject", subject.as_str()),
                    ("text", text),
                    ("api_type", "json"),
                ],
            )
            .await?;

        if let Some(errors) = Self::json_errors(&response) {
            return Ok(Outcome::Done(WriteResult::failure(errors)));
        }

        // compose не возвращает идентификатор сообщения
        Ok(Outcome::Done(WriteResult {
            success: true,
            platform: Some("reddit".to_string()),
            ..Default::default()
        }
        .with_extra("recipient", recipient)))
    }

    async fn delete_post(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<bool>> {
        let fullname = Self::fullname(post_id);
        let result = self
            .client
            .post_form(
                &self.endpoint("/api/del"),
                &self.user_headers(access_token),
                &[("id", fullname.as_str())],
            )
            .await
            .map(|_| true);
        Ok(Outcome::Done(soft(Platform::Reddit, "delete", result, false)))
    }

    async fn comments(
        &self,
        access_token: &str,
        post_id: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let id = post_id.trim_start_matches(POST_PREFIX);
        let limit = options.u64("limit").unwrap_or(100).to_string();
        let url = with_query(
            &self.endpoint(&format!("/comments/{}", id)),
            &[("limit", limit.as_str())],
        )?;

        // Ответ: [листинг поста, листинг комментариев]
        let listing = self.client.get(&url, &self.user_headers(access_token)).await?;
        Ok(Outcome::Done(Self::children_data(&listing, "/1/data/children")))
    }

    async fn reply_to_comment(
        &self,
        access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let response = self
            .client
            .post_form(
                &self.endpoint("/api/comment"),
                &self.user_headers(access_token),
                &[("thing_id", comment_id), ("text", text), ("api_type", "json")],
            )
            .await?;

        if let Some(errors) = Self::json_errors(&response) {
            return Ok(Outcome::Done(WriteResult::failure(errors)));
        }

        let reply_id = value_as_string(response.pointer("/json/data/things/0/data/name"))
            .ok_or_else(|| ConnectorError::unexpected("No comment id in Reddit response"))?;
        Ok(Outcome::Done(WriteResult::published("reddit", reply_id)))
    }

    async fn post_analytics(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<Payload>> {
        let fullname = Self::fullname(post_id);
        let url = with_query(&self.endpoint("/api/info"), &[("id", fullname.as_str())])?;
        let info = self.client.get(&url, &self.user_headers(access_token)).await?;

        let mut stats = Payload::new();
        if let Some(post) = info.pointer("/data/children/0/data") {
            for field in STAT_FIELDS {
                if let Some(value) = post.get(*field) {
                    stats.insert(field.to_string(), value.clone());
                }
            }
        }
        Ok(Outcome::Done(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connector() -> RedditConnector {
        RedditConnector::from_settings(&json!({"client_id": "cid", "client_secret": "secret"}))
            .unwrap()
    }

    #[test]
    fn user_agent_has_a_default() {
        let reddit = connector();
        assert_eq!(reddit.user_agent(), "User-Agent: socon/0.2");
        assert!(reddit.app_headers()[0].starts_with("Authorization: Basic "));
    }

    #[test]
    fn fullnames_get_post_prefix() {
        assert_eq!(RedditConnector::fullname("abc"), "t3_abc");
        assert_eq!(RedditConnector::fullname("t3_abc"), "t3_abc");
        assert_eq!(RedditConnector::fullname("t1_xyz"), "t1_xyz");
    }

    #[test]
    fn collects_json_errors() {
        let body = json!({
            "json": {"errors": [["SUBREDDIT_NOEXIST", "that subreddit doesn't exist", "sr"]]}
        });
        assert_eq!(
            RedditConnector::json_errors(&body).as_deref(),
            Some("SUBREDDIT_NOEXIST: that subreddit doesn't exist: sr")
        );
        assert!(RedditConnector::json_errors(&json!({"json": {"errors": []}})).is_none());
        assert!(RedditConnector::json_errors(&json!({})).is_none());
    }

    #[test]
    fn authorization_requests_permanent_tokens() {
        let request = connector().authorization_url("https://app/cb", &[]).unwrap();
        assert!(request.url.starts_with("https://www.reddit.com/api/v1/authorize?"));
        assert!(request.url.contains("duration=permanent"));
        assert!(request.url.contains("scope=identity+submit"));
    }

    #[tokio::test]
    async fn missing_subreddit_is_a_soft_failure() {
        let result = connector()
            .publish_post("t", &PostContent::text("hello"), &Options::new())
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("subreddit is required"));
    }
}
