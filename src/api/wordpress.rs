use crate::api::{soft, Connector};
use crate::client::{encode_segment, PlatformClient};
use crate::config::{all_present, default_timeout_secs, parse_settings, validate_common, Platform};
use crate::error::{ConnectorError, ConnectorResult};
use crate::http::headers;
use crate::models::{
    list_at, object_of, value_as_string, MediaKind, Options, Outcome, Payload, PlatformCapability,
    PlatformType, PostContent, Profile, TokenEnvelope, WriteResult,
};
use crate::oauth::{authorize_url, join_scopes, AuthorizationRequest};
use crate::ratelimit::RateLimitState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

const API_URL: &str = "https://public-api.wordpress.com/rest/v1.1";
const OAUTH_URL: &str = "https://public-api.wordpress.com/oauth2";
const DEFAULT_SCOPES: &[&str] = &["global"];

const CONTENT_TYPES: &[PlatformCapability] = &[
    PlatformCapability::Article,
    PlatformCapability::Text,
    PlatformCapability::Image,
    PlatformCapability::Link,
];

#[derive(Debug, Clone, Deserialize)]
pub struct WordpressConfig {
    pub client_id: String,
    pub client_secret: String,
    /// ID или домен сайта по умолчанию
    #[serde(default)]
    pub default_site: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_oauth_url")]
    pub oauth_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    API_URL.to_string()
}

fn default_oauth_url() -> String {
    OAUTH_URL.to_string()
}

impl WordpressConfig {
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_common(Platform::Wordpress, self.timeout_secs, &[&self.api_url, &self.oauth_url])
    }
}

pub struct WordpressConnector {
    config: WordpressConfig,
    client: PlatformClient,
}

impl WordpressConnector {
    pub fn new(config: WordpressConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let client = PlatformClient::new(Platform::Wordpress, config.timeout_secs)?;
        Ok(WordpressConnector { config, client })
    }

    pub fn from_settings(settings: &Value) -> ConnectorResult<Self> {
        Self::new(parse_settings(Platform::Wordpress, settings)?)
    }

    fn site_url(&self, site: &str, path: &str) -> String {
        format!(
            "{}/sites/{}{}",
            self.config.api_url.trim_end_matches('/'),
            encode_segment(site),
            path
        )
    }

    fn site_of(&self, options: &Options) -> Option<String> {
        options.str("site").or_else(|| self.config.default_site.clone())
    }

    /// Разбирает `site:id`; без сайта берётся сайт по умолчанию
    fn post_ref(&self, id: &str) -> ConnectorResult<(String, String)> {
        if let Some((site, post)) = id.rsplit_once(':') {
            return Ok((site.to_string(), post.to_string()));
        }

        let site = self
            .config
            .default_site
            .clone()
            .ok_or_else(|| ConnectorError::config("WordPress post reference needs a site"))?;
        Ok((site, id.to_string()))
    }

    fn post_body(content: &PostContent, status: &str) -> Value {
        let mut html = content.text.clone();
        if let Some(link) = &content.link {
            html.push_str(&format!("\n\n<p><a href=\"{}\">{}</a></p>", link, link));
        }

        let media_urls: Vec<&str> = content
            .media
            .iter()
            .filter(|item| item.kind == MediaKind::Image)
            .map(|item| item.url.as_str())
            .collect();

        let mut body = json!({
            "title": content.title.clone().unwrap_or_default(),
            "content": html,
            "status": status,
        });
        if !content.tags.is_empty() {
            body["tags"] = Value::String(content.tags.join(","));
        }
        if !media_urls.is_empty() {
            body["media_urls"] = json!(media_urls);
        }
        body
    }

    async fn create_post(
        &self,
        token: &str,
        site: &str,
        body: Value,
    ) -> ConnectorResult<WriteResult> {
        let post = self
            .client
            .post_json(&self.site_url(site, "/posts/new"), &[headers::bearer(token)], body)
            .await?;

        let id = value_as_string(post.get("ID"))
            .ok_or_else(|| ConnectorError::unexpected("No post ID in WordPress response"))?;
        let mut result = WriteResult::published("wordpress", format!("{}:{}", site, id))
            .with_extra("site", site);
        if let Some(url) = value_as_string(post.get("URL")) {
            result = result.with_url(url);
        }
        Ok(result)
    }
}

#[async_trait]
impl Connector for WordpressConnector {
    fn platform(&self) -> Platform {
        Platform::Wordpress
    }

    fn platform_type(&self) -> PlatformType {
        PlatformType::Blog
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
            &format!("{}/authorize", self.config.oauth_url.trim_end_matches('/')),
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
        let response = self
            .client
            .post_form(
                &format!("{}/token", self.config.oauth_url.trim_end_matches('/')),
                &[],
                &[
                    ("client_id", self.config.client_id.as_str()),
                    ("client_secret", self.config.client_secret.as_str()),
                    ("redirect_uri", redirect_uri),
                    ("code", code),
                    ("grant_type", "authorization_code"),
                ],
            )
            .await?;
        // blog_id и blog_url остаются в raw
        TokenEnvelope::from_response(response)
    }

    async fn profile(&self, access_token: &str) -> ConnectorResult<Profile> {
        let raw = self
            .client
            .get(
                &format!("{}/me", self.config.api_url.trim_end_matches('/')),
                &[headers::bearer(access_token)],
            )
            .await?;
        let mut profile = Profile::from_pointers(
            "wordpress",
            raw,
            "/ID",
            "/display_name",
            "/username",
            "/avatar_URL",
        )?;
        profile.email = value_as_string(profile.raw.get("email"));
        Ok(profile)
    }

    async fn publish_post(
        &self,
        access_token: &str,
        content: &PostContent,
        options: &Options,
    ) -> ConnectorResult<WriteResult> {
        let Some(site) = self.site_of(options) else {
            return Ok(WriteResult::failure("site is required"));
        };
        let status = options.str("status").unwrap_or_else(|| "publish".to_string());

        let result = self
            .create_post(access_token, &site, Self::post_body(content, &status))
            .await?;
        info!("Successfully published WordPress post on {}: {:?}", site, result.post_id);
        Ok(result)
    }

    async fn connected_accounts(&self, access_token: &str) -> ConnectorResult<Outcome<Vec<Value>>> {
        let sites = self
            .client
            .get(
                &format!("{}/me/sites", self.config.api_url.trim_end_matches('/')),
                &[headers::bearer(access_token)],
            )
            .await?;
        Ok(Outcome::Done(list_at(&sites, "/sites")))
    }

    async fn schedule_post(
        &self,
        access_token: &str,
        content: &PostContent,
        publish_at: DateTime<Utc>,
        options: &Options,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let Some(site) = self.site_of(options) else {
            return Ok(Outcome::Done(WriteResult::failure("site is required")));
        };
        if publish_at <= Utc::now() {
            return Ok(Outcome::Done(WriteResult::failure("Scheduled time must be in the future")));
        }

        let mut body = Self::post_body(content, "future");
        body["date"] = Value::String(publish_at.to_rfc3339());
        let result = self.create_post(access_token, &site, body).await?;
        info!("Scheduled WordPress post on {} for {}", site, publish_at);

        Ok(Outcome::Done(result.with_extra("scheduled_at", publish_at.to_rfc3339())))
    }

    async fn delete_post(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<bool>> {
        let result = match self.post_ref(post_id) {
            Ok((site, id)) => self
                .client
                .post_json(
                    &self.site_url(&site, &format!("/posts/{}/delete", id)),
                    &[headers::bearer(access_token)],
                    json!({}),
                )
                .await
                .map(|_| true),
            Err(e) => Err(e),
        };
        Ok(Outcome::Done(soft(Platform::Wordpress, "delete", result, false)))
    }

    async fn comments(
        &self,
        access_token: &str,
        post_id: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let (site, id) = self.post_ref(post_id)?;
        let replies = self
            .client
            .get(
                &self.site_url(&site, &format!("/posts/{}/replies", id)),
                &[headers::bearer(access_token)],
            )
            .await?;
        Ok(Outcome::Done(list_at(&replies, "/comments")))
    }

    async fn reply_to_comment(
        &self,
        access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let (site, id) = self.post_ref(comment_id)?;
        let reply = self
            .client
            .post_json(
                &self.site_url(&site, &format!("/comments/{}/replies/new", id)),
                &[headers::bearer(access_token)],
                json!({ "content": text }),
            )
            .await?;

        let reply_id = value_as_string(reply.get("ID"))
            .ok_or_else(|| ConnectorError::unexpected("No comment ID in WordPress response"))?;
        Ok(Outcome::Done(WriteResult::published(
            "wordpress",
            format!("{}:{}", site, reply_id),
        )))
    }

    async fn post_analytics(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<Payload>> {
        let (site, id) = self.post_ref(post_id)?;
        let stats = self
            .client
            .get(
                &self.site_url(&site, &format!("/stats/post/{}", id)),
                &[headers::bearer(access_token)],
            )
            .await?;
        Ok(Outcome::Done(object_of(stats)))
    }

    async fn account_analytics(
        &self,
        access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Payload>> {
        let Some(site) = self.site_of(options) else {
            return Err(ConnectorError::config("site is required for WordPress statistics"));
        };
        let stats = self
            .client
            .get(&self.site_url(&site, "/stats"), &[headers::bearer(access_token)])
            .await?;

        let summary = stats.get("stats").cloned().unwrap_or(stats);
        Ok(Outcome::Done(object_of(summary)))
    }
}
