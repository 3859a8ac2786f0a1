use crate::api::Connector;
use crate::client::PlatformClient;
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
use tracing::info;

const API_URL: &str = "https://api.medium.com/v1";
const AUTHORIZE_URL: &str = "https://medium.com/m/oauth/authorize";
const DEFAULT_SCOPES: &[&str] = &["basicProfile", "publishPost", "listPublications"];
const MAX_TAGS: usize = 5;
const TITLE_LIMIT: usize = 100;

const CONTENT_TYPES: &[PlatformCapability] =
    &[PlatformCapability::Article, PlatformCapability::Text];

#[derive(Debug, Clone, Deserialize)]
pub struct MediumConfig {
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

impl MediumConfig {
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_common(Platform::Medium, self.timeout_secs, &[&self.api_url])
    }
}

pub struct MediumConnector {
    config: MediumConfig,
    client: PlatformClient,
}

impl MediumConnector {
    pub fn new(config: MediumConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let client = PlatformClient::new(Platform::Medium, config.timeout_secs)?;
        Ok(MediumConnector { config, client })
    }

    pub fn from_settings(settings: &Value) -> ConnectorResult<Self> {
        Self::new(parse_settings(Platform::Medium, settings)?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn oauth_token(&self, params: &[(&str, &str)]) -> ConnectorResult<TokenEnvelope> {
        let mut form = params.to_vec();
        form.push(("client_id", self.config.client_id.as_str()));
        form.push(("client_secret", self.config.client_secret.as_str()));

        let response = self
            .client
            .post_form(&self.endpoint("/tokens"), &[headers::ACCEPT_JSON.to_string()], &form)
            .await?;
        TokenEnvelope::from_response(response)
    }

    async fn me(&self, token: &str) -> ConnectorResult<Value> {
        self.client
            .get(&self.endpoint("/me"), &[headers::bearer(token)])
            .await
    }

    async fn user_id(&self, token: &str) -> ConnectorResult<String> {
        let me = self.me(token).await?;
        value_as_string(me.pointer("/data/id"))
            .ok_or_else(|| ConnectorError::unexpected("No user id in Medium response"))
    }

    /// Заголовок обязателен; без него берётся первая строка текста
    fn title_of(content: &PostContent) -> String {
        content.title.clone().unwrap_or_else(|| {
            content
                .text
                .lines()
                .next()
                .unwrap_or_default()
                .chars()
                .take(TITLE_LIMIT)
                .collect()
        })
    }

    fn article_body(content: &PostContent, options: &Options) -> Value {
        let format = options.str("content_format").unwrap_or_else(|| "markdown".to_string());
        let title = Self::title_of(content);

        let mut body_text = if format == "html" {
            format!("<h1>{}</h1>{}", title, content.text)
        } else {
            format!("# {}\n\n{}", title, content.text)
        };
        if let Some(image) = content.first_media(MediaKind::Image) {
            let image = if format == "html" {
                format!("<img src=\"{}\"/>", image.url)
            } else {
                format!("\n\n![]({})", image.url)
            };
            body_text.push_str(&image);
        }

        let tags: Vec<&String> = content.tags.iter().take(MAX_TAGS).collect();
        let mut body = json!({
            "title": title,
            "contentFormat": format,
            "content": body_text,
            "tags": tags,
            "publishStatus": options.str("publish_status").unwrap_or_else(|| "public".to_string()),
        });
        if let Some(canonical) = options.str("canonical_url").or_else(|| content.link.clone()) {
            body["canonicalUrl"] = Value::String(canonical);
        }
        body
    }
}

#[async_trait]
impl Connector for MediumConnector {
    fn platform(&self) -> Platform {
        Platform::Medium
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
        let scope = join_scopes(scopes, DEFAULT_SCOPES, ",");
        authorize_url(
            AUTHORIZE_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("scope", scope.as_str()),
                ("response_type", "code"),
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
        self.oauth_token(&[
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> ConnectorResult<TokenEnvelope> {
        self.oauth_token(&[("refresh_token", refresh_token), ("grant_type", "refresh_token")])
            .await
    }

    async fn profile(&self, access_token: &str) -> ConnectorResult<Profile> {
        let raw = self.me(access_token).await?;
        Profile::from_pointers(
            "medium",
            raw,
            "/data/id",
            "/data/name",
            "/data/username",
            "/data/imageUrl",
        )
    }

    async fn publish_post(
        &self,
        access_token: &str,
        content: &PostContent,
        options: &Options,
    ) -> ConnectorResult<WriteResult> {
        // В публикацию, если указана, иначе в профиль пользователя
        let path = match options.str("publication_id") {
            Some(publication_id) => format!("/publications/{}/posts", publication_id),
            None => format!("/users/{}/posts", self.user_id(access_token).await?),
        };

        let response = self
            .client
            .post_json(
                &self.endpoint(&path),
                &[headers::bearer(access_token)],
                Self::article_body(content, options),
            )
            .await?;

        let post_id = value_as_string(response.pointer("/data/id"))
            .ok_or_else(|| ConnectorError::unexpected("No post id in Medium response"))?;
        info!("Successfully published Medium post: {}", post_id);

        let mut result = WriteResult::published("medium", post_id);
        if let Some(url) = value_as_string(response.pointer("/data/url")) {
            result = result.with_url(url);
        }
        Ok(result)
    }

    async fn connected_accounts(&self, access_token: &str) -> ConnectorResult<Outcome<Vec<Value>>> {
        let user_id = self.user_id(access_token).await?;
        let publications = self
            .client
            .get(
                &self.endpoint(&format!("/users/{}/publications", user_id)),
                &[headers::bearer(access_token)],
            )
            .await?;
        Ok(Outcome::Done(list_at(&publications, "/data")))
    }
}
