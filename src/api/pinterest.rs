use crate::api::{soft, Connector};
use crate::client::{with_query, PlatformClient};
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
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

const API_URL: &str = "https://api.pinterest.com/v5";
const AUTHORIZE_URL: &str = "https://www.pinterest.com/oauth/";
const PIN_URL: &str = "https://www.pinterest.com/pin";
const DEFAULT_SCOPES: &[&str] = &["boards:read", "pins:read", "pins:write", "user_accounts:read"];
const PIN_METRICS: &str = "IMPRESSION,SAVE,PIN_CLICK,OUTBOUND_CLICK";
const DEFAULT_ANALYTICS_DAYS: u64 = 30;
/// Pinterest отдаёт аналитику не более чем за 90 дней
const MAX_ANALYTICS_DAYS: u64 = 90;

const CONTENT_TYPES: &[PlatformCapability] = &[
    PlatformCapability::Image,
    PlatformCapability::Video,
    PlatformCapability::Link,
    PlatformCapability::Carousel,
];

#[derive(Debug, Clone, Deserialize)]
pub struct PinterestConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Доска по умолчанию для пинов
    #[serde(default)]
    pub default_board_id: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    API_URL.to_string()
}

impl PinterestConfig {
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_common(Platform::Pinterest, self.timeout_secs, &[&self.api_url])
    }
}

pub struct PinterestConnector {
    config: PinterestConfig,
    client: PlatformClient,
}

impl PinterestConnector {
    pub fn new(config: PinterestConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let client = PlatformClient::new(Platform::Pinterest, config.timeout_secs)?;
        Ok(PinterestConnector { config, client })
    }

    pub fn from_settings(settings: &Value) -> ConnectorResult<Self> {
        Self::new(parse_settings(Platform::Pinterest, settings)?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn oauth_token(&self, params: &[(&str, &str)]) -> ConnectorResult<TokenEnvelope> {
        let response = self
            .client
            .post_form(
                &self.endpoint("/oauth/token"),
                &[headers::basic(&self.config.client_id, &self.config.client_secret)],
                params,
            )
            .await?;
        TokenEnvelope::from_response(response)
    }

    /// Источник медиа пина: одно изображение или несколько
    fn media_source(content: &PostContent) -> Option<Value> {
        let images: Vec<&str> = content
            .media
            .iter()
            .filter(|item| item.kind == MediaKind::Image)
            .map(|item| item.url.as_str())
            .collect();

        match images.as_slice() {
            [] => None,
            [single] => Some(json!({ "source_type": "image_url", "url": single })),
            many => Some(json!({
                "source_type": "multiple_image_urls",
                "items": many.iter().map(|url| json!({ "url": url })).collect::<Vec<_>>(),
            })),
        }
    }

    /// Диапазон дат за последние `days` дней (формат YYYY-MM-DD), от 1 до 90 дней
    fn date_range(options: &Options, today: NaiveDate) -> (String, String) {
        let days = options
            .u64("days")
            .unwrap_or(DEFAULT_ANALYTICS_DAYS)
            .clamp(1, MAX_ANALYTICS_DAYS);
        let start = today - Duration::days(days as i64);
        (start.format("%Y-%m-%d").to_string(), today.format("%Y-%m-%d").to_string())
    }

    async fn analytics(
        &self,
        token: &str,
        path: &str,
        options: &Options,
        extra: &[(&str, &str)],
    ) -> ConnectorResult<Payload> {
        let (start, end) = Self::date_range(options, Utc::now().date_naive());
        let mut params = vec![("start_date", start.as_str()), ("end_date", end.as_str())];
        params.extend_from_slice(extra);

        let url = with_query(&self.endpoint(path), &params)?;
        let body = self.client.get(&url, &[headers::bearer(token)]).await?;

        let summary = body.pointer("/all/summary_metrics").cloned().unwrap_or(body);
        Ok(object_of(summary))
    }
}

#[async_trait]
impl Connector for PinterestConnector {
    fn platform(&self) -> Platform {
        Platform::Pinterest
    }

    fn platform_type(&self) -> PlatformType {
        PlatformType::Visual
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

    async fn profile(&self, access_token: &str) -> ConnectorResult<Profile> {
        let raw = self
            .client
            .get(&self.endpoint("/user_account"), &[headers::bearer(access_token)])
            .await?;
        // id есть не у всех типов аккаунтов, username есть всегда
        let id_pointer = if raw.get("id").is_some() { "/id" } else { "/username" };
        Profile::from_pointers(
            "pinterest",
            raw,
            id_pointer,
            "/business_name",
            "/username",
            "/profile_image",
        )
    }

    async fn publish_post(
        &self,
        access_token: &str,
        content: &PostContent,
        options: &Options,
    ) -> ConnectorResult<WriteResult> {
        let Some(board_id) = options
            .str("board_id")
            .or_else(|| self.config.default_board_id.clone())
        else {
            return Ok(WriteResult::failure("board_id is required"));
        };
        let Some(media_source) = Self::media_source(content) else {
            return Ok(WriteResult::failure("Pinterest requires an image"));
        };

        let mut body = json!({
            "board_id": board_id,
            "description": content.text,
            "media_source": media_source,
        });
        if let Some(title) = &content.title {
            body["title"] = Value::String(title.clone());
        }
        if let Some(link) = &content.link {
            body["link"] = Value::String(link.clone());
        }

        let pin = self
            .client
            .post_json(&self.endpoint("/pins"), &[headers::bearer(access_token)], body)
            .await?;
        let pin_id = value_as_string(pin.get("id"))
            .ok_or_else(|| ConnectorError::unexpected("No pin id in Pinterest response"))?;
        info!("Successfully created Pinterest pin: {}", pin_id);

        let url = format!("{}/{}/", PIN_URL, pin_id);
        Ok(WriteResult::published("pinterest", pin_id).with_url(url))
    }

    async fn connected_accounts(&self, access_token: &str) -> ConnectorResult<Outcome<Vec<Value>>> {
        let boards = self
            .client
            .get(&self.endpoint("/boards"), &[headers::bearer(access_token)])
            .await?;
        Ok(Outcome::Done(list_at(&boards, "/items")))
    }

    async fn delete_post(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<bool>> {
        let result = self
            .client
            .delete(&self.endpoint(&format!("/pins/{}", post_id)), &[headers::bearer(access_token)])
            .await
            .map(|_| true);
        Ok(Outcome::Done(soft(Platform::Pinterest, "delete", result, false)))
    }

    async fn post_analytics(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<Payload>> {
        let metrics = self
            .analytics(
                access_token,
                &format!("/pins/{}/analytics", post_id),
                &Options::new(),
                &[("metric_types", PIN_METRICS)],
            )
            .await?;
        Ok(Outcome::Done(metrics))
    }

    async fn account_analytics(
        &self,
        access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Payload>> {
        let metrics = self
            .analytics(access_token, "/user_account/analytics", options, &[])
            .await?;
        Ok(Outcome::Done(metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaItem;

    fn connector() -> PinterestConnector {
        PinterestConnector::from_settings(&json!({"client_id": "cid", "client_secret": "secret"}))
            .unwrap()
    }

    #[test]
    fn single_and_multiple_image_sources() {
        let single = PostContent::text("pin").with_media(MediaItem::image("https://img/1.png"));
        assert_eq!(
            PinterestConnector::media_source(&single).unwrap(),
            json!({"source_type": "image_url", "url": "https://img/1.png"})
        );

        let many = single.with_media(MediaItem::image("https://img/2.png"));
        let source = PinterestConnector::media_source(&many).unwrap();
        assert_eq!(source["source_type"], "multiple_image_urls");
        assert_eq!(source["items"][1]["url"], "https://img/2.png");

        let video_only = PostContent::text("v").with_media(MediaItem::video("https://v/1.mp4"));
        assert!(PinterestConnector::media_source(&video_only).is_none());
    }

    #[test]
    fn analytics_window_defaults_to_thirty_days() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert_eq!(
            PinterestConnector::date_range(&Options::new(), today),
            ("2024-03-01".to_string(), "2024-03-31".to_string())
        );
        assert_eq!(
            PinterestConnector::date_range(&Options::new().with("days", 7), today).0,
            "2024-03-24"
        );
    }

    #[test]
    fn analytics_window_is_clamped_to_vendor_limit() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert_eq!(
            PinterestConnector::date_range(&Options::new().with("days", 200_000_000u64), today),
            ("2024-01-01".to_string(), "2024-03-31".to_string())
        );
        assert_eq!(
            PinterestConnector::date_range(&Options::new().with("days", u64::MAX), today).0,
            "2024-01-01"
        );
        assert_eq!(
            PinterestConnector::date_range(&Options::new().with("days", 0), today).0,
            "2024-03-30"
        );
    }

    #[tokio::test]
    async fn missing_board_is_a_soft_failure() {
        let content = PostContent::text("pin").with_media(MediaItem::image("https://img/1.png"));
        let result = connector().publish_post("t", &content, &Options::new()).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("board_id is required"));
    }
}
