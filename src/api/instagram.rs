use crate::api::graph::{
    default_api_version, default_graph_url, dialog_url, insights_to_map, GraphApi,
};
use crate::api::Connector;
use crate::client::PlatformClient;
use crate::config::{all_present, default_timeout_secs, parse_settings, validate_common, Platform};
use crate::error::{ConnectorError, ConnectorResult};
use crate::http::headers;
use crate::models::{
    list_at, value_as_string, MediaItem, MediaKind, Options, Outcome, Payload, PlatformCapability,
    PlatformType, PostContent, Profile, TokenEnvelope, Unsupported, WriteResult,
};
use crate::oauth::{authorize_url, join_scopes, AuthorizationRequest};
use crate::ratelimit::RateLimitState;
use crate::wait::{poll_until, PollPolicy, PollStatus, WaitStrategy};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_SCOPES: &[&str] = &[
    "instagram_basic",
    "instagram_content_publish",
    "instagram_manage_comments",
    "instagram_manage_insights",
    "pages_show_list",
    "pages_read_engagement",
];

const MEDIA_METRICS: &str = "impressions,reach,engagement,saved";
const ACCOUNT_METRICS: &str = "impressions,reach,profile_views";
const AUDIENCE_METRICS: &str = "audience_gender_age,audience_country,audience_city";
const DELETE_UNSUPPORTED: &str = "Instagram API does not support deleting published media";

const CONTENT_TYPES: &[PlatformCapability] = &[
    PlatformCapability::Image,
    PlatformCapability::Video,
    PlatformCapability::Reel,
    PlatformCapability::Story,
    PlatformCapability::Carousel,
];

#[derive(Debug, Clone, Deserialize)]
pub struct InstagramConfig {
    pub app_id: String,
    pub app_secret: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
    /// ID бизнес-аккаунта; без него ищется через страницы пользователя
    #[serde(default)]
    pub instagram_account_id: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl InstagramConfig {
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_common(Platform::Instagram, self.timeout_secs, &[&self.graph_url])
    }
}

pub struct InstagramConnector {
    config: InstagramConfig,
    graph: GraphApi,
    client: PlatformClient,
    wait: Arc<dyn WaitStrategy>,
}

impl InstagramConnector {
    pub fn new(config: InstagramConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let graph = GraphApi::new(
            &config.graph_url,
            &config.api_version,
            &config.app_id,
            &config.app_secret,
        );
        let client = PlatformClient::new(Platform::Instagram, config.timeout_secs)?;
        Ok(InstagramConnector {
            config,
            graph,
            client,
            wait: Arc::new(PollPolicy::default()),
        })
    }

    pub fn from_settings(settings: &Value) -> ConnectorResult<Self> {
        Self::new(parse_settings(Platform::Instagram, settings)?)
    }

    /// Подменяет ожидание обработки контейнеров (интервал, попытки, отмена)
    pub fn with_wait_strategy(mut self, wait: Arc<dyn WaitStrategy>) -> Self {
        self.wait = wait;
        self
    }

    async fn account_id(&self, token: &str, options: &Options) -> ConnectorResult<String> {
        if let Some(id) = options
            .str("instagram_account_id")
            .or_else(|| self.config.instagram_account_id.clone())
        {
            return Ok(id);
        }

        self.linked_accounts(token)
            .await?
            .iter()
            .find_map(|account| value_as_string(account.get("id")))
            .ok_or_else(|| ConnectorError::unexpected("No Instagram business account linked"))
    }

    async fn linked_accounts(&self, token: &str) -> ConnectorResult<Vec<Value>> {
        let url = self.graph.query(
            "me/accounts",
            &[("fields", "id,name,instagram_business_account{id,username,profile_picture_url}")],
        )?;
        let pages = self.client.get(&url, &[headers::bearer(token)]).await?;

        Ok(list_at(&pages, "/data")
            .into_iter()
            .filter_map(|page| page.get("instagram_business_account").cloned())
            .collect())
    }

    async fn create_container(
        &self,
        token: &str,
        account_id: &str,
        body: Value,
    ) -> ConnectorResult<String> {
        let response = self
            .client
            .post_json(
                &self.graph.url(&format!("{}/media", account_id)),
                &[headers::bearer(token)],
                body,
            )
            .await?;
        value_as_string(response.get("id"))
            .ok_or_else(|| ConnectorError::unexpected("No container id in Instagram response"))
    }

    /// Ждёт, пока контейнер перейдёт в FINISHED
    async fn wait_for_container(&self, token: &str, container_id: &str) -> ConnectorResult<()> {
        let url = self.graph.query(container_id, &[("fields", "status_code,status")])?;
        let auth = [headers::bearer(token)];

        poll_until(self.wait.as_ref(), "Instagram media container", |_| {
            let url = url.clone();
            let auth = auth.clone();
            async move {
                let status = self.client.get(&url, &auth).await?;
                let code = status.get("status_code").and_then(Value::as_str).unwrap_or_default();
                debug!("Instagram container {} status: {}", container_id, code);
                Ok(match code {
                    "FINISHED" | "PUBLISHED" => PollStatus::Ready(()),
                    "ERROR" | "EXPIRED" => PollStatus::Failed(format!(
                        "Instagram container {}: {}",
                        container_id, code
                    )),
                    _ => PollStatus::Pending,
                })
            }
        })
        .await
    }

    async fn media_container(
        &self,
        token: &str,
        account_id: &str,
        item: &MediaItem,
        caption: Option<&str>,
        media_type: &str,
        carousel_item: bool,
    ) -> ConnectorResult<String> {
        let mut body = match item.kind {
            MediaKind::Video => json!({ "media_type": media_type, "video_url": item.url }),
            _ if media_type == "STORIES" => {
                json!({ "media_type": media_type, "image_url": item.url })
            }
            _ => json!({ "image_url": item.url }),
        };
        if let Some(caption) = caption {
            body["caption"] = Value::String(caption.to_string());
        }
        if carousel_item {
            body["is_carousel_item"] = Value::Bool(true);
        }

        let container_id = self.create_container(token, account_id, body).await?;
        if item.kind == MediaKind::Video {
            self.wait_for_container(token, &container_id).await?;
        }
        Ok(container_id)
    }

    async fn publish_container(
        &self,
        token: &str,
        account_id: &str,
        container_id: &str,
    ) -> ConnectorResult<String> {
        let response = self
            .client
            .post_json(
                &self.graph.url(&format!("{}/media_publish", account_id)),
                &[headers::bearer(token)],
                json!({ "creation_id": container_id }),
            )
            .await?;
        value_as_string(response.get("id"))
            .ok_or_else(|| ConnectorError::unexpected("No media id in Instagram publish response"))
    }

    async fn insights(
        &self,
        token: &str,
        object_id: &str,
        metrics: &str,
        period: Option<&str>,
    ) -> ConnectorResult<Payload> {
        let mut params = vec![("metric", metrics)];
        if let Some(period) = period {
            params.push(("period", period));
        }
        let url = self.graph.query(&format!("{}/insights", object_id), &params)?;
        let body = self.client.get(&url, &[headers::bearer(token)]).await?;
        Ok(insights_to_map(&body))
    }
}

#[async_trait]
impl Connector for InstagramConnector {
    fn platform(&self) -> Platform {
        Platform::Instagram
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
        all_present(&[&self.config.app_id, &self.config.app_secret])
    }

    fn authorization_url(
        &self,
        redirect_uri: &str,
        scopes: &[String],
    ) -> ConnectorResult<AuthorizationRequest> {
        let scope = join_scopes(scopes, DEFAULT_SCOPES, ",");
        authorize_url(
            &dialog_url(&self.config.api_version),
            &[
                ("client_id", self.config.app_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", scope.as_str()),
                ("response_type", "code"),
            ],
        )
    }

    async fn access_token(
        &self,
        code: &str,
        redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> ConnectorResult<TokenEnvelope> {
        self.graph.exchange_code(&self.client, code, redirect_uri).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> ConnectorResult<TokenEnvelope> {
        self.graph.extend_token(&self.client, refresh_token).await
    }

    async fn profile(&self, access_token: &str) -> ConnectorResult<Profile> {
        let account_id = self.account_id(access_token, &Options::new()).await?;
        let url = self.graph.query(
            &account_id,
            &[("fields", "id,username,name,profile_picture_url,followers_count,media_count")],
        )?;
        let raw = self.client.get(&url, &[headers::bearer(access_token)]).await?;
        Profile::from_pointers(
            "instagram",
            raw,
            "/id",
            "/name",
            "/username",
            "/profile_picture_url",
        )
    }

    async fn publish_post(
        &self,
        access_token: &str,
        content: &PostContent,
        options: &Options,
    ) -> ConnectorResult<WriteResult> {
        if !content.has_media() {
            return Ok(WriteResult::failure("Instagram requires at least one image or video"));
        }

        let account_id = self.account_id(access_token, options).await?;
        let media_type = options.str("media_type").unwrap_or_else(|| "REELS".to_string());
        let caption = Some(content.text.as_str()).filter(|text| !text.is_empty());

        let container_id = if let [single] = content.media.as_slice() {
            self.media_container(access_token, &account_id, single, caption, &media_type, false)
                .await?
        } else {
            // Карусель: дочерние контейнеры, затем общий контейнер CAROUSEL
            let mut children = Vec::with_capacity(content.media.len());
            for item in &content.media {
                let child = self
                    .media_container(access_token, &account_id, item, None, "VIDEO", true)
                    .await?;
                children.push(child);
            }

            let mut body = json!({ "media_type": "CAROUSEL", "children": children.join(",") });
            if let Some(caption) = caption {
                body["caption"] = Value::String(caption.to_string());
            }
            let carousel_id = self.create_container(access_token, &account_id, body).await?;
            self.wait_for_container(access_token, &carousel_id).await?;
            carousel_id
        };

        let media_id = self.publish_container(access_token, &account_id, &container_id).await?;
        info!("Successfully published Instagram media: {}", media_id);

        Ok(WriteResult::published("instagram", media_id).with_extra("container_id", container_id))
    }

    async fn connected_accounts(&self, access_token: &str) -> ConnectorResult<Outcome<Vec<Value>>> {
        Ok(Outcome::Done(self.linked_accounts(access_token).await?))
    }

    async fn audience_insights(
        &self,
        access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Payload>> {
        let account_id = self.account_id(access_token, options).await?;
        let metrics = self
            .insights(access_token, &account_id, AUDIENCE_METRICS, Some("lifetime"))
            .await?;
        Ok(Outcome::Done(metrics))
    }

    async fn delete_post(
        &self,
        _access_token: &str,
        _post_id: &str,
    ) -> ConnectorResult<Outcome<bool>> {
        Ok(Outcome::Unsupported(Unsupported::Platform(DELETE_UNSUPPORTED)))
    }

    async fn comments(
        &self,
        access_token: &str,
        post_id: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let url = self.graph.query(
            &format!("{}/comments", post_id),
            &[("fields", "id,text,username,timestamp,like_count")],
        )?;
        let comments = self.client.get(&url, &[headers::bearer(access_token)]).await?;
        Ok(Outcome::Done(list_at(&comments, "/data")))
    }

    async fn reply_to_comment(
        &self,
        access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let response = self
            .client
            .post_json(
                &self.graph.url(&format!("{}/replies", comment_id)),
                &[headers::bearer(access_token)],
                json!({ "message": text }),
            )
            .await?;
        let reply_id = value_as_string(response.get("id"))
            .ok_or_else(|| ConnectorError::unexpected("No reply id in Instagram response"))?;
        Ok(Outcome::Done(WriteResult::published("instagram", reply_id)))
    }

    async fn post_analytics(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<Payload>> {
        let metrics = self.insights(access_token, post_id, MEDIA_METRICS, None).await?;
        Ok(Outcome::Done(metrics))
    }

    async fn account_analytics(
        &self,
        access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Payload>> {
        let account_id = self.account_id(access_token, options).await?;
        let metrics = self
            .insights(access_token, &account_id, ACCOUNT_METRICS, Some("day"))
            .await?;
        Ok(Outcome::Done(metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> InstagramConnector {
        InstagramConnector::from_settings(&json!({
            "app_id": "app",
            "app_secret": "secret",
            "instagram_account_id": "17841"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn text_only_posts_are_rejected_without_requests() {
        let result = connector()
            .publish_post("token", &PostContent::text("just words"), &Options::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Instagram requires at least one image or video"));
    }

    #[tokio::test]
    async fn deletion_is_reported_as_unsupported() {
        let outcome = connector().delete_post("token", "m1").await.unwrap();
        assert_eq!(outcome, Outcome::Unsupported(Unsupported::Platform(DELETE_UNSUPPORTED)));
    }

    #[test]
    fn scopes_are_comma_separated() {
        let request = connector().authorization_url("https://app/cb", &[]).unwrap();
        assert!(request.url.starts_with("https://www.facebook.com/v18.0/dialog/oauth?"));
        assert!(request.url.contains("instagram_basic%2Cinstagram_content_publish"));
        assert!(request.code_verifier.is_none());
    }

    #[test]
    fn missing_app_secret_fails_construction() {
        let err = InstagramConnector::from_settings(&json!({"app_id": "app"})).err().unwrap();
        assert!(matches!(err, ConnectorError::Config(_)));
    }
}
