use crate::api::graph::{
    default_api_version, default_graph_url, dialog_url, insights_to_map, GraphApi,
};
use crate::api::{soft, Connector};
use crate::client::PlatformClient;
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
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const DEFAULT_SCOPES: &[&str] = &[
    "public_profile",
    "email",
    "pages_show_list",
    "pages_read_engagement",
    "pages_manage_posts",
    "pages_messaging",
    "read_insights",
];

const POST_METRICS: &str =
    "post_impressions,post_impressions_unique,post_engaged_users,post_clicks";
const PAGE_METRICS: &str =
    "page_impressions,page_impressions_unique,page_engaged_users,page_post_engagements";
const AUDIENCE_METRICS: &str = "page_fans_country,page_fans_city,page_fans_gender_age";

const CONTENT_TYPES: &[PlatformCapability] = &[
    PlatformCapability::Text,
    PlatformCapability::Image,
    PlatformCapability::Video,
    PlatformCapability::Link,
    PlatformCapability::Story,
    PlatformCapability::Reel,
    PlatformCapability::Carousel,
];

#[derive(Debug, Clone, Deserialize)]
pub struct FacebookConfig {
    pub app_id: String,
    pub app_secret: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
    #[serde(default)]
    pub default_page_id: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl FacebookConfig {
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_common(Platform::Facebook, self.timeout_secs, &[&self.graph_url])
    }
}

pub struct FacebookConnector {
    config: FacebookConfig,
    graph: GraphApi,
    client: PlatformClient,
}

impl FacebookConnector {
    pub fn new(config: FacebookConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let graph = GraphApi::new(
            &config.graph_url,
            &config.api_version,
            &config.app_id,
            &config.app_secret,
        );
        let client = PlatformClient::new(Platform::Facebook, config.timeout_secs)?;
        Ok(FacebookConnector { config, graph, client })
    }

    pub fn from_settings(settings: &Value) -> ConnectorResult<Self> {
        Self::new(parse_settings(Platform::Facebook, settings)?)
    }

    fn page_id(&self, options: &Options) -> Option<String> {
        options.str("page_id").or_else(|| self.config.default_page_id.clone())
    }

    /// Токен страницы: из параметров или запросом к Graph API от имени пользователя
    async fn page_token(
        &self,
        user_token: &str,
        page_id: &str,
        options: &Options,
    ) -> ConnectorResult<String> {
        if let Some(token) = options.str("page_access_token") {
            return Ok(token);
        }

        let url = self.graph.query(page_id, &[("fields", "access_token")])?;
        let page = self.client.get(&url, &[headers::bearer(user_token)]).await?;

        Ok(value_as_string(page.get("access_token")).unwrap_or_else(|| {
            debug!("No page token for {}, using user token", page_id);
            user_token.to_string()
        }))
    }

    async fn create_post(
        &self,
        token: &str,
        page_id: &str,
        content: &PostContent,
        extra: Value,
    ) -> ConnectorResult<String> {
        let auth = [headers::bearer(token)];

        let response = if let Some(video) = content.first_media(MediaKind::Video) {
            let mut body = json!({ "file_url": video.url, "description": content.text });
            if let Some(title) = &content.title {
                body["title"] = Value::String(title.clone());
            }
            merge(&mut body, &extra);
            self.client
                .post_json(&self.graph.url(&format!("{}/videos", page_id)), &auth, body)
                .await?
        } else {
            let images: Vec<&str> = content
                .media
                .iter()
                .filter(|item| item.kind == MediaKind::Image)
                .map(|item| item.url.as_str())
                .collect();

            match images.as_slice() {
                [single] if extra.as_object().map_or(true, |o| o.is_empty()) => {
                    let body = json!({ "url": single, "caption": content.text });
                    self.client
                        .post_json(&self.graph.url(&format!("{}/photos", page_id)), &auth, body)
                        .await?
                }
                _ => {
                    let mut body = json!({ "message": content.text });
                    if let Some(link) = &content.link {
                        body["link"] = Value::String(link.clone());
                    }
                    if !images.is_empty() {
                        let mut attached = Vec::new();
                        for url in &images {
                            let photo_id =
                                self.upload_unpublished_photo(token, page_id, url).await?;
                            attached.push(json!({ "media_fbid": photo_id }));
                        }
                        body["attached_media"] = Value::Array(attached);
                    }
                    merge(&mut body, &extra);
                    self.client
                        .post_json(&self.graph.url(&format!("{}/feed", page_id)), &auth, body)
                        .await?
                }
            }
        };

        value_as_string(response.get("post_id"))
            .or_else(|| value_as_string(response.get("id")))
            .ok_or_else(|| ConnectorError::unexpected("No id in Facebook response"))
    }

    async fn upload_unpublished_photo(
        &self,
        token: &str,
        page_id: &str,
        url: &str,
    ) -> ConnectorResult<String> {
        let response = self
            .client
            .post_json(
                &self.graph.url(&format!("{}/photos", page_id)),
                &[headers::bearer(token)],
                json!({ "url": url, "published": false }),
            )
            .await?;
        value_as_string(response.get("id"))
            .ok_or_else(|| ConnectorError::unexpected("No photo id in Facebook response"))
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

fn merge(target: &mut Value, extra: &Value) {
    if let (Some(target), Some(extra)) = (target.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl Connector for FacebookConnector {
    fn platform(&self) -> Platform {
        Platform::Facebook
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

    async fn revoke_token(&self, access_token: &str) -> bool {
        let result = self
            .client
            .delete(&self.graph.url("me/permissions"), &[headers::bearer(access_token)])
            .await
            .map(|_| true);
        soft(Platform::Facebook, "token revocation", result, false)
    }

    async fn profile(&self, access_token: &str) -> ConnectorResult<Profile> {
        let url = self.graph.query("me", &[("fields", "id,name,email,picture.type(large)")])?;
        let raw = self.client.get(&url, &[headers::bearer(access_token)]).await?;

        let mut profile = Profile::from_pointers(
            "facebook",
            raw,
            "/id",
            "/name",
            "/username",
            "/picture/data/url",
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
        let Some(page_id) = self.page_id(options) else {
            return Ok(WriteResult::failure("page_id is required"));
        };

        let token = self.page_token(access_token, &page_id, options).await?;
        let post_id = self.create_post(&token, &page_id, content, json!({})).await?;
        info!("Successfully posted to Facebook page {}: {}", page_id, post_id);

        Ok(WriteResult::published("facebook", post_id.clone())
            .with_url(format!("https://www.facebook.com/{}", post_id)))
    }

    async fn connected_accounts(&self, access_token: &str) -> ConnectorResult<Outcome<Vec<Value>>> {
        let url = self
            .graph
            .query("me/accounts", &[("fields", "id,name,category,access_token,picture")])?;
        let pages = self.client.get(&url, &[headers::bearer(access_token)]).await?;
        Ok(Outcome::Done(list_at(&pages, "/data")))
    }

    async fn schedule_post(
        &self,
        access_token: &str,
        content: &PostContent,
        publish_at: DateTime<Utc>,
        options: &Options,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let Some(page_id) = self.page_id(options) else {
            return Ok(Outcome::Done(WriteResult::failure("page_id is required")));
        };
        if publish_at <= Utc::now() {
            return Ok(Outcome::Done(WriteResult::failure("Scheduled time must be in the future")));
        }

        let token = self.page_token(access_token, &page_id, options).await?;
        let extra = json!({
            "published": false,
            "scheduled_publish_time": publish_at.timestamp(),
        });
        let post_id = self.create_post(&token, &page_id, content, extra).await?;
        info!("Scheduled Facebook post {} for {}", post_id, publish_at);

        Ok(Outcome::Done(
            WriteResult::published("facebook", post_id)
                .with_extra("scheduled_at", publish_at.to_rfc3339()),
        ))
    }

    async fn audience_insights(
        &self,
        access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Payload>> {
        let Some(page_id) = self.page_id(options) else {
            return Err(ConnectorError::config("page_id is required for audience insights"));
        };
        let token = self.page_token(access_token, &page_id, options).await?;
        let metrics = self.insights(&token, &page_id, AUDIENCE_METRICS, Some("lifetime")).await?;
        Ok(Outcome::Done(metrics))
    }

    async fn messages(
        &self,
        access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let Some(page_id) = self.page_id(options) else {
            return Err(ConnectorError::config("page_id is required to read conversations"));
        };
        let token = self.page_token(access_token, &page_id, options).await?;
        let url = self.graph.query(
            &format!("{}/conversations", page_id),
            &[("fields", "participants,updated_time,messages{message,from,created_time}")],
        )?;
        let conversations = self.client.get(&url, &[headers::bearer(&token)]).await?;
        Ok(Outcome::Done(list_at(&conversations, "/data")))
    }

    async fn send_message(
        &self,
        access_token: &str,
        recipient: &str,
        text: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let Some(page_id) = self.page_id(options) else {
            return Ok(Outcome::Done(WriteResult::failure("page_id is required")));
        };
        let token = self.page_token(access_token, &page_id, options).await?;

        let response = self
            .client
            .post_json(
                &self.graph.url(&format!("{}/messages", page_id)),
                &[headers::bearer(&token)],
                json!({
                    "recipient": { "id": recipient },
                    "message": { "text": text },
                    "messaging_type": "RESPONSE",
                }),
            )
            .await?;

        let message_id = value_as_string(response.get("message_id"))
            .ok_or_else(|| ConnectorError::unexpected("No message_id in Facebook response"))?;
        Ok(Outcome::Done(WriteResult::sent("facebook", message_id)))
    }

    async fn delete_post(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<bool>> {
        let result = self
            .client
            .delete(&self.graph.url(post_id), &[headers::bearer(access_token)])
            .await
            .map(|body| body.get("success").and_then(Value::as_bool).unwrap_or(true));
        Ok(Outcome::Done(soft(Platform::Facebook, "delete", result, false)))
    }

    async fn comments(
        &self,
        access_token: &str,
        post_id: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let limit = options.u64("limit").unwrap_or(25).to_string();
        let url = self.graph.query(
            &format!("{}/comments", post_id),
            &[("fields", "id,message,from,created_time,like_count"), ("limit", limit.as_str())],
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
                &self.graph.url(&format!("{}/comments", comment_id)),
                &[headers::bearer(access_token)],
                json!({ "message": text }),
            )
            .await?;

        let reply_id = value_as_string(response.get("id"))
            .ok_or_else(|| ConnectorError::unexpected("No comment id in Facebook response"))?;
        Ok(Outcome::Done(WriteResult::published("facebook", reply_id)))
    }

    async fn post_analytics(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<Payload>> {
        let metrics = self.insights(access_token, post_id, POST_METRICS, None).await?;
        Ok(Outcome::Done(metrics))
    }

    async fn account_analytics(
        &self,
        access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Payload>> {
        let Some(page_id) = self.page_id(options) else {
            warn!("Facebook account analytics requested without page_id");
            return Err(ConnectorError::config("page_id is required for account analytics"));
        };
        let token = self.page_token(access_token, &page_id, options).await?;
        let period = options.str("period").unwrap_or_else(|| "day".to_string());
        let metrics = self.insights(&token, &page_id, PAGE_METRICS, Some(&period)).await?;
        Ok(Outcome::Done(metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_extra_fields() {
        let mut body = json!({"message": "hi"});
        merge(&mut body, &json!({"published": false, "scheduled_publish_time": 1}));
        assert_eq!(body, json!({"message": "hi", "published": false, "scheduled_publish_time": 1}));
    }

    #[test]
    fn authorization_url_uses_dialog_and_comma_scopes() {
        let facebook =
            FacebookConnector::from_settings(&json!({"app_id": "app", "app_secret": "s"})).unwrap();
        let request = facebook.authorization_url("https://app/cb", &[]).unwrap();

        assert!(request.url.starts_with("https://www.facebook.com/v18.0/dialog/oauth?"));
        assert!(request.url.contains("scope=public_profile%2Cemail"));
        assert!(request.url.contains(&format!("state={}", request.state)));
    }

    #[test]
    fn missing_app_secret_is_rejected() {
        assert!(FacebookConnector::from_settings(&json!({"app_id": "app"})).is_err());
    }
}
