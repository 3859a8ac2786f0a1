use crate::api::{soft, Connector};
use crate::client::{encode_segment, with_query, PlatformClient};
use crate::config::{all_present, default_timeout_secs, parse_settings, validate_common, Platform};
use crate::error::{ConnectorError, ConnectorResult};
use crate::http::{headers, HttpMethod, HttpRequest};
use crate::models::{
    list_at, object_of, value_as_string, MediaKind, Options, Outcome, Payload, PlatformCapability,
    PlatformType, PostContent, Profile, TokenEnvelope, WriteResult,
};
use crate::oauth::{authorize_url, join_scopes, AuthorizationRequest};
use crate::ratelimit::RateLimitState;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

const API_URL: &str = "https://api.linkedin.com";
const OAUTH_URL: &str = "https://www.linkedin.com/oauth/v2";
const FEED_URL: &str = "https://www.linkedin.com/feed/update";
const DEFAULT_API_VERSION: &str = "202401";
const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email", "w_member_social"];

const CONTENT_TYPES: &[PlatformCapability] = &[
    PlatformCapability::Text,
    PlatformCapability::Image,
    PlatformCapability::Video,
    PlatformCapability::Article,
    PlatformCapability::Document,
    PlatformCapability::Link,
];

#[derive(Debug, Clone, Deserialize)]
pub struct LinkedinConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Версия REST API в формате YYYYMM
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_oauth_url")]
    pub oauth_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_api_url() -> String {
    API_URL.to_string()
}

fn default_oauth_url() -> String {
    OAUTH_URL.to_string()
}

impl LinkedinConfig {
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_common(Platform::Linkedin, self.timeout_secs, &[&self.api_url, &self.oauth_url])
    }
}

pub struct LinkedinConnector {
    config: LinkedinConfig,
    client: PlatformClient,
}

impl LinkedinConnector {
    pub fn new(config: LinkedinConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let client = PlatformClient::new(Platform::Linkedin, config.timeout_secs)?;
        Ok(LinkedinConnector { config, client })
    }

    pub fn from_settings(settings: &Value) -> ConnectorResult<Self> {
        Self::new(parse_settings(Platform::Linkedin, settings)?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Заголовки versioned REST API
    fn rest_headers(&self, token: &str) -> Vec<String> {
        vec![
            headers::bearer(token),
            headers::named("LinkedIn-Version", &self.config.api_version),
            headers::named("X-Restli-Protocol-Version", "2.0.0"),
        ]
    }

    async fn oauth_token(&self, params: &[(&str, &str)]) -> ConnectorResult<TokenEnvelope> {
        let mut form = params.to_vec();
        form.push(("client_id", self.config.client_id.as_str()));
        form.push(("client_secret", self.config.client_secret.as_str()));

        let url = format!("{}/accessToken", self.config.oauth_url.trim_end_matches('/'));
        TokenEnvelope::from_response(self.client.post_form(&url, &[], &form).await?)
    }

    async fn userinfo(&self, token: &str) -> ConnectorResult<Value> {
        self.client
            .get(&self.endpoint("/v2/userinfo"), &[headers::bearer(token)])
            .await
    }

    /// URN автора: из параметров (организация) или текущий пользователь
    async fn author(&self, token: &str, options: &Options) -> ConnectorResult<String> {
        if let Some(author) = options.str("author") {
            return Ok(author);
        }

        let me = self.userinfo(token).await?;
        let sub = value_as_string(me.get("sub"))
            .ok_or_else(|| ConnectorError::unexpected("No sub in LinkedIn userinfo"))?;
        Ok(format!("urn:li:person:{}", sub))
    }

    /// initializeUpload, затем PUT байтов изображения по выданному адресу
    async fn upload_image(
        &self,
        token: &str,
        owner: &str,
        media_url: &str,
    ) -> ConnectorResult<String> {
        let init = self
            .client
            .post_json(
                &with_query(&self.endpoint("/rest/images"), &[("action", "initializeUpload")])?,
                &self.rest_headers(token),
                json!({ "initializeUploadRequest": { "owner": owner } }),
            )
            .await?;

        let upload_url = value_as_string(init.pointer("/value/uploadUrl"))
            .ok_or_else(|| ConnectorError::unexpected("No uploadUrl in LinkedIn response"))?;
        let image_urn = value_as_string(init.pointer("/value/image"))
            .ok_or_else(|| ConnectorError::unexpected("No image URN in LinkedIn response"))?;

        let bytes = self.client.download(media_url).await?;
        self.client
            .upload(HttpMethod::Put, &upload_url, &[headers::bearer(token)], bytes)
            .await?;

        debug!("Uploaded LinkedIn image {}", image_urn);
        Ok(image_urn)
    }

    fn post_body(author: &str, content: &PostContent, image_urn: Option<String>) -> Value {
        let mut body = json!({
            "author": author,
            "commentary": content.text,
            "visibility": "PUBLIC",
            "distribution": {
                "feedDistribution": "MAIN_FEED",
                "targetEntities": [],
                "thirdPartyDistributionChannels": []
            },
            "lifecycleState": "PUBLISHED",
            "isReshareDisabledByAuthor": false
        });

        if let Some(image_urn) = image_urn {
            let mut media = json!({ "id": image_urn });
            if let Some(title) = &content.title {
                media["title"] = Value::String(title.clone());
            }
            body["content"] = json!({ "media": media });
        } else if let Some(link) = &content.link {
            let mut article = json!({ "source": link });
            if let Some(title) = &content.title {
                article["title"] = Value::String(title.clone());
            }
            body["content"] = json!({ "article": article });
        }

        body
    }

    fn social_actions(&self, urn: &str) -> String {
        self.endpoint(&format!("/rest/socialActions/{}", encode_segment(urn)))
    }
}

#[async_trait]
impl Connector for LinkedinConnector {
    fn platform(&self) -> Platform {
        Platform::Linkedin
    }

    fn platform_type(&self) -> PlatformType {
        PlatformType::Professional
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
            &format!("{}/authorization", self.config.oauth_url.trim_end_matches('/')),
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
        let raw = self.userinfo(access_token).await?;
        let mut profile =
            Profile::from_pointers("linkedin", raw, "/sub", "/name", "/given_name", "/picture")?;
        profile.email = value_as_string(profile.raw.get("email"));
        Ok(profile)
    }

    async fn publish_post(
        &self,
        access_token: &str,
        content: &PostContent,
        options: &Options,
    ) -> ConnectorResult<WriteResult> {
        let author = self.author(access_token, options).await?;

        let image_urn = match content.first_media(MediaKind::Image) {
            Some(image) => Some(self.upload_image(access_token, &author, &image.url).await?),
            None => None,
        };

        let request = HttpRequest::post(self.endpoint("/rest/posts"))
            .headers(self.rest_headers(access_token))
            .json(Self::post_body(&author, content, image_urn));
        let exchange = self.client.exchange(request).await?;
        let body = self.client.classify(&exchange)?;

        // Идентификатор созданного поста приходит в заголовке
        let post_id = exchange
            .header("x-restli-id")
            .map(str::to_string)
            .or_else(|| value_as_string(body.get("id")))
            .ok_or_else(|| ConnectorError::unexpected("No post id in LinkedIn response"))?;
        info!("Successfully published LinkedIn post: {}", post_id);

        let url = format!("{}/{}", FEED_URL, post_id);
        Ok(WriteResult::published("linkedin", post_id).with_url(url))
    }

    async fn connected_accounts(&self, access_token: &str) -> ConnectorResult<Outcome<Vec<Value>>> {
        let url = with_query(
            &self.endpoint("/rest/organizationAcls"),
            &[("q", "roleAssignee"), ("role", "ADMINISTRATOR"), ("state", "APPROVED")],
        )?;
        let acls = self.client.get(&url, &self.rest_headers(access_token)).await?;
        Ok(Outcome::Done(list_at(&acls, "/elements")))
    }

    async fn delete_post(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<bool>> {
        let result = self
            .client
            .delete(
                &self.endpoint(&format!("/rest/posts/{}", encode_segment(post_id))),
                &self.rest_headers(access_token),
            )
            .await
            .map(|_| true);
        Ok(Outcome::Done(soft(Platform::Linkedin, "delete", result, false)))
    }

    async fn comments(
        &self,
        access_token: &str,
        post_id: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let comments = self
            .client
            .get(
                &format!("{}/comments", self.social_actions(post_id)),
                &self.rest_headers(access_token),
            )
            .await?;
        Ok(Outcome::Done(list_at(&comments, "/elements")))
    }

    async fn reply_to_comment(
        &self,
        access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let actor = self.author(access_token, &Options::new()).await?;
        let reply = self
            .client
            .post_json(
                &format!("{}/comments", self.social_actions(comment_id)),
                &self.rest_headers(access_token),
                json!({
                    "actor": actor,
                    "object": comment_id,
                    "parentComment": comment_id,
                    "message": { "text": text }
                }),
            )
            .await?;

        let reply_id = value_as_string(reply.get("$URN"))
            .or_else(|| value_as_string(reply.get("id")))
            .ok_or_else(|| ConnectorError::unexpected("No comment id in LinkedIn response"))?;
        Ok(Outcome::Done(WriteResult::published("linkedin", reply_id)))
    }

    async fn post_analytics(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<Payload>> {
        let actions = self
            .client
            .get(&self.social_actions(post_id), &self.rest_headers(access_token))
            .await?;

        let mut stats = Payload::new();
        stats.insert(
            "likes".to_string(),
            actions.pointer("/likesSummary/totalLikes").cloned().unwrap_or(json!(0)),
        );
        stats.insert(
            "comments".to_string(),
            actions
                .pointer("/commentsSummary/aggregatedTotalComments")
                .cloned()
                .unwrap_or(json!(0)),
        );
        Ok(Outcome::Done(stats))
    }

    async fn account_analytics(
        &self,
        access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Payload>> {
        // Организация: статистика публикаций; участник: число подписчиков
        let (url, pointer) = match options.str("organization") {
            Some(organization) => (
                with_query(
                    &self.endpoint("/rest/organizationalEntityShareStatistics"),
                    &[
                        ("q", "organizationalEntity"),
                        ("organizationalEntity", organization.as_str()),
                    ],
                )?,
                "/elements/0/totalShareStatistics",
            ),
            None => (
                with_query(&self.endpoint("/rest/memberFollowersCount"), &[("q", "me")])?,
                "/elements/0",
            ),
        };

        let body = self.client.get(&url, &self.rest_headers(access_token)).await?;
        let stats = body.pointer(pointer).cloned().map(object_of).unwrap_or_default();
        Ok(Outcome::Done(stats))
    }
}
