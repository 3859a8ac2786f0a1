use crate::api::{soft, Connector};
use crate::classify::decode_body;
use crate::client::{with_query, PlatformClient};
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
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

const API_URL: &str = "https://www.googleapis.com";
const OAUTH_URL: &str = "https://oauth2.googleapis.com";
const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const WATCH_URL: &str = "https://www.youtube.com/watch";
const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/youtube.upload",
    "https://www.googleapis.com/auth/youtube",
    "https://www.googleapis.com/auth/youtube.force-ssl",
];
const TITLE_LIMIT: usize = 100;
const DEFAULT_CATEGORY: &str = "22";

const CONTENT_TYPES: &[PlatformCapability] = &[PlatformCapability::Video, PlatformCapability::Reel];

#[derive(Debug, Clone, Deserialize)]
pub struct YoutubeConfig {
    pub client_id: String,
    pub client_secret: String,
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

impl YoutubeConfig {
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_common(Platform::Youtube, self.timeout_secs, &[&self.api_url, &self.oauth_url])
    }
}

pub struct YoutubeConnector {
    config: YoutubeConfig,
    client: PlatformClient,
}

impl YoutubeConnector {
    pub fn new(config: YoutubeConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let client = PlatformClient::new(Platform::Youtube, config.timeout_secs)?;
        Ok(YoutubeConnector { config, client })
    }

    pub fn from_settings(settings: &Value) -> ConnectorResult<Self> {
        Self::new(parse_settings(Platform::Youtube, settings)?)
    }

    fn data_api(&self, resource: &str, params: &[(&str, &str)]) -> ConnectorResult<String> {
        with_query(
            &format!("{}/youtube/v3/{}", self.config.api_url.trim_end_matches('/'), resource),
            params,
        )
    }

    fn oauth_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.oauth_url.trim_end_matches('/'), path)
    }

    async fn oauth_token(&self, params: &[(&str, &str)]) -> ConnectorResult<TokenEnvelope> {
        let mut form = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        let response = self.client.post_form(&self.oauth_endpoint("/token"), &[], &form).await?;
        TokenEnvelope::from_response(response)
    }

    async fn my_channel(&self, token: &str, part: &str) -> ConnectorResult<Value> {
        let url = self.data_api("channels", &[("part", part), ("mine", "true")])?;
        self.client.get(&url, &[headers::bearer(token)]).await
    }

    fn video_metadata(
        content: &PostContent,
        options: &Options,
        publish_at: Option<DateTime<Utc>>,
    ) -> Value {
        let title: String = content
            .title
            .clone()
            .unwrap_or_else(|| content.text.lines().next().unwrap_or_default().to_string())
            .chars()
            .take(TITLE_LIMIT)
            .collect();

        // Отложенная публикация возможна только для приватного видео
        let privacy = match publish_at {
            Some(_) => "private".to_string(),
            None => options.str("privacy_status").unwrap_or_else(|| "public".to_string()),
        };

        let mut status = json!({
            "privacyStatus": privacy,
            "selfDeclaredMadeForKids": options.bool("made_for_kids").unwrap_or(false),
        });
        if let Some(publish_at) = publish_at {
            status["publishAt"] = Value::String(publish_at.to_rfc3339());
        }

        json!({
            "snippet": {
                "title": title,
                "description": content.text,
                "tags": content.tags,
                "categoryId": options
                    .str("category_id")
                    .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            },
            "status": status,
        })
    }

    /// Resumable upload: метаданные POST → адрес сессии в Location → байты PUT
    async fn upload_video(
        &self,
        token: &str,
        content: &PostContent,
        options: &Options,
        publish_at: Option<DateTime<Utc>>,
    ) -> ConnectorResult<WriteResult> {
        let Some(video) = content.first_media(MediaKind::Video) else {
            return Ok(WriteResult::failure("YouTube requires a video"));
        };
        let bytes = self.client.download(&video.url).await?;

        let session_url = with_query(
            &format!("{}/upload/youtube/v3/videos", self.config.api_url.trim_end_matches('/')),
            &[("uploadType", "resumable"), ("part", "snippet,status")],
        )?;
        let request = HttpRequest::post(session_url)
            .header(headers::bearer(token))
            .header(headers::named("X-Upload-Content-Type", "video/*"))
            .header(headers::named("X-Upload-Content-Length", bytes.len()))
            .json(Self::video_metadata(content, options, publish_at));
        let session = self.client.exchange(request).await?;
        self.client.classify(&session)?;

        let location = session
            .header("location")
            .map(str::to_string)
            .ok_or_else(|| ConnectorError::unexpected("No upload Location in YouTube response"))?;
        debug!("YouTube upload session opened: {}", location);

        let uploaded = self
            .client
            .upload(
                HttpMethod::Put,
                &location,
                &[headers::bearer(token), headers::named("Content-Type", "video/*")],
                bytes,
            )
            .await?;
        let body = decode_body(&uploaded.body);

        let video_id = value_as_string(body.get("id"))
            .ok_or_else(|| ConnectorError::unexpected("No video id in YouTube response"))?;
        info!("Successfully uploaded YouTube video: {}", video_id);

        let url = format!("{}?v={}", WATCH_URL, video_id);
        Ok(WriteResult::published("youtube", video_id).with_url(url))
    }

    fn first_item_field(body: &Value, field: &str) -> Payload {
        body.pointer(&format!("/items/0/{}", field))
            .cloned()
            .map(object_of)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for YoutubeConnector {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    fn platform_type(&self) -> PlatformType {
        PlatformType::Video
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
            AUTHORIZE_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
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
        let mut token = self
            .oauth_token(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await?;
        // Google не возвращает refresh_token повторно
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(token)
    }

    async fn revoke_token(&self, access_token: &str) -> bool {
        let result = self
            .client
            .post_form(&self.oauth_endpoint("/revoke"), &[], &[("token", access_token)])
            .await
            .map(|_| true);
        soft(Platform::Youtube, "token revocation", result, false)
    }

    async fn profile(&self, access_token: &str) -> ConnectorResult<Profile> {
        let channels = self.my_channel(access_token, "snippet").await?;
        let channel = channels
            .pointer("/items/0")
            .cloned()
            .ok_or_else(|| ConnectorError::unexpected("No YouTube channel for this account"))?;
        Profile::from_pointers(
            "youtube",
            channel,
            "/id",
            "/snippet/title",
            "/snippet/customUrl",
            "/snippet/thumbnails/default/url",
        )
    }

    async fn publish_post(
        &self,
        access_token: &str,
        content: &PostContent,
        options: &Options,
    ) -> ConnectorResult<WriteResult> {
        self.upload_video(access_token, content, options, None).await
    }

    async fn connected_accounts(&self, access_token: &str) -> ConnectorResult<Outcome<Vec<Value>>> {
        let channels = self.my_channel(access_token, "snippet,statistics").await?;
        Ok(Outcome::Done(list_at(&channels, "/items")))
    }

    async fn schedule_post(
        &self,
        access_token: &str,
        content: &PostContent,
        publish_at: DateTime<Utc>,
        options: &Options,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        if publish_at <= Utc::now() {
            return Ok(Outcome::Done(WriteResult::failure("Scheduled time must be in the future")));
        }

        let result = self
            .upload_video(access_token, content, options, Some(publish_at))
            .await?;
        Ok(Outcome::Done(result.with_extra("scheduled_at", publish_at.to_rfc3339())))
    }

    async fn delete_post(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<bool>> {
        let result = match self.data_api("videos", &[("id", post_id)]) {
            Ok(url) => self
                .client
                .delete(&url, &[headers::bearer(access_token)])
                .await
                .map(|_| true),
            Err(e) => Err(e),
        };
        Ok(Outcome::Done(soft(Platform::Youtube, "delete", result, false)))
    }

    async fn comments(
        &self,
        access_token: &str,
        post_id: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let limit = options.u64("limit").unwrap_or(100).to_string();
        let url = self.data_api(
            "commentThreads",
            &[("part", "snippet"), ("videoId", post_id), ("maxResults", limit.as_str())],
        )?;
        let threads = self.client.get(&url, &[headers::bearer(access_token)]).await?;
        Ok(Outcome::Done(list_at(&threads, "/items")))
    }

    async fn reply_to_comment(
        &self,
        access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let url = self.data_api("comments", &[("part", "snippet")])?;
        let reply = self
            .client
            .post_json(
                &url,
                &[headers::bearer(access_token)],
                json!({ "snippet": { "parentId": comment_id, "textOriginal": text } }),
            )
            .await?;

        let reply_id = value_as_string(reply.get("id"))
            .ok_or_else(|| ConnectorError::unexpected("No comment id in YouTube response"))?;
        Ok(Outcome::Done(WriteResult::published("youtube", reply_id)))
    }

    async fn post_analytics(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<Payload>> {
        let url = self.data_api("videos", &[("part", "statistics"), ("id", post_id)])?;
        let videos = self.client.get(&url, &[headers::bearer(access_token)]).await?;
        Ok(Outcome::Done(Self::first_item_field(&videos, "statistics")))
    }

    async fn account_analytics(
        &self,
        access_token: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<Payload>> {
        let channels = self.my_channel(access_token, "statistics").await?;
        Ok(Outcome::Done(Self::first_item_field(&channels, "statistics")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> YoutubeConnector {
        YoutubeConnector::from_settings(&json!({"client_id": "cid", "client_secret": "secret"}))
            .unwrap()
    }

    #[test]
    fn scheduled_uploads_are_private_with_publish_at() {
        let publish_at = DateTime::parse_from_rfc3339("2030-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let content = PostContent::text("Episode 1\nShow notes").with_title("Pilot");
        let options = Options::new().with("privacy_status", "unlisted");

        let scheduled = YoutubeConnector::video_metadata(&content, &options, Some(publish_at));
        assert_eq!(scheduled["status"]["privacyStatus"], "private");
        assert_eq!(scheduled["status"]["publishAt"], "2030-01-01T10:00:00+00:00");
        assert_eq!(scheduled["snippet"]["title"], "Pilot");

        let episode = PostContent::text("Episode 1\nShow notes");
        let immediate = YoutubeConnector::video_metadata(&episode, &options, None);
        assert_eq!(immediate["status"]["privacyStatus"], "unlisted");
        assert_eq!(immediate["snippet"]["title"], "Episode 1");
        assert_eq!(immediate["snippet"]["categoryId"], "22");
    }

    #[test]
    fn authorization_requests_offline_access() {
        let request = connector().authorization_url("https://app/cb", &[]).unwrap();
        assert!(request.url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(request.url.contains("access_type=offline"));
    }

    #[tokio::test]
    async fn publish_requires_a_video() {
        let result = connector()
            .publish_post("t", &PostContent::text("no video"), &Options::new())
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("YouTube requires a video"));
    }
}
