use crate::api::{soft, Connector};
use crate::client::{with_query, PlatformClient};
use crate::config::{all_present, default_timeout_secs, parse_settings, validate_common, Platform};
use crate::error::{ConnectorError, ConnectorResult};
use crate::http::{headers, HttpMethod};
use crate::models::{
    object_of, value_as_string, MediaKind, Options, Outcome, Payload, PlatformCapability,
    PlatformType, PostContent, Profile, TokenEnvelope, WriteResult,
};
use crate::oauth::{authorize_url_with_pkce, join_scopes, AuthorizationRequest};
use crate::ratelimit::RateLimitState;
use crate::wait::{poll_until, PollPolicy, PollStatus, WaitStrategy};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info};

const API_URL: &str = "https://open.tiktokapis.com";
const AUTHORIZE_URL: &str = "https://www.tiktok.com/v2/auth/authorize/";
const DEFAULT_SCOPES: &[&str] = &[
    "user.info.basic",
    "user.info.stats",
    "video.publish",
    "video.upload",
    "video.list",
];
const PROFILE_FIELDS: &str = "open_id,union_id,avatar_url,display_name,username";
const STATS_FIELDS: &str = "open_id,follower_count,following_count,likes_count,video_count";
const VIDEO_FIELDS: &str =
    "id,title,create_time,share_url,like_count,comment_count,share_count,view_count";
/// Размер чанка FILE_UPLOAD; остаток уходит в последний чанк
const CHUNK_SIZE: usize = 10 * 1024 * 1024;

const CONTENT_TYPES: &[PlatformCapability] = &[PlatformCapability::Video];

#[derive(Debug, Clone, Deserialize)]
pub struct TiktokConfig {
    pub client_key: String,
    pub client_secret: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    API_URL.to_string()
}

impl TiktokConfig {
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_common(Platform::Tiktok, self.timeout_secs, &[&self.api_url])
    }
}

/// План загрузки: размер чанка и число чанков
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkPlan {
    total: usize,
    chunk_size: usize,
    count: usize,
}

impl ChunkPlan {
    fn for_size(total: usize) -> Self {
        if total <= CHUNK_SIZE {
            return ChunkPlan { total, chunk_size: total, count: 1 };
        }
        ChunkPlan {
            total,
            chunk_size: CHUNK_SIZE,
            count: total / CHUNK_SIZE,
        }
    }

    fn range(&self, index: usize) -> Range<usize> {
        let start = index * self.chunk_size;
        let end = if index + 1 == self.count { self.total } else { start + self.chunk_size };
        start..end
    }

    fn content_range(&self, index: usize) -> String {
        let range = self.range(index);
        format!("bytes {}-{}/{}", range.start, range.end.saturating_sub(1), self.total)
    }
}

pub struct TiktokConnector {
    config: TiktokConfig,
    client: PlatformClient,
    wait: Arc<dyn WaitStrategy>,
}

impl TiktokConnector {
    pub fn new(config: TiktokConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let client = PlatformClient::new(Platform::Tiktok, config.timeout_secs)?;
        Ok(TiktokConnector {
            config,
            client,
            wait: Arc::new(PollPolicy::default()),
        })
    }

    pub fn from_settings(settings: &Value) -> ConnectorResult<Self> {
        Self::new(parse_settings(Platform::Tiktok, settings)?)
    }

    pub fn with_wait_strategy(mut self, wait: Arc<dyn WaitStrategy>) -> Self {
        self.wait = wait;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Ошибки приходят и в ответах 200: `{"error": {"code": "...", "message": "..."}}`
    fn check_ok(body: Value) -> ConnectorResult<Value> {
        match body.pointer("/error/code").and_then(Value::as_str) {
            Some(code) if code != "ok" => {
                let message = body
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .filter(|message| !message.is_empty())
                    .unwrap_or(code)
                    .to_string();
                Err(ConnectorError::api(200, message))
            }
            _ => Ok(body),
        }
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> ConnectorResult<Value> {
        let response = self
            .client
            .post_json(&self.endpoint(path), &[headers::bearer(token)], body)
            .await?;
        Self::check_ok(response)
    }

    async fn oauth_token(&self, params: &[(&str, &str)]) -> ConnectorResult<TokenEnvelope> {
        let mut form = vec![
            ("client_key", self.config.client_key.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        let response = self
            .client
            .post_form(&self.endpoint("/v2/oauth/token/"), &[], &form)
            .await?;
        TokenEnvelope::from_response(Self::check_ok(response)?)
    }

    async fn user_info(&self, token: &str, fields: &str) -> ConnectorResult<Value> {
        let url = with_query(&self.endpoint("/v2/user/info/"), &[("fields", fields)])?;
        Self::check_ok(self.client.get(&url, &[headers::bearer(token)]).await?)
    }

    fn post_info(content: &PostContent, options: &Options) -> Value {
        json!({
            "title": content.text,
            "privacy_level": options
                .str("privacy_level")
                .unwrap_or_else(|| "SELF_ONLY".to_string()),
            "disable_comment": options.bool("disable_comment").unwrap_or(false),
            "disable_duet": options.bool("disable_duet").unwrap_or(false),
            "disable_stitch": options.bool("disable_stitch").unwrap_or(false),
        })
    }

    fn publish_id(init: &Value) -> ConnectorResult<String> {
        value_as_string(init.pointer("/data/publish_id"))
            .ok_or_else(|| ConnectorError::unexpected("No publish_id in TikTok response"))
    }

    /// Скачивает видео и загружает его чанками по выданному upload_url
    async fn file_upload(
        &self,
        token: &str,
        video_url: &str,
        post_info: Value,
    ) -> ConnectorResult<String> {
        let bytes = self.client.download(video_url).await?;
        let plan = ChunkPlan::for_size(bytes.len());

        let init = self
            .post(
                "/v2/post/publish/video/init/",
                token,
                json!({
                    "post_info": post_info,
                    "source_info": {
                        "source": "FILE_UPLOAD",
                        "video_size": plan.total,
                        "chunk_size": plan.chunk_size,
                        "total_chunk_count": plan.count,
                    },
                }),
            )
            .await?;
        let publish_id = Self::publish_id(&init)?;
        let upload_url = value_as_string(init.pointer("/data/upload_url"))
            .ok_or_else(|| ConnectorError::unexpected("No upload_url in TikTok response"))?;

        for index in 0..plan.count {
            let chunk = bytes[plan.range(index)].to_vec();
            debug!(
                "Uploading TikTok chunk {}/{} ({})",
                index + 1,
                plan.count,
                plan.content_range(index)
            );
            self.client
                .upload(
                    HttpMethod::Put,
                    &upload_url,
                    &[
                        headers::named("Content-Range", plan.content_range(index)),
                        headers::named("Content-Type", "video/mp4"),
                    ],
                    chunk,
                )
                .await?;
        }

        Ok(publish_id)
    }

    /// Ждёт завершения публикации; возвращает ID поста, если платформа его отдала
    async fn wait_for_publish(
        &self,
        token: &str,
        publish_id: &str,
    ) -> ConnectorResult<Option<String>> {
        poll_until(self.wait.as_ref(), "TikTok publish", |_| async move {
            let status = self
                .post("/v2/post/publish/status/fetch/", token, json!({ "publish_id": publish_id }))
                .await?;
            let state = status.pointer("/data/status").and_then(Value::as_str).unwrap_or_default();

            Ok(match state {
                "PUBLISH_COMPLETE" => PollStatus::Ready(value_as_string(
                    status.pointer("/data/publicaly_available_post_id/0"),
                )),
                "FAILED" => PollStatus::Failed(
                    value_as_string(status.pointer("/data/fail_reason"))
                        .unwrap_or_else(|| "TikTok publish failed".to_string()),
                ),
                _ => PollStatus::Pending,
            })
        })
        .await
    }
}

#[async_trait]
impl Connector for TiktokConnector {
    fn platform(&self) -> Platform {
        Platform::Tiktok
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
        all_present(&[&self.config.client_key, &self.config.client_secret])
    }

    fn authorization_url(
        &self,
        redirect_uri: &str,
        scopes: &[String],
    ) -> ConnectorResult<AuthorizationRequest> {
        let scope = join_scopes(scopes, DEFAULT_SCOPES, ",");
        authorize_url_with_pkce(
            AUTHORIZE_URL,
            &[
                ("client_key", self.config.client_key.as_str()),
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
        code_verifier: Option<&str>,
    ) -> ConnectorResult<TokenEnvelope> {
        let mut params = vec![
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }
        self.oauth_token(&params).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> ConnectorResult<TokenEnvelope> {
        self.oauth_token(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await
    }

    async fn revoke_token(&self, access_token: &str) -> bool {
        let result = self
            .client
            .post_form(
                &self.endpoint("/v2/oauth/revoke/"),
                &[],
                &[
                    ("client_key", self.config.client_key.as_str()),
                    ("client_secret", self.config.client_secret.as_str()),
                    ("token", access_token),
                ],
            )
            .await
            .and_then(Self::check_ok)
            .map(|_| true);
        soft(Platform::Tiktok, "token revocation", result, false)
    }

    async fn profile(&self, access_token: &str) -> ConnectorResult<Profile> {
        let raw = self.user_info(access_token, PROFILE_FIELDS).await?;
        Profile::from_pointers(
            "tiktok",
            raw,
            "/data/user/open_id",
            "/data/user/display_name",
            "/data/user/username",
            "/data/user/avatar_url",
        )
    }

    async fn publish_post(
        &self,
        access_token: &str,
        content: &PostContent,
        options: &Options,
    ) -> ConnectorResult<WriteResult> {
        let Some(video) = content.first_media(MediaKind::Video) else {
            return Ok(WriteResult::failure("TikTok requires a video"));
        };
        let post_info = Self::post_info(content, options);

        let publish_id = match options.str("source").as_deref() {
            Some("FILE_UPLOAD") => self.file_upload(access_token, &video.url, post_info).await?,
            _ => {
                let init = self
                    .post(
                        "/v2/post/publish/video/init/",
                        access_token,
                        json!({
                            "post_info": post_info,
                            "source_info": { "source": "PULL_FROM_URL", "video_url": video.url },
                        }),
                    )
                    .await?;
                Self::publish_id(&init)?
            }
        };
        debug!("TikTok publish started: {}", publish_id);

        let post_id = self
            .wait_for_publish(access_token, &publish_id)
            .await?
            .unwrap_or_else(|| publish_id.clone());
        info!("Successfully published TikTok video: {}", post_id);

        Ok(WriteResult::published("tiktok", post_id).with_extra("publish_id", publish_id))
    }

    async fn post_analytics(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<Payload>> {
        let url = with_query(&self.endpoint("/v2/video/query/"), &[("fields", VIDEO_FIELDS)])?;
        let response = self
            .client
            .post_json(
                &url,
                &[headers::bearer(access_token)],
                json!({ "filters": { "video_ids": [post_id] } }),
            )
            .await?;
        let response = Self::check_ok(response)?;

        let video = response.pointer("/data/videos/0").cloned().map(object_of).unwrap_or_default();
        Ok(Outcome::Done(video))
    }

    async fn account_analytics(
        &self,
        access_token: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<Payload>> {
        let info = self.user_info(access_token, STATS_FIELDS).await?;
        let stats = info.pointer("/data/user").cloned().map(object_of).unwrap_or_default();
        Ok(Outcome::Done(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = 1024 * 1024;

    #[test]
    fn small_files_upload_in_one_chunk() {
        let plan = ChunkPlan::for_size(3 * MB);
        assert_eq!(plan.count, 1);
        assert_eq!(plan.range(0), 0..3 * MB);
        assert_eq!(plan.content_range(0), format!("bytes 0-{}/{}", 3 * MB - 1, 3 * MB));
    }

    #[test]
    fn remainder_goes_to_last_chunk() {
        let total = 25 * MB + 7;
        let plan = ChunkPlan::for_size(total);
        assert_eq!(plan.chunk_size, CHUNK_SIZE);
        assert_eq!(plan.count, 2);
        assert_eq!(plan.range(0), 0..CHUNK_SIZE);
        assert_eq!(plan.range(1), CHUNK_SIZE..total);
    }

    #[test]
    fn error_code_ok_passes_through() {
        let ok = json!({"data": {}, "error": {"code": "ok", "message": ""}});
        assert!(TiktokConnector::check_ok(ok).is_ok());

        let err = TiktokConnector::check_ok(json!({
            "error": {"code": "access_token_invalid", "message": "The access token is invalid"}
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ConnectorError::Api { ref message, .. } if message == "The access token is invalid"
        ));
    }

    #[test]
    fn authorization_uses_pkce_and_client_key() {
        let settings = json!({"client_key": "ck", "client_secret": "s"});
        let tiktok = TiktokConnector::from_settings(&settings).unwrap();
        let request = tiktok.authorization_url("https://app/cb", &[]).unwrap();

        assert!(request.url.contains("client_key=ck"));
        assert!(request.url.contains("code_challenge_method=S256"));
        assert!(request.code_verifier.is_some());
    }

    #[tokio::test]
    async fn publish_requires_a_video() {
        let settings = json!({"client_key": "ck", "client_secret": "s"});
        let tiktok = TiktokConnector::from_settings(&settings).unwrap();
        let result = tiktok
            .publish_post("t", &PostContent::text("no video"), &Options::new())
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("TikTok requires a video"));
    }
}
