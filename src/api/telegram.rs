use crate::api::{soft, Connector};
use crate::client::PlatformClient;
use crate::config::{all_present, default_timeout_secs, parse_settings, validate_common, Platform};
use crate::error::{ConnectorError, ConnectorResult};
use crate::models::{
    list_at, value_as_string, MediaItem, MediaKind, Options, Outcome, Payload, PlatformCapability,
    PlatformType, PostContent, Profile, TokenEnvelope, WriteResult,
};
use crate::oauth::{authorize_url, AuthorizationRequest};
use crate::ratelimit::RateLimitState;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

const API_URL: &str = "https://api.telegram.org";
const LOGIN_URL: &str = "https://oauth.telegram.org/auth";

const CONTENT_TYPES: &[PlatformCapability] = &[
    PlatformCapability::Text,
    PlatformCapability::Image,
    PlatformCapability::Video,
    PlatformCapability::File,
    PlatformCapability::Poll,
    PlatformCapability::Link,
];

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Токен бота вида `123456:ABC...`
    pub bot_token: String,
    #[serde(default)]
    pub default_chat_id: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    API_URL.to_string()
}

impl TelegramConfig {
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_common(Platform::Telegram, self.timeout_secs, &[&self.api_url])
    }
}

pub struct TelegramConnector {
    config: TelegramConfig,
    client: PlatformClient,
}

impl TelegramConnector {
    pub fn new(config: TelegramConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let client = PlatformClient::new(Platform::Telegram, config.timeout_secs)?;
        Ok(TelegramConnector { config, client })
    }

    pub fn from_settings(settings: &Value) -> ConnectorResult<Self> {
        Self::new(parse_settings(Platform::Telegram, settings)?)
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    /// Числовой ID бота из токена
    fn bot_id(&self) -> &str {
        self.config
            .bot_token
            .split_once(':')
            .map(|(id, _)| id)
            .unwrap_or(&self.config.bot_token)
    }

    /// Вызов Bot API; `ok: false` превращается в ошибку, возвращается `result`
    async fn call(&self, method: &str, body: Value) -> ConnectorResult<Value> {
        debug!("Calling Telegram method {}", method);
        let response = self.client.post_json(&self.method_url(method), &[], body).await?;
        Self::unwrap_result(response)
    }

    fn unwrap_result(mut body: Value) -> ConnectorResult<Value> {
        if body.get("ok").and_then(Value::as_bool) == Some(false) {
            let code = body
                .get("error_code")
                .and_then(Value::as_u64)
                .and_then(|code| u16::try_from(code).ok())
                .unwrap_or(200);
            let description = body
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("Telegram API error")
                .to_string();
            return Err(ConnectorError::api(code, description));
        }
        Ok(body.get_mut("result").map(Value::take).unwrap_or(Value::Null))
    }

    fn chat_of(&self, options: &Options) -> Option<String> {
        options.str("chat_id").or_else(|| self.config.default_chat_id.clone())
    }

    /// Разбирает `chat:message`; без чата берётся чат по умолчанию
    fn message_ref(&self, id: &str) -> ConnectorResult<(String, String)> {
        if let Some((chat, message)) = id.rsplit_once(':') {
            return Ok((chat.to_string(), message.to_string()));
        }

        let chat = self
            .config
            .default_chat_id
            .clone()
            .ok_or_else(|| ConnectorError::config("Telegram message reference needs a chat id"))?;
        Ok((chat, id.to_string()))
    }

    fn text_of(content: &PostContent) -> String {
        match &content.link {
            Some(link) if !content.text.contains(link.as_str()) => {
                format!("{}\n{}", content.text, link)
            }
            _ => content.text.clone(),
        }
    }

    /// Метод и тело запроса для публикации
    fn publication(
        chat_id: &str,
        content: &PostContent,
        options: &Options) -> (&'static str,
        Value,
    ) {
        let text = Self::text_of(content);

        if let Some(poll) = &content.poll {
            let options: Vec<Value> =
                poll.options.iter().map(|option| json!({ "text": option })).collect();
            return (
                "sendPoll",
                json!({ "chat_id": chat_id, "question": poll.question, "options": options }),
            );
        }

        let mut call = match content.media.as_slice() {
            [] => {
                let mut body = json!({ "chat_id": chat_id, "text": text });
                if let Some(mode) = options.str("parse_mode") {
                    body["parse_mode"] = Value::String(mode);
                }
                return ("sendMessage", body);
            }
            [single] => {
                let (method, field) = match single.kind {
                    MediaKind::Image => ("sendPhoto", "photo"),
                    MediaKind::Video => ("sendVideo", "video"),
                    MediaKind::Document => ("sendDocument", "document"),
                };
                let mut body = json!({ "chat_id": chat_id, "caption": text });
                body[field] = Value::String(single.url.clone());
                (method, body)
            }
            many => {
                let media: Vec<Value> = many
                    .iter()
                    .enumerate()
                    .map(|(index, item)| {
                        Self::group_item(item, (index == 0).then_some(text.as_str()))
                    })
                    .collect();
                ("sendMediaGroup", json!({ "chat_id": chat_id, "media": media }))
            }
        };

        if let Some(mode) = options.str("parse_mode") {
            if call.1.get("caption").is_some() {
                call.1["parse_mode"] = Value::String(mode);
            }
        }
        call
    }

    fn group_item(item: &MediaItem, caption: Option<&str>) -> Value {
        let kind = match item.kind {
            MediaKind::Image => "photo",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
        };
        let mut entry = json!({ "type": kind, "media": item.url });
        if let Some(caption) = caption {
            entry["caption"] = Value::String(caption.to_string());
        }
        entry
    }

    /// sendMediaGroup возвращает массив сообщений, остальные методы одно
    fn message_id(result: &Value) -> Option<String> {
        value_as_string(result.get("message_id"))
            .or_else(|| value_as_string(result.pointer("/0/message_id")))
    }
}

#[async_trait]
impl Connector for TelegramConnector {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    fn platform_type(&self) -> PlatformType {
        PlatformType::Messaging
    }

    fn supported_content_types(&self) -> &'static [PlatformCapability] {
        CONTENT_TYPES
    }

    fn rate_limits(&self) -> RateLimitState {
        self.client.rate_limits()
    }

    fn is_configured(&self) -> bool {
        all_present(&[&self.config.bot_token])
    }

    /// Telegram Login: вместо кода авторизации виджет отдаёт подписанные данные пользователя
    fn authorization_url(
        &self,
        redirect_uri: &str,
        _scopes: &[String],
    ) -> ConnectorResult<AuthorizationRequest> {
        authorize_url(
            LOGIN_URL,
            &[
                ("bot_id", self.bot_id()),
                ("origin", redirect_uri),
                ("return_to", redirect_uri),
                ("request_access", "write"),
            ],
        )
    }

    /// Боту хватает собственного токена; полученные данные сохраняются в `raw`
    async fn access_token(
        &self,
        code: &str,
        _redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> ConnectorResult<TokenEnvelope> {
        Ok(TokenEnvelope {
            access_token: self.config.bot_token.clone(),
            token_type: Some("bot".to_string()),
            raw: json!({ "auth_data": code }),
            ..Default::default()
        })
    }

    async fn profile(&self, _access_token: &str) -> ConnectorResult<Profile> {
        let me = self.call("getMe", json!({})).await?;
        Profile::from_pointers("telegram", me, "/id", "/first_name", "/username", "/photo_url")
    }

    async fn publish_post(
        &self,
        _access_token: &str,
        content: &PostContent,
        options: &Options,
    ) -> ConnectorResult<WriteResult> {
        let Some(chat_id) = self.chat_of(options) else {
            return Ok(WriteResult::failure("chat_id is required"));
        };

        let (method, body) = Self::publication(&chat_id, content, options);
        let result = self.call(method, body).await?;
        let message_id = Self::message_id(&result)
            .ok_or_else(|| ConnectorError::unexpected("No message_id in Telegram response"))?;
        info!("Successfully sent Telegram {} to {}: {}", method, chat_id, message_id);

        Ok(WriteResult::published("telegram", format!("{}:{}", chat_id, message_id))
            .with_extra("chat_id", chat_id)
            .with_extra("message_id", message_id))
    }

    async fn messages(
        &self,
        _access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        let mut body = json!({ "limit": options.u64("limit").unwrap_or(100) });
        if let Some(offset) = options.u64("offset") {
            body["offset"] = json!(offset);
        }

        let updates = self.call("getUpdates", body).await?;
        Ok(Outcome::Done(list_at(&updates, "")))
    }

    async fn send_message(
        &self,
        _access_token: &str,
        recipient: &str,
        text: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let mut body = json!({ "chat_id": recipient, "text": text });
        if let Some(mode) = options.str("parse_mode") {
            body["parse_mode"] = Value::String(mode);
        }

        let result = self.call("sendMessage", body).await?;
        let message_id = Self::message_id(&result)
            .ok_or_else(|| ConnectorError::unexpected("No message_id in Telegram response"))?;
        Ok(Outcome::Done(
            WriteResult::sent("telegram", message_id).with_extra("chat_id", recipient),
        ))
    }

    async fn delete_post(
        &self,
        _access_token: &str,
        post_id: &str,
    ) -> ConnectorResult<Outcome<bool>> {
        let result = match self.message_ref(post_id) {
            Ok((chat_id, message_id)) => self
                .call("deleteMessage", json!({ "chat_id": chat_id, "message_id": message_id }))
                .await
                .map(|deleted| deleted.as_bool().unwrap_or(true)),
            Err(e) => Err(e),
        };
        Ok(Outcome::Done(soft(Platform::Telegram, "delete", result, false)))
    }

    async fn reply_to_comment(
        &self,
        _access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        let (chat_id, message_id) = self.message_ref(comment_id)?;
        let result = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": text,
                    "reply_parameters": { "message_id": message_id },
                }),
            )
            .await?;

        let reply_id = Self::message_id(&result)
            .ok_or_else(|| ConnectorError::unexpected("No message_id in Telegram response"))?;
        Ok(Outcome::Done(WriteResult::published(
            "telegram",
            format!("{}:{}", chat_id, reply_id),
        )))
    }

    async fn account_analytics(
        &self,
        _access_token: &str,
        options: &Options,
    ) -> ConnectorResult<Outcome<Payload>> {
        let Some(chat_id) = self.chat_of(options) else {
            return Err(ConnectorError::config("chat_id is required for Telegram statistics"));
        };

        let count = self
            .call("getChatMemberCount", json!({ "chat_id": chat_id }))
            .await?;

        let mut stats = Payload::new();
        stats.insert("chat_id".to_string(), Value::String(chat_id));
        stats.insert("member_count".to_string(), count);
        Ok(Outcome::Done(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PollSpec;

    fn connector() -> TelegramConnector {
        let settings = json!({"bot_token": "123456:ABC", "default_chat_id": "-1001"});
        TelegramConnector::from_settings(&settings).unwrap()
    }

    #[test]
    fn bot_token_lives_in_the_path() {
        assert_eq!(
            connector().method_url("getMe"),
            "https://api.telegram.org/bot123456:ABC/getMe"
        );
        assert_eq!(connector().bot_id(), "123456");
    }

    #[test]
    fn single_document_goes_through_send_document() {
        let content = PostContent::text("report")
            .with_media(MediaItem::document("https://files.example/q3.pdf"));
        let (method, body) = TelegramConnector::publication("-1001", &content, &Options::new());

        assert_eq!(method, "sendDocument");
        assert_eq!(body["document"], "https://files.example/q3.pdf");
        assert_eq!(body["caption"], "report");
    }

    #[test]
    fn ok_false_surfaces_description() {
        let err = TelegramConnector::unwrap_result(json!({
            "ok": false,
            "error_code": 403,
            "description": "Forbidden: bot was blocked by the user"
        }))
        .unwrap_err();
        assert_eq!(err.status_code(), Some(403));

        let sent = json!({"ok": true, "result": {"message_id": 5}});
        let result = TelegramConnector::unwrap_result(sent).unwrap();
        assert_eq!(TelegramConnector::message_id(&result).as_deref(), Some("5"));
    }

    #[test]
    fn picks_method_by_content() {
        let options = Options::new();

        let content = PostContent::text("hi").with_link("https://x");
        let (method, body) = TelegramConnector::publication("1", &content, &options);
        assert_eq!(method, "sendMessage");
        assert_eq!(body["text"], "hi\nhttps://x");

        let photo = PostContent::text("cap").with_media(MediaItem::image("https://img/1.png"));
        let (method, body) = TelegramConnector::publication("1", &photo, &options);
        assert_eq!(method, "sendPhoto");
        assert_eq!(body["photo"], "https://img/1.png");
        assert_eq!(body["caption"], "cap");

        let album = photo.with_media(MediaItem::video("https://v/1.mp4"));
        let (method, body) = TelegramConnector::publication("1", &album, &options);
        assert_eq!(method, "sendMediaGroup");
        assert_eq!(body["media"][0]["caption"], "cap");
        assert_eq!(body["media"][1]["type"], "video");
        assert!(body["media"][1].get("caption").is_none());

        let mut poll = PostContent::text("");
        poll.poll = Some(PollSpec {
            question: "Lunch?".into(),
            options: vec!["Yes".into(), "No".into()],
            duration_minutes: 60,
        });
        let (method, body) = TelegramConnector::publication("1", &poll, &options);
        assert_eq!(method, "sendPoll");
        assert_eq!(body["options"][1]["text"], "No");
    }

    #[test]
    fn message_refs_keep_negative_chat_ids() {
        let telegram = connector();
        assert_eq!(
            telegram.message_ref("-1002:77").unwrap(),
            ("-1002".to_string(), "77".to_string())
        );
        assert_eq!(telegram.message_ref("78").unwrap(), ("-1001".to_string(), "78".to_string()));
    }

    #[tokio::test]
    async fn access_token_is_the_bot_token() {
        let token = connector().access_token("auth-data", "https://app/cb", None).await.unwrap();
        assert_eq!(token.access_token, "123456:ABC");
        assert_eq!(token.token_type.as_deref(), Some("bot"));
    }
}
