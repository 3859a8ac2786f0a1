use crate::error::{ConnectorError, ConnectorResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Декодированный JSON-объект ответа
pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformCapability {
    Text,
    Image,
    Video,
    Embed,
    File,
    Story,
    Reel,
    Poll,
    Document,
    Link,
    Article,
    Carousel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Social,
    Messaging,
    Professional,
    Blog,
    Video,
    Visual,
    Community,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    pub kind: MediaKind,
}

impl MediaItem {
    pub fn image(url: impl Into<String>) -> Self {
        MediaItem {
            url: url.into(),
            kind: MediaKind::Image,
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        MediaItem {
            url: url.into(),
            kind: MediaKind::Video,
        }
    }

    pub fn document(url: impl Into<String>) -> Self {
        MediaItem {
            url: url.into(),
            kind: MediaKind::Document,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSpec {
    pub question: String,
    pub options: Vec<String>,
    #[serde(default = "default_poll_minutes")]
    pub duration_minutes: u32,
}

fn default_poll_minutes() -> u32 {
    1440
}

/// Универсальное содержимое публикации
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostContent {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub poll: Option<PollSpec>,
}

impl PostContent {
    pub fn text(text: impl Into<String>) -> Self {
        PostContent {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_media(mut self, item: MediaItem) -> Self {
        self.media.push(item);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn first_media(&self, kind: MediaKind) -> Option<&MediaItem> {
        self.media.iter().find(|item| item.kind == kind)
    }

    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }
}

/// Открытый набор параметров конкретной платформы (`channel_id`, `board_id`, `page_id`, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(pub Payload);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Строковое значение; числа приводятся к строке (ID часто приходят числами)
    pub fn str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn require_str(&self, key: &str) -> Result<String, String> {
        self.str(key).ok_or_else(|| format!("{} is required", key))
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key)?.as_bool()
    }
}

/// Базовые сведения об авторизованном аккаунте
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub platform: String,
    /// Исходный ответ платформы
    pub raw: Value,
}

impl Profile {
    /// Собирает профиль из JSON по указателям полей (RFC 6901)
    pub fn from_pointers(
        platform: &str,
        raw: Value,
        id: &str,
        name: &str,
        username: &str,
        avatar: &str,
    ) -> ConnectorResult<Self> {
        let id = value_as_string(raw.pointer(id))
            .ok_or_else(|| {
                ConnectorError::unexpected(format!("No {} in {} profile", id, platform))
            })?;

        Ok(Profile {
            id,
            name: value_as_string(raw.pointer(name)),
            username: value_as_string(raw.pointer(username)),
            email: None,
            avatar_url: value_as_string(raw.pointer(avatar)),
            platform: platform.to_string(),
            raw,
        })
    }
}

/// Набор токенов после обмена кода или обновления
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenEnvelope {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default)]
    pub raw: Value,
}

impl TokenEnvelope {
    /// Разбирает стандартный ответ token endpoint (поля на верхнем уровне)
    pub fn from_response(raw: Value) -> ConnectorResult<Self> {
        Self::from_object(raw.clone(), &raw)
    }

    /// Для платформ, вкладывающих токены внутрь (`data`, `result`)
    pub fn from_object(raw: Value, object: &Value) -> ConnectorResult<Self> {
        let access_token = value_as_string(object.get("access_token"))
            .ok_or_else(|| ConnectorError::unexpected("No access_token in token response"))?;

        Ok(TokenEnvelope {
            access_token,
            refresh_token: value_as_string(object.get("refresh_token")),
            expires_in: object.get("expires_in").and_then(value_as_i64),
            token_type: value_as_string(object.get("token_type")),
            scope: value_as_string(object.get("scope")),
            raw,
        })
    }

    /// Тот же токен без изменений (для платформ с бессрочными токенами)
    pub fn echo(token: &str) -> Self {
        TokenEnvelope {
            access_token: token.to_string(),
            refresh_token: Some(token.to_string()),
            ..Default::default()
        }
    }
}

/// Результат операции записи: `{success, post_id?, error?}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Payload,
}

impl WriteResult {
    pub fn published(platform: &str, post_id: impl Into<String>) -> Self {
        WriteResult {
            success: true,
            post_id: Some(post_id.into()),
            platform: Some(platform.to_string()),
            ..Default::default()
        }
    }

    pub fn sent(platform: &str, message_id: impl Into<String>) -> Self {
        WriteResult {
            success: true,
            message_id: Some(message_id.into()),
            platform: Some(platform.to_string()),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        WriteResult {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Причина, по которой платформа не поддерживает операцию
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsupported {
    Scheduling,
    DirectMessaging,
    Messages,
    ConnectedAccounts,
    AudienceInsights,
    Deletion,
    Comments,
    CommentReplies,
    PostAnalytics,
    AccountAnalytics,
    /// Причина, специфичная для платформы
    Platform(&'static str),
}

impl Unsupported {
    pub fn message(&self) -> &'static str {
        match self {
            Unsupported::Scheduling => "Scheduling not supported for this platform",
            Unsupported::DirectMessaging => "Direct messaging not supported for this platform",
            Unsupported::Messages => "Reading messages not supported for this platform",
            Unsupported::ConnectedAccounts => "Connected accounts not supported for this platform",
            Unsupported::AudienceInsights => "Audience insights not supported for this platform",
            Unsupported::Deletion => "Deleting posts not supported for this platform",
            Unsupported::Comments => "Comments not supported for this platform",
            Unsupported::CommentReplies => "Comment replies not supported for this platform",
            Unsupported::PostAnalytics => "Post analytics not supported for this platform",
            Unsupported::AccountAnalytics => "Account analytics not supported for this platform",
            Unsupported::Platform(reason) => reason,
        }
    }
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Итог необязательной операции: выполнена или недоступна на платформе
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Unsupported(Unsupported),
}

impl<T> Outcome<T> {
    pub fn is_supported(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(value) => Some(value),
            Outcome::Unsupported(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(value) => Outcome::Done(f(value)),
            Outcome::Unsupported(reason) => Outcome::Unsupported(reason),
        }
    }
}

impl<T: Default> Outcome<T> {
    /// Пустой список/объект для недоступных операций
    pub fn unwrap_or_default(self) -> T {
        self.done().unwrap_or_default()
    }
}

impl Outcome<WriteResult> {
    /// `{success: false, error: <причина>}` для недоступных операций
    pub fn into_write_result(self) -> WriteResult {
        match self {
            Outcome::Done(result) => result,
            Outcome::Unsupported(reason) => WriteResult::failure(reason.message()),
        }
    }
}

impl<T: Serialize> Outcome<T> {
    pub fn to_json(&self) -> ConnectorResult<Value> {
        match self {
            Outcome::Done(value) => Ok(serde_json::to_value(value)?),
            Outcome::Unsupported(reason) => Ok(serde_json::json!({
                "success": false,
                "supported": false,
                "error": reason.message(),
            })),
        }
    }
}

pub fn value_as_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Элементы списка из поля ответа (`data`, `items`, `elements`, ...)
pub fn list_at(body: &Value, pointer: &str) -> Vec<Value> {
    body.pointer(pointer)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Объект ответа или пустой объект
pub fn object_of(body: Value) -> Payload {
    match body {
        Value::Object(map) => map,
        other => {
            let mut map = Payload::new();
            map.insert("data".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unsupported_write_results_carry_exact_messages() {
        let scheduling: Outcome<WriteResult> = Outcome::Unsupported(Unsupported::Scheduling);
        assert_eq!(
            serde_json::to_value(scheduling.into_write_result()).unwrap(),
            json!({"success": false, "error": "Scheduling not supported for this platform"})
        );

        let dm: Outcome<WriteResult> = Outcome::Unsupported(Unsupported::DirectMessaging);
        assert_eq!(
            serde_json::to_value(dm.into_write_result()).unwrap(),
            json!({"success": false, "error": "Direct messaging not supported for this platform"})
        );
    }

    #[test]
    fn published_result_shape() {
        let result = WriteResult::published("facebook", "123");
        assert_eq!(
            serde_json::to_value(result).unwrap(),
            json!({"success": true, "post_id": "123", "platform": "facebook"})
        );
    }

    #[test]
    fn unsupported_lists_default_to_empty() {
        let accounts: Outcome<Vec<Value>> = Outcome::Unsupported(Unsupported::ConnectedAccounts);
        assert!(accounts.unwrap_or_default().is_empty());
        let insights: Outcome<Payload> = Outcome::Unsupported(Unsupported::AudienceInsights);
        assert!(insights.unwrap_or_default().is_empty());
    }

    #[test]
    fn token_envelope_requires_access_token() {
        let token = TokenEnvelope::from_response(json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": "3600",
            "token_type": "bearer"
        }))
        .unwrap();
        assert_eq!(token.access_token, "at");
        assert_eq!(token.refresh_token.as_deref(), Some("rt"));
        assert_eq!(token.expires_in, Some(3600));

        assert!(TokenEnvelope::from_response(json!({"error": "nope"})).is_err());
    }

    #[test]
    fn options_coerce_numbers_to_strings() {
        let options = Options::new()
            .with("channel_id", 12345)
            .with("page_id", "p1")
            .with("empty", "");
        assert_eq!(options.str("channel_id").as_deref(), Some("12345"));
        assert_eq!(options.str("page_id").as_deref(), Some("p1"));
        assert_eq!(options.str("empty"), None);
        assert_eq!(options.require_str("board_id").unwrap_err(), "board_id is required");
    }

    #[test]
    fn profile_from_pointers() {
        let profile = Profile::from_pointers(
            "discord",
            json!({"id": "42", "global_name": "Ann", "username": "ann"}),
            "/id",
            "/global_name",
            "/username",
            "/avatar",
        )
        .unwrap();
        assert_eq!(profile.id, "42");
        assert_eq!(profile.name.as_deref(), Some("Ann"));
        assert_eq!(profile.avatar_url, None);
    }
}
