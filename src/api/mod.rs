pub mod discord;
pub mod facebook;
pub mod graph;
pub mod instagram;
pub mod linkedin;
pub mod medium;
pub mod pinterest;
pub mod reddit;
pub mod slack;
pub mod telegram;
pub mod tiktok;
pub mod twitter;
pub mod wordpress;
pub mod youtube;

use crate::config::{ConnectorSettings, Platform};
use crate::error::{ConnectorError, ConnectorResult};
use crate::models::{
    Options, Outcome, Payload, PlatformCapability, PlatformType, PostContent, Profile,
    TokenEnvelope, Unsupported, WriteResult,
};
use crate::oauth::AuthorizationRequest;
use crate::ratelimit::RateLimitState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

/// Единый интерфейс к социальным платформам.
///
/// Обязательные операции реализует каждая платформа. Остальные по
/// умолчанию сообщают, что возможность отсутствует, не делая запросов.
#[async_trait]
pub trait Connector: Send + Sync {
    fn platform(&self) -> Platform;

    fn platform_name(&self) -> &'static str {
        self.platform().as_str()
    }

    fn platform_type(&self) -> PlatformType;

    fn supported_content_types(&self) -> &'static [PlatformCapability];

    /// Последние известные лимиты этого экземпляра
    fn rate_limits(&self) -> RateLimitState;

    /// Заполнены ли обязательные учётные данные
    fn is_configured(&self) -> bool;

    /// URL авторизации OAuth со свежим state
    fn authorization_url(
        &self,
        redirect_uri: &str,
        scopes: &[String],
    ) -> ConnectorResult<AuthorizationRequest>;

    /// Обменивает код авторизации на токены
    async fn access_token(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> ConnectorResult<TokenEnvelope>;

    async fn profile(&self, access_token: &str) -> ConnectorResult<Profile>;

    async fn publish_post(
        &self,
        access_token: &str,
        content: &PostContent,
        options: &Options,
    ) -> ConnectorResult<WriteResult>;

    async fn refresh_token(&self, refresh_token: &str) -> ConnectorResult<TokenEnvelope> {
        Ok(TokenEnvelope::echo(refresh_token))
    }

    /// Отзыв токена никогда не возвращает ошибку: при сбое возвращается `false`
    async fn revoke_token(&self, _access_token: &str) -> bool {
        true
    }

    async fn connected_accounts(
        &self,
        _access_token: &str,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        Ok(Outcome::Unsupported(Unsupported::ConnectedAccounts))
    }

    async fn schedule_post(
        &self,
        _access_token: &str,
        _content: &PostContent,
        _publish_at: DateTime<Utc>,
        _options: &Options,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        Ok(Outcome::Unsupported(Unsupported::Scheduling))
    }

    async fn audience_insights(
        &self,
        _access_token: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<Payload>> {
        Ok(Outcome::Unsupported(Unsupported::AudienceInsights))
    }

    async fn messages(
        &self,
        _access_token: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        Ok(Outcome::Unsupported(Unsupported::Messages))
    }

    async fn send_message(
        &self,
        _access_token: &str,
        _recipient: &str,
        _text: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        Ok(Outcome::Unsupported(Unsupported::DirectMessaging))
    }

    /// Удаление мягкое: ошибки платформы превращаются в `Done(false)`
    async fn delete_post(
        &self,
        _access_token: &str,
        _post_id: &str,
    ) -> ConnectorResult<Outcome<bool>> {
        Ok(Outcome::Unsupported(Unsupported::Deletion))
    }

    async fn comments(
        &self,
        _access_token: &str,
        _post_id: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<Vec<Value>>> {
        Ok(Outcome::Unsupported(Unsupported::Comments))
    }

    async fn reply_to_comment(
        &self,
        _access_token: &str,
        _comment_id: &str,
        _text: &str,
    ) -> ConnectorResult<Outcome<WriteResult>> {
        Ok(Outcome::Unsupported(Unsupported::CommentReplies))
    }

    async fn post_analytics(
        &self,
        _access_token: &str,
        _post_id: &str,
    ) -> ConnectorResult<Outcome<Payload>> {
        Ok(Outcome::Unsupported(Unsupported::PostAnalytics))
    }

    async fn account_analytics(
        &self,
        _access_token: &str,
        _options: &Options,
    ) -> ConnectorResult<Outcome<Payload>> {
        Ok(Outcome::Unsupported(Unsupported::AccountAnalytics))
    }
}

/// Превращает ошибку в мягкий результат для операций с таким контрактом
pub(crate) fn soft<T>(
    platform: Platform,
    operation: &str,
    result: ConnectorResult<T>,
    fallback: T,
) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("{} {} failed, degrading to soft result: {}", platform, operation, e);
            fallback
        }
    }
}

/// Фабрика коннекторов по идентификатору платформы
pub fn create_connector(
    platform: Platform,
    settings: &Value,
) -> ConnectorResult<Box<dyn Connector>> {
    debug!("Creating {} connector", platform);

    let connector: Box<dyn Connector> = match platform {
        Platform::Discord => Box::new(discord::DiscordConnector::from_settings(settings)?),
        Platform::Facebook => Box::new(facebook::FacebookConnector::from_settings(settings)?),
        Platform::Instagram => Box::new(instagram::InstagramConnector::from_settings(settings)?),
        Platform::Linkedin => Box::new(linkedin::LinkedinConnector::from_settings(settings)?),
        Platform::Medium => Box::new(medium::MediumConnector::from_settings(settings)?),
        Platform::Pinterest => Box::new(pinterest::PinterestConnector::from_settings(settings)?),
        Platform::Reddit => Box::new(reddit::RedditConnector::from_settings(settings)?),
        Platform::Slack => Box::new(slack::SlackConnector::from_settings(settings)?),
        Platform::Telegram => Box::new(telegram::TelegramConnector::from_settings(settings)?),
        Platform::Tiktok => Box::new(tiktok::TiktokConnector::from_settings(settings)?),
        Platform::Twitter => Box::new(twitter::TwitterConnector::from_settings(settings)?),
        Platform::Wordpress => Box::new(wordpress::WordpressConnector::from_settings(settings)?),
        Platform::Youtube => Box::new(youtube::YoutubeConnector::from_settings(settings)?),
    };

    Ok(connector)
}

impl ConnectorSettings {
    /// Строит коннектор из настроек, переданных для платформы
    pub fn connector(&self, platform: Platform) -> ConnectorResult<Box<dyn Connector>> {
        let settings = self
            .get(platform)
            .ok_or_else(|| {
                ConnectorError::Config(format!("No settings for platform {}", platform))
            })?;
        create_connector(platform, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn factory_rejects_missing_mandatory_fields() {
        let err = create_connector(Platform::Discord, &json!({"client_id": "1"})).err().unwrap();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn factory_builds_every_platform() {
        let settings = json!({
            "client_id": "id",
            "client_secret": "secret",
            "client_key": "key",
            "app_id": "app",
            "app_secret": "app-secret",
            "bot_token": "123456:ABC"
        });

        for platform in Platform::ALL {
            let connector = create_connector(platform, &settings).unwrap();
            assert_eq!(connector.platform(), platform);
            assert_eq!(connector.platform_name(), platform.as_str());
            assert!(!connector.supported_content_types().is_empty());
            assert_eq!(connector.rate_limits(), RateLimitState::default());
        }
    }

    #[test]
    fn settings_build_connectors_by_identifier() {
        let settings = ConnectorSettings::from_value(json!({
            "telegram": {"bot_token": "123456:ABC"}
        }))
        .unwrap();

        let telegram = settings.connector(Platform::Telegram).unwrap();
        assert!(telegram.is_configured());
        assert!(settings.connector(Platform::Slack).is_err());
    }
}
