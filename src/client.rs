//! Общая машинерия коннектора: исполнение запросов, трекер лимитов и классификация

use crate::classify::classify;
use crate::config::Platform;
use crate::error::ConnectorResult;
use crate::http::{HttpExchange, HttpExecutor, HttpMethod, HttpRequest, RequestBody};
use crate::ratelimit::{RateLimitState, RateLimitTracker};
use serde_json::Value;
use tracing::debug;
use url::Url;

/// HTTP-клиент, привязанный к одной платформе.
///
/// Каждый вызов это отдельный независимый обмен; общим между вызовами
/// остаётся только состояние лимитов.
#[derive(Debug)]
pub struct PlatformClient {
    platform: Platform,
    executor: HttpExecutor,
    tracker: RateLimitTracker,
}

impl PlatformClient {
    pub fn new(platform: Platform, timeout_secs: u64) -> ConnectorResult<Self> {
        Ok(PlatformClient {
            platform,
            executor: HttpExecutor::new(timeout_secs)?,
            tracker: RateLimitTracker::new(),
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn rate_limits(&self) -> RateLimitState {
        self.tracker.current()
    }

    /// Выполняет запрос без классификации (нужны заголовки ответа)
    pub async fn exchange(&self, request: HttpRequest) -> ConnectorResult<HttpExchange> {
        debug!("{} {} [{}]", request.method, request.url, self.platform);
        self.executor.execute(request, &self.tracker).await
    }

    pub fn classify(&self, exchange: &HttpExchange) -> ConnectorResult<Value> {
        classify(exchange, self.platform.as_str(), self.tracker.current())
    }

    pub async fn send(&self, request: HttpRequest) -> ConnectorResult<Value> {
        let exchange = self.exchange(request).await?;
        self.classify(&exchange)
    }

    pub async fn get(&self, url: &str, headers: &[String]) -> ConnectorResult<Value> {
        self.send(HttpRequest::get(url).headers(headers.iter().cloned())).await
    }

    pub async fn post_json(
        &self,
        url: &str,
        headers: &[String],
        body: Value,
    ) -> ConnectorResult<Value> {
        self.send(HttpRequest::post(url).headers(headers.iter().cloned()).json(body))
            .await
    }

    pub async fn post_form(
        &self,
        url: &str,
        headers: &[String],
        pairs: &[(&str, &str)],
    ) -> ConnectorResult<Value> {
        self.send(
            HttpRequest::post(url)
                .headers(headers.iter().cloned())
                .body(RequestBody::form(pairs.iter().copied())),
        )
        .await
    }

    pub async fn delete(&self, url: &str, headers: &[String]) -> ConnectorResult<Value> {
        self.send(HttpRequest::delete(url).headers(headers.iter().cloned()))
            .await
    }

    /// Загрузка байтов медиа с классификацией ответа
    pub async fn upload(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[String],
        bytes: Vec<u8>,
    ) -> ConnectorResult<HttpExchange> {
        let exchange = self
            .executor
            .upload(method, url, headers, bytes, &self.tracker)
            .await?;
        self.classify(&exchange)?;
        Ok(exchange)
    }

    pub async fn download(&self, url: &str) -> ConnectorResult<Vec<u8>> {
        self.executor.download(url).await
    }
}

/// Добавляет query-параметры к URL
pub fn with_query(base: &str, params: &[(&str, &str)]) -> ConnectorResult<String> {
    Ok(Url::parse_with_params(base, params)?.into())
}

/// Кодирует один сегмент пути (URN, идентификаторы с двоеточиями)
pub fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_query_strings() {
        let url = with_query(
            "https://graph.facebook.com/v18.0/me",
            &[("fields", "id,name"), ("access_token", "a b")],
        )
        .unwrap();
        assert_eq!(url, "https://graph.facebook.com/v18.0/me?fields=id%2Cname&access_token=a+b");
    }

    #[test]
    fn encodes_urn_segments() {
        assert_eq!(encode_segment("urn:li:share:123"), "urn%3Ali%3Ashare%3A123");
    }

    #[test]
    fn fresh_client_has_zero_rate_limits() {
        let client = PlatformClient::new(Platform::Slack, 30).unwrap();
        assert_eq!(client.rate_limits(), RateLimitState::default());
        assert_eq!(client.platform(), Platform::Slack);
    }
}
