pub mod headers;

use crate::error::{ConnectorError, ConnectorResult};
use crate::ratelimit::RateLimitTracker;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error};

const USER_AGENT: &str = "socon/0.2";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const JSON_MIME: &str = "application/json";
const FORM_MIME: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Тело запроса до кодирования
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Структурированное значение, кодируется в JSON
    Json(Value),
    /// Пары для application/x-www-form-urlencoded
    Form(Vec<(String, String)>),
    /// Готовые байты, отправляются как есть
    Raw(Vec<u8>),
}

impl RequestBody {
    pub fn form<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        RequestBody::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<String>,
    pub body: RequestBody,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        HttpRequest {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn header(mut self, line: impl Into<String>) -> Self {
        self.headers.push(line.into());
        self
    }

    pub fn headers<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn json(self, value: Value) -> Self {
        self.body(RequestBody::Json(value))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Одна пара запрос/ответ. Статус не интерпретируется.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    pub method: HttpMethod,
    pub url: String,
    pub request_headers: Vec<String>,
    /// Закодированное тело; для загрузки медиа не сохраняется
    pub request_body: Option<Vec<u8>>,
    pub status: u16,
    pub response_headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpExchange {
    /// Значение заголовка ответа без учёта регистра; при дублях берётся последний
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .rev()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

#[derive(Debug, PartialEq)]
pub(crate) struct EncodedBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<&'static str>,
}

/// Кодирует тело в зависимости от метода.
///
/// POST отправляет строку как есть, а структуру кодирует в JSON.
/// PUT кодирует в JSON всегда, даже готовую строку.
pub(crate) fn encode_body(
    method: HttpMethod,
    body: &RequestBody,
) -> ConnectorResult<Option<EncodedBody>> {
    let encoded = match (method, body) {
        (_, RequestBody::Empty) | (HttpMethod::Get, _) => None,

        (HttpMethod::Put, RequestBody::Json(value)) => Some(json_body(serde_json::to_vec(value)?)),
        (HttpMethod::Put, RequestBody::Raw(bytes)) => {
            let text = String::from_utf8_lossy(bytes);
            Some(json_body(serde_json::to_vec(&text)?))
        }
        (HttpMethod::Put, RequestBody::Form(pairs)) => {
            Some(json_body(serde_json::to_vec(&form_encode(pairs))?))
        }

        (_, RequestBody::Json(Value::String(raw))) => Some(EncodedBody {
            bytes: raw.clone().into_bytes(),
            content_type: None,
        }),
        (_, RequestBody::Json(value)) => Some(json_body(serde_json::to_vec(value)?)),
        (_, RequestBody::Form(pairs)) => Some(EncodedBody {
            bytes: form_encode(pairs).into_bytes(),
            content_type: Some(FORM_MIME),
        }),
        (_, RequestBody::Raw(bytes)) => Some(EncodedBody {
            bytes: bytes.clone(),
            content_type: None,
        }),
    };

    Ok(encoded)
}

fn json_body(bytes: Vec<u8>) -> EncodedBody {
    EncodedBody {
        bytes,
        content_type: Some(JSON_MIME),
    }
}

pub fn form_encode(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter())
        .finish()
}

/// Строит карту заголовков; при совпадении имён побеждает последний
fn header_map(lines: &[String]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for line in lines {
        if let Some((name, value)) = headers::parse_line(line) {
            map.insert(name, value);
        }
    }
    map
}

/// Выполняет ровно один HTTP-запрос и возвращает сырой обмен
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    http_client: Client,
    timeout: Duration,
}

impl HttpExecutor {
    pub fn new(timeout_secs: u64) -> ConnectorResult<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(HttpExecutor { http_client, timeout })
    }

    pub async fn execute(
        &self,
        request: HttpRequest,
        tracker: &RateLimitTracker,
    ) -> ConnectorResult<HttpExchange> {
        let encoded = encode_body(request.method, &request.body)?;
        let mut header_map = header_map(&request.headers);

        let request_body = encoded.map(|body| {
            if let Some(mime) = body.content_type {
                if !header_map.contains_key(CONTENT_TYPE) {
                    header_map.insert(CONTENT_TYPE, HeaderValue::from_static(mime));
                }
            }
            body.bytes
        });

        let timeout = request.timeout.unwrap_or(self.timeout);
        let (status, response_headers, body) = self
            .send(request.method, &request.url, header_map, request_body.clone(), timeout, tracker)
            .await?;

        Ok(HttpExchange {
            method: request.method,
            url: request.url,
            request_headers: request.headers,
            request_body,
            status,
            response_headers,
            body,
        })
    }

    /// Отправляет байты медиа без перекодирования (resumable/chunked загрузки)
    pub async fn upload(
        &self,
        method: HttpMethod,
        url: &str,
        header_lines: &[String],
        bytes: Vec<u8>,
        tracker: &RateLimitTracker,
    ) -> ConnectorResult<HttpExchange> {
        debug!("Uploading {} bytes via {} {}", bytes.len(), method, url);

        let (status, response_headers, body) = self
            .send(method, url, header_map(header_lines), Some(bytes), self.timeout, tracker)
            .await?;

        Ok(HttpExchange {
            method,
            url: url.to_string(),
            request_headers: header_lines.to_vec(),
            request_body: None,
            status,
            response_headers,
            body,
        })
    }

    /// Скачивает медиа по публичному URL для повторной загрузки на платформу
    pub async fn download(&self, url: &str) -> ConnectorResult<Vec<u8>> {
        debug!("Downloading media from: {}", url);
        url::Url::parse(url)?;

        let response = self.http_client.get(url).send().await.map_err(|e| {
            error!("Failed to download media from {}: {}", url, e);
            ConnectorError::Transport(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            error!("Media download returned status: {}", status);
            return Err(ConnectorError::api(status.as_u16(), "Failed to download media"));
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        header_map: HeaderMap,
        body: Option<Vec<u8>>,
        timeout: Duration,
        tracker: &RateLimitTracker,
    ) -> ConnectorResult<(u16, Vec<(String, String)>, String)> {
        url::Url::parse(url)?;

        let mut builder = self
            .http_client
            .request(method.into(), url)
            .headers(header_map)
            .timeout(timeout);
        if let Some(bytes) = body {
            builder = builder.body(bytes);
        }

        let response = builder.send().await.map_err(|e| {
            error!("{} {} failed: {}", method, url, e);
            ConnectorError::Transport(e)
        })?;

        let status = response.status().as_u16();

        // Заголовки отдаются трекеру до чтения тела
        let mut response_headers = Vec::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            tracker.observe(&format!("{}: {}", name, value));
            response_headers.push((name.as_str().to_string(), value));
        }

        let body = response.text().await.map_err(|e| {
            error!("Failed to read response body from {}: {}", url, e);
            ConnectorError::Transport(e)
        })?;

        Ok((status, response_headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encoded(method: HttpMethod, body: RequestBody) -> Option<EncodedBody> {
        encode_body(method, &body).unwrap()
    }

    #[test]
    fn post_encodes_structures_and_keeps_raw_strings() {
        let body = encoded(HttpMethod::Post, RequestBody::Json(json!({"a": 1}))).unwrap();
        assert_eq!(body.bytes, br#"{"a":1}"#.to_vec());
        assert_eq!(body.content_type, Some(JSON_MIME));

        let body = encoded(HttpMethod::Post, RequestBody::Json(json!("grant_type=x"))).unwrap();
        assert_eq!(body.bytes, b"grant_type=x".to_vec());
        assert_eq!(body.content_type, None);
    }

    #[test]
    fn put_always_encodes_json() {
        let body = encoded(HttpMethod::Put, RequestBody::Json(json!("plain"))).unwrap();
        assert_eq!(body.bytes, br#""plain""#.to_vec());

        let body = encoded(HttpMethod::Put, RequestBody::Raw(b"raw".to_vec())).unwrap();
        assert_eq!(body.bytes, br#""raw""#.to_vec());
        assert_eq!(body.content_type, Some(JSON_MIME));
    }

    #[test]
    fn form_bodies_are_url_encoded_for_post() {
        let body = encoded(
            HttpMethod::Post,
            RequestBody::form([("code", "a b"), ("redirect_uri", "https://x/cb?y=1")]),
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(body.bytes).unwrap(),
            "code=a+b&redirect_uri=https%3A%2F%2Fx%2Fcb%3Fy%3D1"
        );
        assert_eq!(body.content_type, Some(FORM_MIME));
    }

    #[test]
    fn get_and_empty_bodies_send_nothing() {
        assert_eq!(encoded(HttpMethod::Get, RequestBody::Json(json!({"a": 1}))), None);
        assert_eq!(encoded(HttpMethod::Delete, RequestBody::Empty), None);
    }

    #[test]
    fn last_duplicate_header_wins() {
        let map = header_map(&[
            "Accept: text/plain".to_string(),
            "X-Custom: 1".to_string(),
            "accept: application/json".to_string(),
        ]);
        assert_eq!(map.get("accept").unwrap(), "application/json");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn exchange_header_lookup_is_case_insensitive() {
        let exchange = HttpExchange {
            method: HttpMethod::Post,
            url: "https://example.com".into(),
            request_headers: vec![],
            request_body: None,
            status: 201,
            response_headers: vec![("location".into(), "https://upload/1".into())],
            body: String::new(),
        };
        assert_eq!(exchange.header("Location"), Some("https://upload/1"));
        assert!(exchange.is_success());
    }
}
