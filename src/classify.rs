//! Классификация завершённого HTTP-обмена: успешное тело или ошибка API

use crate::error::{ConnectorError, ConnectorResult};
use crate::http::HttpExchange;
use crate::ratelimit::RateLimitState;
use serde_json::{Map, Value};
use tracing::debug;

const FALLBACK_MESSAGE: &str = "API error";

/// Декодирует тело ответа; невалидный JSON превращается в пустой объект
pub fn decode_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::Object(Map::new()))
}

/// Ищет сообщение об ошибке: `error.message`, `error`, `message`, иначе "API error"
pub fn resolve_error_message(body: &Value) -> String {
    let candidates = [
        body.pointer("/error/message"),
        body.get("error"),
        body.get("message"),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|message| !message.is_empty())
        .unwrap_or(FALLBACK_MESSAGE)
        .to_string()
}

pub fn classify(
    exchange: &HttpExchange,
    platform: &str,
    rate_limits: RateLimitState,
) -> ConnectorResult<Value> {
    debug!(
        platform,
        method = %exchange.method,
        url = %exchange.url,
        status = exchange.status,
        rate_limit_remaining = rate_limits.remaining,
        "Platform API exchange completed"
    );

    let decoded = decode_body(&exchange.body);

    if exchange.status >= 400 {
        return Err(ConnectorError::api(exchange.status, resolve_error_message(&decoded)));
    }

    Ok(decoded)
}
