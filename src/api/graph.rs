//! Общие части Graph API для Facebook и Instagram

use crate::client::{with_query, PlatformClient};
use crate::error::ConnectorResult;
use crate::models::{Payload, TokenEnvelope};
use serde_json::Value;

pub const GRAPH_URL: &str = "https://graph.facebook.com";
pub const DEFAULT_API_VERSION: &str = "v18.0";

pub fn default_graph_url() -> String {
    GRAPH_URL.to_string()
}

pub fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

pub fn dialog_url(api_version: &str) -> String {
    format!("https://www.facebook.com/{}/dialog/oauth", api_version)
}

#[derive(Debug, Clone)]
pub struct GraphApi {
    base: String,
    app_id: String,
    app_secret: String,
}

impl GraphApi {
    pub fn new(graph_url: &str, api_version: &str, app_id: &str, app_secret: &str) -> Self {
        GraphApi {
            base: format!("{}/{}", graph_url.trim_end_matches('/'), api_version),
            app_id: app_id.to_string(),
            app_secret: app_secret.to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    pub fn query(&self, path: &str, params: &[(&str, &str)]) -> ConnectorResult<String> {
        with_query(&self.url(path), params)
    }

    pub async fn exchange_code(
        &self,
        client: &PlatformClient,
        code: &str,
        redirect_uri: &str,
    ) -> ConnectorResult<TokenEnvelope> {
        let url = self.query(
            "oauth/access_token",
            &[
                ("client_id", self.app_id.as_str()),
                ("client_secret", self.app_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("code", code),
            ],
        )?;
        TokenEnvelope::from_response(client.get(&url, &[]).await?)
    }

    /// Короткоживущий токен меняется на долгоживущий (около 60 дней)
    pub async fn extend_token(
        &self,
        client: &PlatformClient,
        token: &str,
    ) -> ConnectorResult<TokenEnvelope> {
        let url = self.query(
            "oauth/access_token",
            &[
                ("grant_type", "fb_exchange_token"),
                ("client_id", self.app_id.as_str()),
                ("client_secret", self.app_secret.as_str()),
                ("fb_exchange_token", token),
            ],
        )?;
        TokenEnvelope::from_response(client.get(&url, &[]).await?)
    }
}

/// `{"data": [{"name": "...", "values": [{"value": ..}]}]}` → `{name: value}`
pub fn insights_to_map(body: &Value) -> Payload {
    let mut metrics = Payload::new();

    let Some(entries) = body.get("data").and_then(Value::as_array) else {
        return metrics;
    };

    for entry in entries {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        let value = entry
            .pointer("/values/0/value")
            .or_else(|| entry.pointer("/total_value/value"))
            .cloned()
            .unwrap_or(Value::Null);
        metrics.insert(name.to_string(), value);
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_insights() {
        let body = json!({
            "data": [
                {"name": "post_impressions", "period": "lifetime", "values": [{"value": 120}]},
                {"name": "reach", "total_value": {"value": 80}},
                {"name": "broken"},
                {"values": [{"value": 1}]}
            ]
        });

        let metrics = insights_to_map(&body);
        assert_eq!(metrics["post_impressions"], 120);
        assert_eq!(metrics["reach"], 80);
        assert_eq!(metrics["broken"], Value::Null);
        assert_eq!(metrics.len(), 3);
    }

    #[test]
    fn builds_versioned_urls() {
        let graph = GraphApi::new("https://graph.facebook.com/", "v18.0", "a", "s");
        assert_eq!(graph.url("/me/accounts"), "https://graph.facebook.com/v18.0/me/accounts");
        assert_eq!(dialog_url("v18.0"), "https://www.facebook.com/v18.0/dialog/oauth");
    }
}
