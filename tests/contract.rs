use serde_json::{json, Value};
use socon::api::create_connector;
use socon::client::PlatformClient;
use socon::http::HttpRequest;
use socon::models::{Options, Outcome, PostContent, Unsupported};
use socon::ratelimit::{RateLimitState, RateLimitTracker};
use socon::{Connector, ConnectorError, Platform};
use std::collections::HashMap;
use url::Url;
use wiremock::matchers::{any, body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn discord(server: &MockServer) -> Box<dyn Connector> {
    create_connector(
        Platform::Discord,
        &json!({
            "client_id": "cid",
            "client_secret": "secret",
            "bot_token": "bot",
            "default_channel_id": "c1",
            "api_url": server.uri(),
        }),
    )
    .unwrap()
}

fn medium(api_url: &str) -> Box<dyn Connector> {
    create_connector(
        Platform::Medium,
        &json!({"client_id": "cid", "client_secret": "secret", "api_url": api_url}),
    )
    .unwrap()
}

#[test]
fn rate_limit_tracker_keeps_last_values_case_insensitively() {
    let tracker = RateLimitTracker::new();
    for line in [
        "X-RateLimit-Remaining: 10",
        "Content-Type: application/json",
        "x-ratelimit-reset: 1700000000",
        "X-RATELIMIT-REMAINING: 7",
        "X-Request-Id: abc",
        "X-RateLimit-Reset: 1700000600",
    ] {
        tracker.observe(line);
    }

    assert_eq!(
        tracker.current(),
        RateLimitState {
            remaining: 7,
            reset_at: 1700000600
        }
    );
}

#[tokio::test]
async fn status_threshold_is_400() {
    let server = MockServer::start().await;
    Mock::given(path("/ok"))
        .respond_with(ResponseTemplate::new(399).set_body_json(json!({"fine": true})))
        .mount(&server)
        .await;
    Mock::given(path("/bad"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "bad request"})))
        .mount(&server)
        .await;

    let client = PlatformClient::new(Platform::Slack, 5).unwrap();
    let ok = client.get(&format!("{}/ok", server.uri()), &[]).await.unwrap();
    assert_eq!(ok["fine"], true);

    let err = client.get(&format!("{}/bad", server.uri()), &[]).await.unwrap_err();
    assert!(
        matches!(err, ConnectorError::Api { code: 400, ref message } if message == "bad request")
    );
}

#[tokio::test]
async fn malformed_bodies_are_classified_by_status() {
    let server = MockServer::start().await;
    Mock::given(path("/html-ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>hello</html>"))
        .mount(&server)
        .await;
    Mock::given(path("/html-error"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
        .mount(&server)
        .await;

    let client = PlatformClient::new(Platform::Reddit, 5).unwrap();
    let ok = client.get(&format!("{}/html-ok", server.uri()), &[]).await.unwrap();
    assert_eq!(ok, json!({}));

    let err = client.get(&format!("{}/html-error", server.uri()), &[]).await.unwrap_err();
    assert!(
        matches!(err, ConnectorError::Api { code: 502, ref message } if message == "API error")
    );
}

#[tokio::test]
async fn unsupported_defaults_have_exact_shape() {
    let connector = medium("https://api.medium.com/v1");

    let sent = connector
        .send_message("t", "someone", "hi", &Options::new())
        .await
        .unwrap()
        .into_write_result();
    assert_eq!(
        serde_json::to_value(&sent).unwrap(),
        json!({"success": false, "error": "Direct messaging not supported for this platform"})
    );

    let scheduled = connector
        .schedule_post("t", &PostContent::text("later"), chrono::Utc::now(), &Options::new())
        .await
        .unwrap()
        .into_write_result();
    assert_eq!(
        serde_json::to_value(&scheduled).unwrap(),
        json!({"success": false, "error": "Scheduling not supported for this platform"})
    );
}

#[test]
fn every_authorization_url_gets_fresh_state() {
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
        let first = connector.authorization_url("https://app.example/callback", &[]).unwrap();
        let second = connector.authorization_url("https://app.example/callback", &[]).unwrap();

        assert_ne!(first.state, second.state, "{} reused state", platform);
        assert_eq!(first.state.len(), 32);
    }
}

#[tokio::test]
async fn post_sends_raw_strings_verbatim_but_put_always_encodes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/raw"))
        .and(body_string("already=encoded"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"via": "post"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/structured"))
        .and(body_string(r#"{"a":1}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"via": "post-json"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/raw"))
        .and(body_string(r#""already=encoded""#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"via": "put"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = PlatformClient::new(Platform::Linkedin, 5).unwrap();
    let raw = Value::String("already=encoded".into());

    let post = client
        .send(HttpRequest::post(format!("{}/raw", server.uri())).json(raw.clone()))
        .await
        .unwrap();
    assert_eq!(post["via"], "post");

    let structured = client
        .send(HttpRequest::post(format!("{}/structured", server.uri())).json(json!({"a": 1})))
        .await
        .unwrap();
    assert_eq!(structured["via"], "post-json");

    let put = client
        .send(HttpRequest::put(format!("{}/raw", server.uri())).json(raw))
        .await
        .unwrap();
    assert_eq!(put["via"], "put");
}

#[tokio::test]
async fn successful_publish_reports_post_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v18.0/page1/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "123"})))
        .expect(1)
        .mount(&server)
        .await;

    let facebook = create_connector(
        Platform::Facebook,
        &json!({"app_id": "app", "app_secret": "secret", "graph_url": server.uri()}),
    )
    .unwrap();
    let options = Options::new()
        .with("page_id", "page1")
        .with("page_access_token", "page-token");

    let result = facebook
        .publish_post("user-token", &PostContent::text("hello"), &options)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.post_id.as_deref(), Some("123"));
    assert_eq!(result.platform.as_deref(), Some("facebook"));
}

#[tokio::test]
async fn throttled_call_updates_rate_limits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/@me"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("X-RateLimit-Remaining", "0")
                .insert_header("X-RateLimit-Reset", "1700000000")
                .set_body_json(json!({"message": "You are being rate limited."})),
        )
        .mount(&server)
        .await;

    let connector = discord(&server);
    assert_eq!(connector.rate_limits(), RateLimitState::default());

    let err = connector.profile("token").await.unwrap_err();
    assert_eq!(err.status_code(), Some(429));
    assert_eq!(
        serde_json::to_value(connector.rate_limits()).unwrap(),
        json!({"remaining": 0, "reset": 1700000000})
    );
}

#[tokio::test]
async fn server_error_message_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "internal"})))
        .mount(&server)
        .await;

    let err = discord(&server).profile("token").await.unwrap_err();
    assert!(matches!(err, ConnectorError::Api { code: 500, ref message } if message == "internal"));
}

#[tokio::test]
async fn default_schedule_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = medium(&server.uri())
        .schedule_post("t", &PostContent::text("later"), chrono::Utc::now(), &Options::new())
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Unsupported(Unsupported::Scheduling));
}

#[test]
fn authorization_urls_differ_only_in_state() {
    let server_less = create_connector(
        Platform::Discord,
        &json!({"client_id": "cid", "client_secret": "secret", "bot_token": "bot"}),
    )
    .unwrap();
    let scopes = vec!["identify".to_string()];

    let first = server_less.authorization_url("https://app.example/cb", &scopes).unwrap();
    let second = server_less.authorization_url("https://app.example/cb", &scopes).unwrap();
    assert_ne!(first.url, second.url);

    let without_state = |raw: &str| -> (String, HashMap<String, String>) {
        let url = Url::parse(raw).unwrap();
        let params = url
            .query_pairs()
            .filter(|(key, _)| key != "state")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        (format!("{}://{}{}", url.scheme(), url.host_str().unwrap(), url.path()), params)
    };

    assert_eq!(without_state(&first.url), without_state(&second.url));
    let state_params = Url::parse(&first.url)
        .unwrap()
        .query_pairs()
        .filter(|(key, _)| key == "state")
        .count();
    assert_eq!(state_params, 1);
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    let connector = create_connector(
        Platform::Discord,
        &json!({
            "client_id": "cid",
            "client_secret": "secret",
            "bot_token": "bot",
            "api_url": "http://127.0.0.1:1",
        }),
    )
    .unwrap();

    let err = connector.profile("token").await.unwrap_err();
    assert!(matches!(err, ConnectorError::Transport(_)), "got {:?}", err);
    assert_eq!(err.status_code(), None);

    assert!(!connector.revoke_token("token").await);
    assert_eq!(connector.rate_limits(), RateLimitState::default());
}

#[tokio::test]
async fn default_refresh_echoes_the_token() {
    let settings = json!({
        "client_id": "id",
        "client_secret": "secret",
        "bot_token": "123456:ABC"
    });

    for platform in [Platform::Slack, Platform::Telegram, Platform::Wordpress] {
        let connector = create_connector(platform, &settings).unwrap();
        let envelope = connector.refresh_token("long-lived").await.unwrap();

        assert_eq!(envelope.access_token, "long-lived", "{}", platform);
        assert_eq!(envelope.refresh_token.as_deref(), Some("long-lived"), "{}", platform);
        assert_eq!(envelope.expires_in, None);
    }
}
