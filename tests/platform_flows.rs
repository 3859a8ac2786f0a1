use serde_json::{json, Value};
use socon::api::instagram::InstagramConnector;
use socon::api::tiktok::TiktokConnector;
use socon::api::create_connector;
use socon::models::{MediaItem, Options, Outcome, PostContent};
use socon::wait::PollPolicy;
use socon::{Connector, ConnectorError, Platform};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{
    any, body_partial_json, body_string_contains, header, method, path, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_polling() -> Arc<PollPolicy> {
    Arc::new(PollPolicy::new(Duration::from_millis(5), 5))
}

#[tokio::test]
async fn slack_in_body_error_becomes_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .and(header("authorization", "Bearer xoxb"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"ok": false, "error": "channel_not_found"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let slack = create_connector(
        Platform::Slack,
        &json!({
            "client_id": "cid",
            "client_secret": "secret",
            "default_channel_id": "C1",
            "api_url": server.uri(),
        }),
    )
    .unwrap();

    let err = slack
        .publish_post("xoxb", &PostContent::text("hello"), &Options::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectorError::Api { code: 200, ref message } if message == "channel_not_found"
    ));
}

#[tokio::test]
async fn instagram_video_waits_for_container() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v18.0/ig1/media"))
        .and(body_partial_json(
            json!({"media_type": "REELS", "video_url": "https://cdn.example/clip.mp4"}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v18.0/c1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status_code": "IN_PROGRESS"})),
        )
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v18.0/c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status_code": "FINISHED"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v18.0/ig1/media_publish"))
        .and(body_partial_json(json!({"creation_id": "c1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1"})))
        .expect(1)
        .mount(&server)
        .await;

    let instagram = InstagramConnector::from_settings(&json!({
        "app_id": "app",
        "app_secret": "secret",
        "instagram_account_id": "ig1",
        "graph_url": server.uri(),
    }))
    .unwrap()
    .with_wait_strategy(fast_polling());

    let content =
        PostContent::text("reel").with_media(MediaItem::video("https://cdn.example/clip.mp4"));
    let result = instagram.publish_post("token", &content, &Options::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.post_id.as_deref(), Some("m1"));
    assert_eq!(result.extra.get("container_id"), Some(&Value::String("c1".into())));
}

#[tokio::test]
async fn instagram_polling_gives_up_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v18.0/ig1/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v18.0/c1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status_code": "IN_PROGRESS"})),
        )
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v18.0/ig1/media_publish"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1"})))
        .expect(0)
        .mount(&server)
        .await;

    let instagram = InstagramConnector::from_settings(&json!({
        "app_id": "app",
        "app_secret": "secret",
        "instagram_account_id": "ig1",
        "graph_url": server.uri(),
    }))
    .unwrap()
    .with_wait_strategy(fast_polling());

    let content =
        PostContent::text("reel").with_media(MediaItem::video("https://cdn.example/clip.mp4"));
    let err = instagram.publish_post("token", &content, &Options::new()).await.unwrap_err();

    assert!(matches!(err, ConnectorError::PollExhausted { attempts: 5, .. }));
}

#[tokio::test]
async fn youtube_resumable_upload() {
    let server = MockServer::start().await;
    let video_url = format!("{}/media/clip.mp4", server.uri());
    let session_url = format!("{}/upload/session/abc", server.uri());

    Mock::given(method("GET"))
        .and(path("/media/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/youtube/v3/videos"))
        .and(query_param("uploadType", "resumable"))
        .and(header("x-upload-content-length", "4"))
        .and(body_partial_json(json!({"snippet": {"title": "Launch"}})))
        .respond_with(ResponseTemplate::new(200).insert_header("Location", session_url.as_str()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/upload/session/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "vid1"})))
        .expect(1)
        .mount(&server)
        .await;

    let youtube = create_connector(
        Platform::Youtube,
        &json!({"client_id": "cid", "client_secret": "secret", "api_url": server.uri()}),
    )
    .unwrap();

    let content = PostContent::text("A new release")
        .with_title("Launch")
        .with_media(MediaItem::video(video_url));
    let result = youtube.publish_post("token", &content, &Options::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.post_id.as_deref(), Some("vid1"));
    assert!(result.url.unwrap().ends_with("watch?v=vid1"));
}

#[tokio::test]
async fn tiktok_pull_from_url_polls_until_complete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/post/publish/video/init/"))
        .and(body_partial_json(json!({"source_info": {"source": "PULL_FROM_URL"}})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": {"publish_id": "p1"}, "error": {"code": "ok"}})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/post/publish/status/fetch/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"data": {"status": "PROCESSING_DOWNLOAD"}, "error": {"code": "ok"}}),
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/post/publish/status/fetch/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"status": "PUBLISH_COMPLETE", "publicaly_available_post_id": [7000]},
            "error": {"code": "ok"}
        })))
        .mount(&server)
        .await;

    let tiktok = TiktokConnector::from_settings(&json!({
        "client_key": "key",
        "client_secret": "secret",
        "api_url": server.uri(),
    }))
    .unwrap()
    .with_wait_strategy(fast_polling());

    let content =
        PostContent::text("clip").with_media(MediaItem::video("https://cdn.example/clip.mp4"));
    let result = tiktok.publish_post("token", &content, &Options::new()).await.unwrap();

    assert_eq!(result.post_id.as_deref(), Some("7000"));
    assert_eq!(result.extra.get("publish_id"), Some(&Value::String("p1".into())));
}

#[tokio::test]
async fn twitter_media_is_reported_without_calling_the_api() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "1"}})))
        .expect(0)
        .mount(&server)
        .await;

    let twitter = create_connector(
        Platform::Twitter,
        &json!({"client_id": "cid", "client_secret": "secret", "api_url": server.uri()}),
    )
    .unwrap();

    let content =
        PostContent::text("look").with_media(MediaItem::image("https://cdn.example/a.png"));
    let result = twitter.publish_post("token", &content, &Options::new()).await.unwrap();

    assert!(!result.success);
    assert!(result.error.unwrap().contains("OAuth 1.0a"));
}

#[tokio::test]
async fn delete_failures_are_soft() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/channels/c1/messages/gone"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"message": "Unknown Message"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/channels/c1/messages/m1"))
        .and(header("authorization", "Bot bot"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let discord = create_connector(
        Platform::Discord,
        &json!({
            "client_id": "cid",
            "client_secret": "secret",
            "bot_token": "bot",
            "default_channel_id": "c1",
            "api_url": server.uri(),
        }),
    )
    .unwrap();

    assert_eq!(discord.delete_post("t", "gone").await.unwrap(), Outcome::Done(false));
    assert_eq!(discord.delete_post("t", "c1:m1").await.unwrap(), Outcome::Done(true));
}

#[tokio::test]
async fn revoke_failures_are_soft() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token/revoke"))
        .and(body_string_contains("token=stale"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid_client"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token/revoke"))
        .and(body_string_contains("token=fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let discord = create_connector(
        Platform::Discord,
        &json!({
            "client_id": "cid",
            "client_secret": "secret",
            "bot_token": "bot",
            "api_url": server.uri(),
        }),
    )
    .unwrap();

    assert!(!discord.revoke_token("stale").await);
    assert!(discord.revoke_token("fresh").await);
}
