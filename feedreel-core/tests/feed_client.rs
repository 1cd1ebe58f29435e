use feedreel_core::{
    DeclaredType, FeedCredentials, FeedEndpoints, FeedError, FeedSource, OrderingMode,
    RedditFeedClient,
};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_PATH: &str = "/api/v1/access_token";

fn endpoints(server: &MockServer) -> FeedEndpoints {
    FeedEndpoints {
        auth_url: format!("{}{}", server.uri(), TOKEN_PATH),
        api_base: server.uri(),
    }
}

fn credentials() -> FeedCredentials {
    FeedCredentials::new("client-id", "client-secret", "feedreel-tests/0.1")
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token-123",
            "token_type": "bearer",
            "expires_in": 3600,
        })))
        .mount(server)
        .await;
}

fn listing(posts: &[(&str, Option<&str>)]) -> serde_json::Value {
    let children: Vec<_> = posts
        .iter()
        .map(|(id, url)| json!({ "kind": "t3", "data": { "id": id, "url": url } }))
        .collect();
    json!({ "kind": "Listing", "data": { "children": children, "after": null } })
}

#[tokio::test]
async fn lists_posts_in_feed_order() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/r/testsub/new"))
        .and(query_param("limit", "4"))
        .and(header("authorization", "Bearer token-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&[
            ("a1", Some("https://i.example/a.png")),
            ("a2", Some("https://i.example/b.JPG")),
            ("a3", None),
            ("a4", Some("https://i.example/c.jpeg")),
        ])))
        .mount(&server)
        .await;

    let client = RedditFeedClient::connect(credentials(), endpoints(&server))
        .await
        .unwrap();
    let posts = client
        .list_posts("testsub", OrderingMode::New, 4)
        .await
        .unwrap();

    let ids: Vec<&str> = posts.iter().map(|post| post.id.as_str()).collect();
    assert_eq!(ids, ["a1", "a2", "a4"]);
    assert_eq!(posts[0].declared_type, DeclaredType::Png);
    assert_eq!(posts[1].declared_type, DeclaredType::Unsupported);
    assert_eq!(posts[2].declared_type, DeclaredType::Jpeg);
}

#[tokio::test]
async fn top_listing_spans_all_time() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/r/memes/top"))
        .and(query_param("t", "all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&[(
            "t1",
            Some("https://i.example/t.jpg"),
        )])))
        .expect(1)
        .mount(&server)
        .await;

    let client = RedditFeedClient::connect(credentials(), endpoints(&server))
        .await
        .unwrap();
    let posts = client.list_posts("memes", OrderingMode::Top, 1).await.unwrap();
    assert_eq!(posts.len(), 1);
}

#[tokio::test]
async fn rejected_credentials_fail_at_connect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = RedditFeedClient::connect(credentials(), endpoints(&server))
        .await
        .unwrap_err();
    assert!(err.is_authentication(), "unexpected error {err:?}");
}

#[tokio::test]
async fn token_error_body_is_an_authentication_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "error": "invalid_grant" })),
        )
        .mount(&server)
        .await;

    let err = RedditFeedClient::connect(credentials(), endpoints(&server))
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::Authentication(reason) if reason == "invalid_grant"));
}

#[tokio::test]
async fn missing_credentials_never_reach_the_network() {
    let server = MockServer::start().await;
    let err = RedditFeedClient::connect(
        FeedCredentials::new("", "secret", "agent"),
        endpoints(&server),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FeedError::MissingCredentials(ref missing) if missing == &["ID"]));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn unknown_channel_is_a_channel_error() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/r/nosuchsub/hot"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = RedditFeedClient::connect(credentials(), endpoints(&server))
        .await
        .unwrap();
    let err = client
        .list_posts("nosuchsub", OrderingMode::Hot, 5)
        .await
        .unwrap_err();
    assert!(!err.is_authentication());
    assert!(matches!(err, FeedError::Status { status: 404, .. }));
}

#[tokio::test]
async fn malformed_listing_is_reported() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/r/memes/rising"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
        .mount(&server)
        .await;

    let client = RedditFeedClient::connect(credentials(), endpoints(&server))
        .await
        .unwrap();
    let err = client
        .list_posts("memes", OrderingMode::Rising, 5)
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::Decode(_) | FeedError::Network(_)));
}
