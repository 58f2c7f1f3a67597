use std::time::Duration;

use devbridge_core::{EntityType, GitHubConfig, Snapshot};
use devbridge_platforms::GitHubAdapter;
use devbridge_sync::{ListFilter, PlatformAdapter, PlatformError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn adapter(server: &MockServer) -> GitHubAdapter {
    let mut config = GitHubConfig::new("acme", "widgets");
    config.api_url = server.uri();
    GitHubAdapter::new(&config, "t0ken", Duration::from_secs(5)).expect("adapter")
}

#[tokio::test]
async fn fetch_issue_maps_native_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/issues/42"))
        .and(header("authorization", "Bearer t0ken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "number": 42,
            "title": "Bug",
            "body": "Steps to reproduce",
            "state": "open",
            "labels": [{ "name": "bug" }],
            "assignees": [],
            "updated_at": "2024-05-01T10:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let snap = adapter(&server)
        .await
        .fetch(EntityType::Issue, "42")
        .await
        .expect("fetch");
    assert_eq!(snap.get("title"), Some(&json!("Bug")));
    assert_eq!(snap.get("description"), Some(&json!("Steps to reproduce")));
    assert_eq!(snap.get("labels"), Some(&json!(["bug"])));
    assert_eq!(snap.get("assignees"), Some(&json!([])));
    assert!(snap.modified_at.is_some());
}

#[tokio::test]
async fn missing_issue_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/issues/404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .await
        .fetch(EntityType::Issue, "404")
        .await
        .unwrap_err();
    assert_eq!(err, PlatformError::NotFound);
}

#[tokio::test]
async fn exhausted_quota_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("retry-after", "30")
                .set_body_json(json!({ "message": "API rate limit exceeded" })),
        )
        .mount(&server)
        .await;

    let err = adapter(&server)
        .await
        .fetch(EntityType::Release, "1")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PlatformError::RateLimited {
            retry_after: Some(Duration::from_secs(30))
        }
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn bad_credentials_are_auth_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "Bad credentials" })))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .await
        .fetch(EntityType::Issue, "1")
        .await
        .unwrap_err();
    assert_eq!(err, PlatformError::Auth("Bad credentials".to_string()));
}

#[tokio::test]
async fn issue_listing_forwards_filters_and_skips_pull_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/issues"))
        .and(query_param("state", "open"))
        .and(query_param("per_page", "100"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "number": 1, "title": "a" },
            { "number": 2, "title": "b", "pull_request": { "url": "x" } },
            { "number": 3, "title": "c" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let filter = ListFilter::from([("state".to_string(), "open".to_string())]);
    let ids = adapter(&server)
        .await
        .list(EntityType::Issue, &filter)
        .await
        .expect("list");
    assert_eq!(ids, vec!["1", "3"]);
}

#[tokio::test]
async fn comment_ids_carry_their_issue_number() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/issues/42/comments"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 7, "issue_url": "https://api.github.com/repos/acme/widgets/issues/42" },
            { "id": 9, "issue_url": "https://api.github.com/repos/acme/widgets/issues/42" }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/issues/comments/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "body": "Looks fixed",
            "user": { "login": "octo" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let github = adapter(&server).await;
    let filter = ListFilter::from([("work_item".to_string(), "42".to_string())]);
    let ids = github.list(EntityType::Comment, &filter).await.expect("list");
    assert_eq!(ids, vec!["42:7", "42:9"]);

    let snap = github.fetch(EntityType::Comment, &ids[0]).await.expect("fetch");
    assert_eq!(snap.get("content"), Some(&json!("Looks fixed")));

    let err = github.fetch(EntityType::Comment, "7").await.unwrap_err();
    assert!(matches!(err, PlatformError::Unsupported(_)), "got {err:?}");
}

#[tokio::test]
async fn write_issue_patches_native_body() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/repos/acme/widgets/issues/42"))
        .and(body_partial_json(json!({ "title": "Bug", "state": "open" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "number": 42 })))
        .expect(1)
        .mount(&server)
        .await;

    let snap = Snapshot::from_fields(
        EntityType::Issue,
        [("title", json!("Bug")), ("state", json!("open"))],
    );
    adapter(&server)
        .await
        .write(EntityType::Issue, "42", &snap)
        .await
        .expect("write");
}

#[tokio::test]
async fn rejected_write_is_a_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "message": "Validation Failed" })),
        )
        .mount(&server)
        .await;

    let snap = Snapshot::from_fields(EntityType::Release, [("name", json!("v1"))]);
    let err = adapter(&server)
        .await
        .write(EntityType::Release, "9", &snap)
        .await
        .unwrap_err();
    assert_eq!(err, PlatformError::WriteConflict("Validation Failed".to_string()));
}

#[tokio::test]
async fn wiki_and_commit_writes_are_unsupported() {
    let server = MockServer::start().await;
    let gh = adapter(&server).await;
    let wiki = Snapshot::from_fields(EntityType::Wiki, [("content", json!("# Home"))]);
    assert!(matches!(
        gh.fetch(EntityType::Wiki, "Home").await,
        Err(PlatformError::Unsupported(_))
    ));
    assert!(matches!(
        gh.write(EntityType::Wiki, "Home", &wiki).await,
        Err(PlatformError::Unsupported(_))
    ));
    let commit = Snapshot::from_fields(EntityType::Commit, [("message", json!("x"))]);
    assert!(matches!(
        gh.write(EntityType::Commit, "abc", &commit).await,
        Err(PlatformError::Unsupported(_))
    ));
}

#[tokio::test]
async fn slow_responses_time_out_as_transport_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut config = GitHubConfig::new("acme", "widgets");
    config.api_url = server.uri();
    let gh = GitHubAdapter::new(&config, "t0ken", Duration::from_millis(200)).expect("adapter");
    let err = gh.fetch(EntityType::Issue, "1").await.unwrap_err();
    assert!(matches!(err, PlatformError::Transport(_)), "got {err:?}");
}
