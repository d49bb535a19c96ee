//! End-to-end runs of FetchPipeline against a local HTTP server
//!
//! Every test spins up a wiremock server, so no network access is needed.

mod common;

use card_dl::{Error, FetchPipeline, ItemStatus, Ledger};
use common::*;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve(server: &MockServer, route: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_ok_flaky_and_broken_cards() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // A: fine. B: two server errors, then fine. C: always broken.
    serve(
        &server,
        "/cards/a.png",
        ResponseTemplate::new(200).set_body_bytes(png_bytes()),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/cards/b.png"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    serve(
        &server,
        "/cards/b.png",
        ResponseTemplate::new(200).set_body_bytes(jpeg_bytes()),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/cards/c.png"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let config = fast_config(dir.path());
    let pipeline = FetchPipeline::with_http(config).await.unwrap();

    let items = vec![
        card(&server.uri(), dir.path(), "a"),
        card(&server.uri(), dir.path(), "b"),
        card(&server.uri(), dir.path(), "c"),
    ];
    let summary = pipeline
        .run(items.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        (summary.succeeded, summary.failed, summary.skipped),
        (2, 1, 0)
    );
    assert_eq!(status_of(&summary, &items[2]), ItemStatus::Failed);
    assert_files_match_summary(&summary, &items);
    assert_eq!(std::fs::read(&items[1].destination).unwrap(), jpeg_bytes());

    let ledger = pipeline.ledger().load().await.unwrap();
    assert!(ledger[&items[0].id].downloaded);
    assert!(ledger[&items[1].id].downloaded);
    assert!(!ledger[&items[2].id].downloaded);
}

#[tokio::test]
async fn test_resume_issues_no_requests_for_completed_cards() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve(
        &server,
        "/cards/a.png",
        ResponseTemplate::new(200).set_body_bytes(png_bytes()),
    )
    .await;

    let items = vec![card(&server.uri(), dir.path(), "a")];

    // First process: download and close the ledger
    {
        let pipeline = FetchPipeline::with_http(fast_config(dir.path()))
            .await
            .unwrap();
        let summary = pipeline
            .run(items.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 1);
        pipeline.ledger().close().await;
    }
    let before = server.received_requests().await.unwrap().len();

    // Second process: the file is even gone, but the ledger says done
    std::fs::remove_file(&items[0].destination).unwrap();
    let pipeline = FetchPipeline::with_http(fast_config(dir.path()))
        .await
        .unwrap();
    let summary = pipeline
        .run(items.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), before);
}

#[tokio::test]
async fn test_truncated_transfer_is_refetched_once() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/cards/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(truncated_png_bytes()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    serve(
        &server,
        "/cards/a.png",
        ResponseTemplate::new(200).set_body_bytes(png_bytes()),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/cards/broken.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(truncated_png_bytes()))
        .expect(2)
        .mount(&server)
        .await;

    let pipeline = FetchPipeline::with_http(fast_config(dir.path()))
        .await
        .unwrap();
    let items = vec![
        card(&server.uri(), dir.path(), "a"),
        card(&server.uri(), dir.path(), "broken"),
    ];
    let summary = pipeline
        .run(items.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status_of(&summary, &items[0]), ItemStatus::Succeeded);
    assert_eq!(summary.outcome(&items[0].id).unwrap().attempts, 2);
    assert_eq!(status_of(&summary, &items[1]), ItemStatus::Failed);
    assert_files_match_summary(&summary, &items);
    assert_eq!(count_partials(&dir.path().join("cards")), 0);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/cards/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = FetchPipeline::with_http(fast_config(dir.path()))
        .await
        .unwrap();
    let items = vec![card(&server.uri(), dir.path(), "missing")];
    let summary = pipeline
        .run(items.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.outcome(&items[0].id).unwrap().attempts, 1);
}

#[tokio::test]
async fn test_configured_headers_are_sent() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(header("user-agent", "card-dl-tests/0.1"))
        .and(header("referer", "https://cards.example.com/"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes()))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = fast_config(dir.path());
    config.http.user_agent = "card-dl-tests/0.1".to_string();
    config.http.headers.insert(
        "Referer".to_string(),
        "https://cards.example.com/".to_string(),
    );
    let pipeline = FetchPipeline::with_http(config).await.unwrap();

    let items = vec![card(&server.uri(), dir.path(), "a")];
    let summary = pipeline
        .run(items, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 1);
}

#[tokio::test]
async fn test_uncreatable_output_directory_fails_the_run() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes()))
        .expect(0)
        .mount(&server)
        .await;

    // "cards" is a plain file, so "cards/<id>.png" has no usable parent
    std::fs::write(dir.path().join("cards"), b"in the way").unwrap();

    let pipeline = FetchPipeline::with_http(fast_config(dir.path()))
        .await
        .unwrap();
    let items = vec![card(&server.uri(), dir.path(), "a")];
    let result = pipeline.run(items, CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::OutputDirectory { .. })));
}

#[tokio::test]
async fn test_ledger_export_after_run() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve(
        &server,
        "/cards/a.png",
        ResponseTemplate::new(200).set_body_bytes(png_bytes()),
    )
    .await;
    serve(&server, "/cards/b.png", ResponseTemplate::new(410)).await;

    let config = fast_config(dir.path());
    let ledger_path = config.persistence.ledger_path.clone();
    let pipeline = FetchPipeline::with_http(config).await.unwrap();
    let items = vec![
        card(&server.uri(), dir.path(), "a"),
        card(&server.uri(), dir.path(), "b"),
    ];
    pipeline
        .run(items, CancellationToken::new())
        .await
        .unwrap();
    pipeline.ledger().close().await;

    // A separate handle on the same file sees the committed state
    let ledger = Ledger::open(&ledger_path).await.unwrap();
    let export = dir.path().join("state.json");
    ledger.export_json(&export).await.unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&export).unwrap()).unwrap();
    assert_eq!(json["a"]["downloaded"], true);
    assert_eq!(json["b"]["downloaded"], false);
}
