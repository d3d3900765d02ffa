//! Integration tests for feed manifests and feed-dereferenced downloads.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{TestServer, reference_of};
use serde_json::json;
use std::sync::Arc;

const OWNER: &str = "8d3766440f0d7b949a5e32995d09619a7f86e632";
const TOPIC: &str = "e2a3b4c5d6e7f8091a2b3c4d5e6f708192a3b4c5d6e7f8091a2b3c4d5e6f7081";

async fn create_feed_manifest(server: &TestServer) -> String {
    let response = server
        .send(
            Request::post(format!("/feeds/{OWNER}/{TOPIC}?type=sequence"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.json());
    reference_of(&response)
}

async fn publish(server: &TestServer, target: &str) -> u64 {
    let response = server
        .send(
            Request::post(format!("/feeds/{OWNER}/{TOPIC}/updates"))
                .header("content-type", "application/json")
                .body(Body::from(json!({ "reference": target }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.json());
    response.json()["index"].as_u64().unwrap()
}

#[tokio::test]
async fn test_feed_download_follows_latest_update() {
    let server = TestServer::new().await;
    let site_v1 = server.upload_file("index.txt", "text/plain", b"version one").await;
    let site_v2 = server.upload_file("index.txt", "text/plain", b"version two").await;
    let feed_manifest = create_feed_manifest(&server).await;

    assert_eq!(publish(&server, &site_v1).await, 0);
    let first = server.get(&format!("/bzz/{feed_manifest}/")).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(&first.body[..], b"version one");
    assert_eq!(first.header("trove-feed-index"), Some("0000000000000000"));
    assert!(first.header("etag").is_none());

    assert_eq!(publish(&server, &site_v2).await, 1);
    let second = server.get(&format!("/bzz/{feed_manifest}/index.txt")).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(&second.body[..], b"version two");
    assert_eq!(second.header("trove-feed-index"), Some("0000000000000001"));
    assert!(second.header("etag").is_none());

    // The same content reached directly keeps its ETag.
    let direct = server.get(&format!("/bzz/{site_v2}/index.txt")).await;
    assert!(direct.header("etag").is_some());
    assert!(direct.header("trove-feed-index").is_none());
}

#[tokio::test]
async fn test_latest_update_endpoint() {
    let server = TestServer::new().await;
    let missing = server.get(&format!("/feeds/{OWNER}/{TOPIC}")).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let target = server.upload_file("a", "text/plain", b"a").await;
    publish(&server, &target).await;

    let latest = server.get(&format!("/feeds/{OWNER}/{TOPIC}")).await;
    assert_eq!(latest.status, StatusCode::OK);
    assert_eq!(latest.json()["reference"], target);
    assert_eq!(latest.json()["index"], 0);
    assert_eq!(latest.header("trove-feed-index"), Some("0000000000000000"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_all_land() {
    let server = Arc::new(TestServer::new().await);
    let target = server.upload_file("a", "text/plain", b"a").await;

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let server = server.clone();
            let target = target.clone();
            tokio::spawn(async move { publish(&server, &target).await })
        })
        .collect();
    let mut indexes = Vec::new();
    for handle in handles {
        indexes.push(handle.await.unwrap());
    }
    indexes.sort_unstable();
    assert_eq!(indexes, vec![0, 1, 2, 3, 4, 5]);

    let latest = server.get(&format!("/feeds/{OWNER}/{TOPIC}")).await;
    assert_eq!(latest.json()["index"], 5);
}

#[tokio::test]
async fn test_feed_without_updates_is_not_found() {
    let server = TestServer::new().await;
    let feed_manifest = create_feed_manifest(&server).await;

    let response = server.get(&format!("/bzz/{feed_manifest}/")).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["code"], "feed_not_found");
}

#[tokio::test]
async fn test_feed_pointing_at_feed_is_not_followed_twice() {
    let server = TestServer::new().await;
    let feed_manifest = create_feed_manifest(&server).await;
    // The feed's update targets the feed manifest itself.
    publish(&server, &feed_manifest).await;

    let response = server.get(&format!("/bzz/{feed_manifest}/")).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_feed_identity_rejected() {
    let server = TestServer::new().await;
    let bad_owner = server
        .send(
            Request::post(format!("/feeds/abcd/{TOPIC}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(bad_owner.status, StatusCode::BAD_REQUEST);

    let bad_type = server
        .send(
            Request::post(format!("/feeds/{OWNER}/{TOPIC}?type=daily"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(bad_type.status, StatusCode::BAD_REQUEST);
}
