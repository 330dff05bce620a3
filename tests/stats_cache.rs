//! Integration tests for the stats page: snapshot freshness against a mock
//! API server, and recommendation retries.
//!
//! Each test creates its own in-memory SQLite database and mock server.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vnclub::api::ApiClient;
use vnclub::entity::EntityId;
use vnclub::filters::BrowseFilters;
use vnclub::lifecycle::{FailureKind, RetryPolicy, Timeouts};
use vnclub::snapshot::{SnapshotCache, SnapshotKind, StatsSnapshot};
use vnclub::stats::{
    RecommendationLoader, RecommendationState, StatsEvent, StatsLoader, StatsResponse, StatsState,
};
use vnclub::storage::{Database, SessionStore};

fn uid() -> EntityId {
    EntityId::parse("u12345").unwrap()
}

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

async fn mount_stats(server: &MockServer, completed: u32) {
    Mock::given(method("GET"))
        .and(path("/stats/u12345"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {"uid": "u12345", "username": "yuki"},
            "summary": {
                "total_vns": 40, "completed": completed, "playing": 2,
                "dropped": 3, "wishlist": 5, "average_score": 7.1
            }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stats/u12345/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "top_tags": [{"id": 32, "name": "Romance", "count": 12}]
        })))
        .mount(server)
        .await;
}

async fn stats_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/stats/u12345")
        .count()
}

fn loader_for(
    server: &MockServer,
    db: &Database,
) -> (
    StatsLoader<ApiClient, Database>,
    mpsc::Receiver<StatsResponse>,
) {
    let client = ApiClient::new(&server.uri(), Timeouts::default()).unwrap();
    let (tx, rx) = mpsc::channel(4);
    (
        StatsLoader::new(client, SnapshotCache::new(db.clone()), tx),
        rx,
    )
}

/// Pretend the stored snapshot was taken `age` ago.
async fn age_snapshot(db: &Database, age: Duration) {
    let key = SnapshotKind::Stats.key(&uid());
    let raw = db.get(&key).await.unwrap().unwrap();
    let mut snapshot: StatsSnapshot = serde_json::from_str(&raw).unwrap();
    snapshot.cached_at = snapshot.cached_at.map(|t| t - age.as_millis() as i64);
    db.set(&key, &serde_json::to_string(&snapshot).unwrap())
        .await
        .unwrap();
}

// ============================================================================
// Snapshot freshness
// ============================================================================

#[tokio::test]
async fn test_revisit_within_window_skips_network() {
    let server = MockServer::start().await;
    mount_stats(&server, 20).await;
    let db = test_db().await;

    // First visit: no snapshot, loading screen, then data.
    let (mut loader, mut rx) = loader_for(&server, &db);
    assert_eq!(loader.open(uid()).await, &StatsState::Loading);
    let response = rx.recv().await.unwrap();
    assert_eq!(loader.handle_response(response).await, StatsEvent::Loaded);
    assert_eq!(stats_requests(&server).await, 1);
    drop(loader);

    // Back within five minutes: instant render, no request.
    let (mut loader, mut rx) = loader_for(&server, &db);
    let state = loader.open(uid()).await;
    assert!(matches!(state, StatsState::Ready(s) if s.secondary.is_some()));
    assert!(!loader.in_flight());
    assert!(rx.try_recv().is_err());
    assert_eq!(stats_requests(&server).await, 1);
}

#[tokio::test]
async fn test_revisit_after_window_renders_then_revalidates() {
    let server = MockServer::start().await;
    mount_stats(&server, 20).await;
    let db = test_db().await;

    let (mut loader, mut rx) = loader_for(&server, &db);
    loader.open(uid()).await;
    let response = rx.recv().await.unwrap();
    loader.handle_response(response).await;
    drop(loader);

    age_snapshot(&db, Duration::from_secs(10 * 60)).await;
    server.reset().await;
    mount_stats(&server, 21).await;

    let (mut loader, mut rx) = loader_for(&server, &db);
    let state = loader.open(uid()).await;
    assert!(
        matches!(state, StatsState::Ready(s) if s.primary.summary.completed == 20),
        "stale snapshot should render immediately"
    );
    assert!(loader.in_flight());

    let response = rx.recv().await.unwrap();
    assert_eq!(loader.handle_response(response).await, StatsEvent::Revalidated);
    assert!(matches!(
        loader.state(),
        StatsState::Ready(s) if s.primary.summary.completed == 21
    ));
    assert_eq!(stats_requests(&server).await, 1);

    // The refreshed snapshot is fresh again.
    let (mut loader, _rx) = loader_for(&server, &db);
    loader.open(uid()).await;
    assert!(!loader.in_flight());
}

#[tokio::test]
async fn test_corrupt_snapshot_loads_from_network() {
    let server = MockServer::start().await;
    mount_stats(&server, 20).await;
    let db = test_db().await;
    db.set(
        "stats-cache-u12345",
        r#"{"primary":{"user":{"uid":"u12345","username":"yuki"}},"cached_at":1}"#,
    )
    .await
    .unwrap();

    let (mut loader, mut rx) = loader_for(&server, &db);
    assert_eq!(loader.open(uid()).await, &StatsState::Loading);
    let response = rx.recv().await.unwrap();
    assert_eq!(loader.handle_response(response).await, StatsEvent::Loaded);
    assert_eq!(stats_requests(&server).await, 1);
}

#[tokio::test]
async fn test_private_list_shows_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let db = test_db().await;

    let (mut loader, mut rx) = loader_for(&server, &db);
    loader.open(uid()).await;
    let response = rx.recv().await.unwrap();
    let StatsEvent::Failed(failure) = loader.handle_response(response).await else {
        panic!("expected a failure");
    };
    assert_eq!(failure.kind, FailureKind::NotFound);
    assert_eq!(failure.message(), "User not found or list is private.");
    assert_eq!(failure.upstream_url, "https://vndb.org/u12345");
    assert!(db.get("stats-cache-u12345").await.unwrap().is_none());
}

// ============================================================================
// Recommendations
// ============================================================================

#[tokio::test]
async fn test_recommendations_retry_until_ready() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/recommendations/u12345"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/recommendations/u12345"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "vn": {"id": "v17", "name": "Ever17"},
                "score": 0.93,
                "breakdown": [{"source": "tags", "weight": 0.6}]
            }]
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), Timeouts::default()).unwrap();
    let policy = RetryPolicy {
        max_retries: 2,
        delay: Duration::from_millis(10),
    };
    let (tx, mut rx) = mpsc::channel(1);
    let mut loader = RecommendationLoader::new(client, policy, tx);

    loader.load(uid(), BrowseFilters::default());
    assert_eq!(loader.state(), &RecommendationState::Loading);

    let response = rx.recv().await.unwrap();
    assert!(loader.handle_response(response));
    let RecommendationState::Ready(recs) = loader.state() else {
        panic!("expected recommendations, got {:?}", loader.state());
    };
    assert_eq!(recs.items.len(), 1);
    assert_eq!(recs.items[0].vn.id.as_str(), "v17");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_superseded_recommendations_are_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"items": []}))
                .set_delay(Duration::from_millis(50)),
        )
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), Timeouts::default()).unwrap();
    let (tx, mut rx) = mpsc::channel(2);
    let mut loader = RecommendationLoader::new(client, RetryPolicy::none(), tx);

    loader.load(uid(), BrowseFilters::default());
    loader.load(EntityId::parse("u7").unwrap(), BrowseFilters::default());

    let mut applied = Vec::new();
    for _ in 0..2 {
        let response = rx.recv().await.unwrap();
        applied.push((response.uid.as_str().to_string(), loader.handle_response(response)));
    }
    applied.sort();
    assert_eq!(
        applied,
        vec![("u12345".to_string(), false), ("u7".to_string(), true)]
    );
    assert!(matches!(loader.state(), RecommendationState::Ready(_)));
}
