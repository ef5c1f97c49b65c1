//! The HTTP gateway and the offline-sync services against the reference
//! server on an ephemeral port.

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use showtrack::server::{router, ApiKeyStore, AppState};
use showtrack_core::sync::{
    EnrichmentWorker, GatewayError, HttpEnricher, HttpGateway, MemoryStore, OutboxStore,
    RemoteGateway, SqliteStore, StaticCredentials,
};
use showtrack_core::{
    AnimalFilter, AnimalRecord, AnimalService, EntityId, JournalCategory, JournalEntry,
    JournalFilter, JournalService, Species, SyncPolicy, SyncStatus,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const KEY_A: &str = "key-a";
const KEY_B: &str = "key-b";
const TIMEOUT: Duration = Duration::from_secs(5);

async fn spawn_server() -> (SocketAddr, AppState) {
    let state = AppState::new(ApiKeyStore::from_entries([
        (KEY_A, "owner-a"),
        (KEY_B, "owner-b"),
    ]));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

/// A backend that hangs on journal entries and is down for animals.
async fn spawn_misbehaving_server() -> SocketAddr {
    let app = Router::new()
        .route(
            "/journal_entries/{id}",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                StatusCode::OK
            }),
        )
        .route(
            "/animals",
            get(|| async {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"error": "unavailable", "message": "database is restarting"})),
                )
            })
            .post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn base_url(addr: SocketAddr) -> String {
    format!("http://{}", addr)
}

fn gateway<E: showtrack_core::SyncEntity>(base: &str, key: Option<&str>) -> HttpGateway<E> {
    let credentials = Arc::new(StaticCredentials::new(key.map(str::to_string)));
    HttpGateway::new(base, credentials, TIMEOUT).unwrap()
}

fn feeding(title: &str) -> JournalEntry {
    JournalEntry::new(title, JournalCategory::Feeding)
}

#[tokio::test]
async fn test_crud_round_trip() {
    let (addr, _state) = spawn_server().await;
    let journal = gateway::<JournalEntry>(&base_url(addr), Some(KEY_A));

    let created = journal.create(&feeding("Evening feed")).await.unwrap();
    assert_eq!(created.owner_id, "owner-a");
    assert_eq!(created.version, 1);
    assert!(!created.id.is_local());

    let mut edited = created.payload.clone();
    edited.content = "Two flakes of hay".to_string();
    let updated = journal.update(&created.id, &edited).await.unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.payload.content, "Two flakes of hay");

    let fetched = journal.get(&created.id).await.unwrap();
    assert_eq!(fetched, updated);

    journal.delete(&created.id).await.unwrap();
    let err = journal.get(&created.id).await.unwrap_err();
    assert!(err.is_not_found());

    // Deleting again is still a success.
    journal.delete(&created.id).await.unwrap();
}

#[tokio::test]
async fn test_list_applies_filter_on_server() {
    let (addr, _state) = spawn_server().await;
    let journal = gateway::<JournalEntry>(&base_url(addr), Some(KEY_A));
    journal.create(&feeding("Feed")).await.unwrap();
    journal
        .create(&JournalEntry::new("Hoof trim", JournalCategory::Grooming))
        .await
        .unwrap();

    let grooming = journal
        .list(&JournalFilter {
            category: Some(JournalCategory::Grooming),
            ..JournalFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(grooming.len(), 1);
    assert_eq!(grooming[0].payload.title, "Hoof trim");

    let animals = gateway::<AnimalRecord>(&base_url(addr), Some(KEY_A));
    animals
        .create(&AnimalRecord::new("Wilbur", Species::Swine))
        .await
        .unwrap();
    let swine = animals
        .list(&AnimalFilter {
            species: Some(Species::Swine),
        })
        .await
        .unwrap();
    assert_eq!(swine.len(), 1);
}

#[tokio::test]
async fn test_error_classification() {
    let (addr, _state) = spawn_server().await;
    let base = base_url(addr);

    let wrong_key = gateway::<JournalEntry>(&base, Some("nope"));
    let err = wrong_key.create(&feeding("x")).await.unwrap_err();
    assert_eq!(err, GatewayError::Unauthenticated);

    let journal = gateway::<JournalEntry>(&base, Some(KEY_A));
    let err = journal.create(&feeding("   ")).await.unwrap_err();
    match &err {
        GatewayError::Server { status, message } => {
            assert_eq!(*status, 422);
            assert!(message.contains("title"), "message was {:?}", message);
        }
        other => panic!("expected a 422, got {:?}", other),
    }
    assert!(!err.is_transient());

    let other_owner = gateway::<JournalEntry>(&base, Some(KEY_B));
    let mine = journal.create(&feeding("Mine")).await.unwrap();
    assert!(other_owner.get(&mine.id).await.unwrap_err().is_not_found());
}

async fn sqlite_store(dir: &TempDir) -> SqliteStore {
    SqliteStore::open(&dir.path().join("showtrack.db"), "owner-a")
        .await
        .unwrap()
}

fn service(store: &SqliteStore, gateway: HttpGateway<JournalEntry>) -> JournalService {
    let outbox: Arc<dyn OutboxStore> = Arc::new(store.clone());
    JournalService::with_outbox(
        Arc::new(store.clone()),
        Arc::new(gateway),
        outbox,
        SyncPolicy::default(),
    )
}

#[tokio::test]
async fn test_offline_write_syncs_after_reconnect() {
    let (addr, state) = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    let cancel = CancellationToken::new();

    // Nothing listens on port 1.
    let offline = service(&store, gateway("http://127.0.0.1:1", Some(KEY_A)));
    let local = offline
        .create_entry(feeding("Barn check"), &cancel)
        .await
        .unwrap();
    assert!(local.id.is_local());
    assert_eq!(local.sync_status, SyncStatus::Pending);
    assert!(state
        .storage
        .list::<JournalEntry>("owner-a", &JournalFilter::default())
        .await
        .unwrap()
        .is_empty());

    let online = service(&store, gateway(&base_url(addr), Some(KEY_A)));
    let report = online.sync_now().await.unwrap();
    assert_eq!(report.synced, 1);

    let rows = state
        .storage
        .list::<JournalEntry>("owner-a", &JournalFilter::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    // The placeholder id still resolves, now to the server's copy.
    let synced = online.get_entry(&local.id).await.unwrap();
    assert_eq!(synced.id, rows[0].id);
    assert_eq!(synced.sync_status, SyncStatus::Synced);
    assert_eq!(online.status().await.unwrap().pending, 0);
}

#[tokio::test]
async fn test_confirmed_create_is_enriched() {
    let (addr, state) = spawn_server().await;
    let base = base_url(addr);
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;

    let journal = service(&store, gateway(&base, Some(KEY_A)));
    let record = journal
        .create_entry(feeding("Show prep"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert_eq!(journal.status().await.unwrap().outbox, 1);

    let credentials = Arc::new(StaticCredentials::new(Some(KEY_A.to_string())));
    let enricher =
        HttpEnricher::new(format!("{}/webhooks/enrich", base), credentials, TIMEOUT).unwrap();
    let worker = EnrichmentWorker::new(Arc::new(store.clone()), Arc::new(enricher), 3);

    let report = worker.drain().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(journal.status().await.unwrap().outbox, 0);

    let requests = state.storage.enrichment_requests("owner-a").await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].entity_kind, "journal_entries");
    assert_eq!(EntityId::new(requests[0].entity_id.clone()), record.id);
}

#[tokio::test]
async fn test_slow_server_is_timeout() {
    let addr = spawn_misbehaving_server().await;
    let credentials = Arc::new(StaticCredentials::new(Some(KEY_A.to_string())));
    let journal: HttpGateway<JournalEntry> =
        HttpGateway::new(&base_url(addr), credentials, Duration::from_millis(200)).unwrap();

    let err = journal.get(&EntityId::from("srv-1")).await.unwrap_err();
    assert!(matches!(err, GatewayError::Timeout(_)), "got {:?}", err);
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unavailable_server_is_transient_server_error() {
    let addr = spawn_misbehaving_server().await;
    let animals = gateway::<AnimalRecord>(&base_url(addr), Some(KEY_A));

    let err = animals.list(&AnimalFilter::default()).await.unwrap_err();
    match &err {
        GatewayError::Server { status, message } => {
            assert_eq!(*status, 503);
            assert_eq!(message, "database is restarting");
        }
        other => panic!("expected a 503, got {:?}", other),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unavailable_server_queues_the_write() {
    let addr = spawn_misbehaving_server().await;
    let animals = AnimalService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(gateway::<AnimalRecord>(&base_url(addr), Some(KEY_A))),
        SyncPolicy::default(),
    );

    let record = animals
        .create_entry(AnimalRecord::new("Wilbur", Species::Swine), &CancellationToken::new())
        .await
        .unwrap();
    assert!(record.id.is_local());
    assert_eq!(record.sync_status, SyncStatus::Pending);
    assert_eq!(animals.status().await.unwrap().pending, 1);
}
