//! Integration tests for the metadata store: hierarchy semantics,
//! ephemeral sessions, failure counters, and the chunk catalog.

use logmill::chunk::{ChunkInfo, ChunkState};
use logmill::config::MetadataConfig;
use logmill::metadata::{
    ChunkCatalog, Coordinator, CoordinatorMetadataStore, FatalErrorHandler,
    LoggingFatalErrorHandler, MemoryCoordinator, MetadataStore, LIVE_NODES_ROOT,
    METADATA_READ_COUNTER, METADATA_WRITE_COUNTER, ZK_FAILED_COUNTER,
};
use logmill::metrics::MetricsRegistry;
use logmill::{Error, MetadataError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn connect(
    coordinator: &Arc<MemoryCoordinator>,
    metrics: &MetricsRegistry,
) -> CoordinatorMetadataStore {
    CoordinatorMetadataStore::connect(
        Arc::clone(coordinator) as Arc<dyn Coordinator>,
        &MetadataConfig::default(),
        Arc::new(LoggingFatalErrorHandler),
        metrics,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_create_then_get_is_bit_exact() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let store = connect(&coordinator, &MetricsRegistry::new()).await;

    let payload = vec![0u8, 1, 2, 255, 128, 7];
    store.create("/node", &payload, false).await.unwrap();
    assert_eq!(store.get("/node").await.unwrap(), payload);

    store.put("/node", b"updated").await.unwrap();
    assert_eq!(store.get("/node").await.unwrap(), b"updated");
}

#[tokio::test]
async fn test_hierarchy_create_get_children_delete() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let store = connect(&coordinator, &MetricsRegistry::new()).await;

    store.create("/root/1/2/3", b"123", true).await.unwrap();

    assert_eq!(store.get("/root/1/2/3").await.unwrap(), b"123");
    assert!(store.exists("/root/1").await.unwrap());
    assert_eq!(
        store.get_children("/root/1/2").await.unwrap(),
        vec!["3".to_string()]
    );

    // A node with children cannot be deleted.
    assert!(matches!(
        store.delete("/root/1").await.unwrap_err(),
        MetadataError::Internal(_)
    ));

    store.delete("/root/1/2/3").await.unwrap();
    store.delete("/root/1/2").await.unwrap();
    store.delete("/root/1").await.unwrap();

    assert!(!store.exists("/root/1").await.unwrap());
    assert!(matches!(
        store.get("/root/1").await.unwrap_err(),
        MetadataError::NoNode(_)
    ));
}

#[tokio::test]
async fn test_duplicate_create_fails_regardless_of_payload() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let store = connect(&coordinator, &MetricsRegistry::new()).await;

    store.create("/node", b"first", false).await.unwrap();
    assert!(matches!(
        store.create("/node", b"second", false).await.unwrap_err(),
        MetadataError::NodeExists(_)
    ));
    assert_eq!(store.get("/node").await.unwrap(), b"first");
}

#[tokio::test]
async fn test_create_under_missing_parent() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let store = connect(&coordinator, &MetricsRegistry::new()).await;

    assert!(matches!(
        store.create("/missing/child", b"", false).await.unwrap_err(),
        MetadataError::Internal(_)
    ));

    store.create("/missing/child", b"", true).await.unwrap();
    assert!(store.exists("/missing").await.unwrap());
    assert!(store.exists("/missing/child").await.unwrap());
}

#[tokio::test]
async fn test_ephemeral_nodes_cannot_have_children() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let store = connect(&coordinator, &MetricsRegistry::new()).await;

    store.create_ephemeral("/e", b"live").await.unwrap();
    assert!(matches!(
        store.create_ephemeral("/e/child", b"").await.unwrap_err(),
        MetadataError::Internal(_)
    ));
    assert!(matches!(
        store.create("/e/child", b"", false).await.unwrap_err(),
        MetadataError::Internal(_)
    ));
}

#[tokio::test]
async fn test_create_ephemeral_under_missing_parent_fails() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let store = connect(&coordinator, &MetricsRegistry::new()).await;

    assert!(matches!(
        store.create_ephemeral("/missing/e", b"").await.unwrap_err(),
        MetadataError::Internal(_)
    ));
}

#[tokio::test]
async fn test_closing_session_destroys_ephemeral_nodes() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let metrics = MetricsRegistry::new();

    let store = connect(&coordinator, &metrics).await;
    store.create_ephemeral("/e", b"live").await.unwrap();
    store.create("/p", b"persistent", false).await.unwrap();
    assert!(store.exists("/e").await.unwrap());
    store.close().await;

    // A fresh session against the same backend no longer sees /e.
    let fresh = connect(&coordinator, &metrics).await;
    assert!(!fresh.exists("/e").await.unwrap());
    assert!(fresh.exists("/p").await.unwrap());
}

#[tokio::test]
async fn test_service_outage_fails_each_operation_and_counts() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let metrics = MetricsRegistry::new();
    let store = connect(&coordinator, &metrics).await;
    store.create("/present", b"", false).await.unwrap();

    coordinator.set_available(false);

    let mut expected_zk_failures = metrics.counter_value(ZK_FAILED_COUNTER);
    assert_eq!(expected_zk_failures, 0);

    macro_rules! assert_internal_and_counted {
        ($op:expr) => {
            assert!(matches!($op.await.unwrap_err(), MetadataError::Internal(_)));
            expected_zk_failures += 1;
            assert_eq!(metrics.counter_value(ZK_FAILED_COUNTER), expected_zk_failures);
        };
    }

    assert_internal_and_counted!(store.create("/a", b"", false));
    assert_internal_and_counted!(store.create_ephemeral("/b", b""));
    assert_internal_and_counted!(store.put("/present", b""));
    assert_internal_and_counted!(store.get("/present"));
    assert_internal_and_counted!(store.exists("/present"));
    assert_internal_and_counted!(store.delete("/present"));
    assert_internal_and_counted!(store.get_children("/present"));

    // Recovery: the same session works once the service is back.
    coordinator.set_available(true);
    assert!(store.exists("/present").await.unwrap());
}

#[tokio::test]
async fn test_read_and_write_counters() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let metrics = MetricsRegistry::new();
    let store = connect(&coordinator, &metrics).await;

    store.create("/node", b"", false).await.unwrap();
    store.put("/node", b"data").await.unwrap();
    store.create_ephemeral("/e", b"").await.unwrap();
    store.delete("/e").await.unwrap();

    store.get("/node").await.unwrap();
    store.exists("/node").await.unwrap();
    store.get_children("/node").await.unwrap();

    assert_eq!(metrics.counter_value(METADATA_WRITE_COUNTER), 4);
    assert_eq!(metrics.counter_value(METADATA_READ_COUNTER), 3);
}

struct CapturingFatalHandler {
    fired: Arc<AtomicBool>,
}

impl FatalErrorHandler for CapturingFatalHandler {
    fn handle_fatal(&self, _error: &Error) {
        self.fired.store(true, Ordering::Release);
    }
}

#[tokio::test]
async fn test_session_expiry_invokes_fatal_handler() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let fired = Arc::new(AtomicBool::new(false));
    let store = CoordinatorMetadataStore::connect(
        Arc::clone(&coordinator) as Arc<dyn Coordinator>,
        &MetadataConfig::default(),
        Arc::new(CapturingFatalHandler {
            fired: Arc::clone(&fired),
        }),
        &MetricsRegistry::new(),
    )
    .await
    .unwrap();

    store.create_ephemeral("/e", b"live").await.unwrap();
    coordinator.expire_sessions();

    tokio::time::timeout(Duration::from_secs(1), async {
        while !fired.load(Ordering::Acquire) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("fatal handler was not invoked");

    // The expired session's ephemeral nodes are gone.
    let fresh = connect(&coordinator, &MetricsRegistry::new()).await;
    assert!(!fresh.exists("/e").await.unwrap());
}

fn sample_chunk_info(chunk_id: &str) -> ChunkInfo {
    let mut info = ChunkInfo::new(chunk_id.to_string(), "logs".to_string(), 100);
    info.track_data_time(10);
    info.track_data_time(20);
    info.message_count = 2;
    info.bytes_indexed = 30;
    info
}

#[tokio::test]
async fn test_chunk_catalog_round_trip() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let store: Arc<dyn MetadataStore> =
        Arc::new(connect(&coordinator, &MetricsRegistry::new()).await);
    let catalog = ChunkCatalog::new(Arc::clone(&store));

    assert!(catalog.list_chunk_ids().await.unwrap().is_empty());

    let info = sample_chunk_info("chunk-1");
    catalog.register_chunk(&info).await.unwrap();
    assert_eq!(catalog.get_chunk("chunk-1").await.unwrap(), info);

    let mut uploaded = info.clone();
    uploaded.state = ChunkState::Uploaded;
    uploaded.snapshot_path = Some("s3://bucket/chunk-1".to_string());
    catalog.upsert_chunk(&uploaded).await.unwrap();
    assert_eq!(catalog.get_chunk("chunk-1").await.unwrap(), uploaded);

    catalog.register_chunk(&sample_chunk_info("chunk-2")).await.unwrap();
    assert_eq!(
        catalog.list_chunk_ids().await.unwrap(),
        vec!["chunk-1".to_string(), "chunk-2".to_string()]
    );

    catalog.delete_chunk("chunk-1").await.unwrap();
    assert_eq!(
        catalog.list_chunk_ids().await.unwrap(),
        vec!["chunk-2".to_string()]
    );
}

#[tokio::test]
async fn test_upsert_creates_missing_catalog_entry() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let store: Arc<dyn MetadataStore> =
        Arc::new(connect(&coordinator, &MetricsRegistry::new()).await);
    let catalog = ChunkCatalog::new(store);

    let info = sample_chunk_info("chunk-1");
    catalog.upsert_chunk(&info).await.unwrap();
    assert_eq!(catalog.get_chunk("chunk-1").await.unwrap(), info);
}

#[tokio::test]
async fn test_live_node_registration_is_session_scoped() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let metrics = MetricsRegistry::new();

    let store: Arc<dyn MetadataStore> = Arc::new(connect(&coordinator, &metrics).await);
    let catalog = ChunkCatalog::new(Arc::clone(&store));
    catalog.register_live_node("indexer-1", b"10.0.0.1:8080").await.unwrap();
    catalog.register_chunk(&sample_chunk_info("chunk-1")).await.unwrap();

    assert_eq!(
        store.get_children(LIVE_NODES_ROOT).await.unwrap(),
        vec!["indexer-1".to_string()]
    );
    store.close().await;

    // Liveness disappears with the session; the catalog persists.
    let fresh: Arc<dyn MetadataStore> = Arc::new(connect(&coordinator, &metrics).await);
    assert_eq!(fresh.get_children(LIVE_NODES_ROOT).await.unwrap().len(), 0);
    let fresh_catalog = ChunkCatalog::new(fresh);
    assert_eq!(
        fresh_catalog.list_chunk_ids().await.unwrap(),
        vec!["chunk-1".to_string()]
    );
}
