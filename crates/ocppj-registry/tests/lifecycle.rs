//! Integration tests for the connection registry and keepalive.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ocppj_messages::{CentralSystemRole, ChargePointRequest, ChargePointResponse, ClearCacheRequest};
use ocppj_registry::{
    ConnectionListener, ConnectionRegistry, ConnectionStatus, Keepalive, KeepaliveConfig,
    Registration,
};
use ocppj_rpc::{BoxError, Connection, ConnectionOptions, Inbound, RequestError, RequestMetadata};
use ocppj_transport::{Connection as Link, ConnectionId, TransportError, UpgradeRequest};

// =========================================================================
// Helpers
// =========================================================================

/// A link that accepts everything and never receives.
#[derive(Default)]
struct QuietLink {
    sends: AtomicUsize,
    pings: AtomicUsize,
    fail_pings: AtomicBool,
    closed: AtomicBool,
}

impl Link for QuietLink {
    type Error = TransportError;

    async fn send(&self, _text: &str) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        std::future::pending().await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        if self.fail_pings.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed("gone".into()));
        }
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        ConnectionId::new(0)
    }
}

type Conn = Connection<CentralSystemRole, QuietLink>;
type Registry = ConnectionRegistry<CentralSystemRole, QuietLink>;
type Events = Arc<Mutex<Vec<(String, ConnectionStatus)>>>;

async fn refuse(
    _request: Inbound<ChargePointRequest>,
    _metadata: RequestMetadata,
) -> Result<ChargePointResponse, BoxError> {
    Err("not handled".into())
}

fn connection(identity: &str) -> (Arc<Conn>, Arc<QuietLink>) {
    let link = Arc::new(QuietLink::default());
    let conn: Conn = Connection::new(
        identity,
        Arc::clone(&link),
        UpgradeRequest::default(),
        Arc::new(refuse),
        ConnectionOptions::default(),
    );
    (Arc::new(conn), link)
}

fn recorder() -> (ConnectionListener, Events) {
    let events: Events = Arc::default();
    let sink = Arc::clone(&events);
    let listener: ConnectionListener = Arc::new(move |identity: &str, status| {
        sink.lock().unwrap().push((identity.to_owned(), status));
    });
    (listener, events)
}

fn events(events: &Events) -> Vec<(String, ConnectionStatus)> {
    events.lock().unwrap().clone()
}

fn connected(identity: &str) -> (String, ConnectionStatus) {
    (identity.to_owned(), ConnectionStatus::Connected)
}

fn disconnected(identity: &str) -> (String, ConnectionStatus) {
    (identity.to_owned(), ConnectionStatus::Disconnected)
}

// =========================================================================
// Registry
// =========================================================================

#[tokio::test]
async fn test_register_and_unregister_notify_listeners() {
    let registry = Registry::new();
    let (listener, log) = recorder();
    registry.add_listener(listener).await;

    let (conn, _) = connection("CP1");
    assert!(matches!(registry.register(Arc::clone(&conn)).await, Registration::Added));
    assert_eq!(registry.len().await, 1);
    assert!(registry.get("CP1").await.is_some());
    assert_eq!(registry.identities().await, vec!["CP1".to_owned()]);

    assert!(registry.unregister(&conn).await);
    assert!(registry.is_empty().await);
    assert_eq!(events(&log), vec![connected("CP1"), disconnected("CP1")]);
}

#[tokio::test]
async fn test_status_display() {
    assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
    assert_eq!(ConnectionStatus::Disconnected.to_string(), "disconnected");
}

#[tokio::test]
async fn test_reconnect_replaces_and_stale_close_is_ignored() {
    let registry = Registry::new();
    let (listener, log) = recorder();
    registry.add_listener(listener).await;

    let (first, _) = connection("CP1");
    let (second, _) = connection("CP1");
    registry.register(Arc::clone(&first)).await;
    let replaced = registry.register(Arc::clone(&second)).await;
    assert!(matches!(replaced, Registration::Replaced(old) if Arc::ptr_eq(&old, &first)));

    // The old socket closing must not evict the new one.
    assert!(!registry.unregister(&first).await);
    let live = registry.get("CP1").await.expect("still registered");
    assert!(Arc::ptr_eq(&live, &second));
    assert_eq!(events(&log), vec![connected("CP1"), connected("CP1")]);
}

#[tokio::test]
async fn test_send_request_without_identity_or_connection() {
    let registry = Registry::new();
    let (conn, link) = connection("CP1");
    registry.register(conn).await;

    let missing = registry.send_request("", ClearCacheRequest {}.into()).await;
    assert!(matches!(missing, Err(RequestError::MissingIdentity)));
    assert_eq!(
        missing.unwrap_err().to_string(),
        "charge point id was not provided"
    );

    let absent = registry.send_request("CP9", ClearCacheRequest {}.into()).await;
    match absent {
        Err(RequestError::NoConnection(identity)) => assert_eq!(identity, "CP9"),
        other => panic!("expected NoConnection, got {other:?}"),
    }

    assert_eq!(link.sends.load(Ordering::SeqCst), 0, "nothing should be sent");
}

#[tokio::test]
async fn test_unregister_fails_pending_calls() {
    let registry = Arc::new(Registry::new());
    let (conn, link) = connection("CP1");
    registry.register(Arc::clone(&conn)).await;

    let call = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.send_request("CP1", ClearCacheRequest {}.into()).await })
    };
    while conn.pending_calls().await == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(link.sends.load(Ordering::SeqCst), 1);

    assert!(registry.unregister(&conn).await);
    assert!(matches!(call.await.unwrap(), Err(RequestError::ConnectionClosed)));
    assert_eq!(conn.pending_calls().await, 0);
}

#[tokio::test]
async fn test_close_all() {
    let registry = Registry::new();
    let (listener, log) = recorder();
    registry.add_listener(listener).await;

    let (a, link_a) = connection("A");
    let (b, link_b) = connection("B");
    registry.register(a).await;
    registry.register(b).await;

    registry.close_all().await;

    assert!(registry.is_empty().await);
    assert!(link_a.closed.load(Ordering::SeqCst));
    assert!(link_b.closed.load(Ordering::SeqCst));
    let mut log = events(&log);
    log.sort();
    assert_eq!(
        log,
        vec![connected("A"), disconnected("A"), connected("B"), disconnected("B")]
    );
}

#[tokio::test]
async fn test_register_after_close_all_is_refused() {
    let registry = Registry::new();
    let (listener, log) = recorder();
    registry.add_listener(listener).await;
    registry.close_all().await;

    // A handshake that finished while the server was shutting down.
    let (late, link) = connection("LATE");
    assert!(matches!(registry.register(Arc::clone(&late)).await, Registration::Refused));

    assert!(registry.is_empty().await);
    assert!(registry.get("LATE").await.is_none());
    assert!(link.closed.load(Ordering::SeqCst));
    assert!(matches!(
        late.send_request(ClearCacheRequest {}.into()).await,
        Err(RequestError::ConnectionClosed)
    ));
    assert!(events(&log).is_empty());
}

// =========================================================================
// Keepalive
// =========================================================================

fn no_jitter(interval: Duration) -> KeepaliveConfig {
    KeepaliveConfig {
        interval,
        initial_jitter: Duration::ZERO,
    }
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_pings_on_interval() {
    let link = Arc::new(QuietLink::default());
    let keepalive = Keepalive::start("CP1", Arc::clone(&link), no_jitter(Duration::from_secs(30)));
    assert!(keepalive.is_running());

    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(link.pings.load(Ordering::SeqCst), 3);

    keepalive.stop();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(link.pings.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_first_ping_is_jittered_within_bound() {
    let link = Arc::new(QuietLink::default());
    let config = KeepaliveConfig {
        interval: Duration::from_secs(30),
        initial_jitter: Duration::from_secs(10),
    };
    let _keepalive = Keepalive::start("CP1", Arc::clone(&link), config);

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(link.pings.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(link.pings.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_stops_after_failed_ping() {
    let link = Arc::new(QuietLink::default());
    link.fail_pings.store(true, Ordering::SeqCst);
    let keepalive = Keepalive::start("CP1", Arc::clone(&link), no_jitter(Duration::from_secs(5)));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(!keepalive.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_disabled_with_zero_interval() {
    let link = Arc::new(QuietLink::default());
    let keepalive = Keepalive::start("CP1", Arc::clone(&link), no_jitter(Duration::ZERO));
    assert!(!keepalive.is_running());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(link.pings.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_keepalive_stops_pings() {
    let link = Arc::new(QuietLink::default());
    let keepalive = Keepalive::start("CP1", Arc::clone(&link), no_jitter(Duration::from_secs(10)));
    tokio::time::sleep(Duration::from_secs(11)).await;
    drop(keepalive);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(link.pings.load(Ordering::SeqCst), 1);
}
