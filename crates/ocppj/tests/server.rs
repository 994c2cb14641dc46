//! End-to-end tests: a real central system on a loopback port, talking to
//! real charge points and to raw WebSocket clients.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use ocppj::prelude::*;
use ocppj::transport::{TransportError, WebSocketConnection};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

// =========================================================================
// Helpers
// =========================================================================

type RawClient = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Seen = Arc<Mutex<Vec<(String, Option<String>)>>>;

const STEP: Duration = Duration::from_secs(5);

fn midnight() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Answers Heartbeat and StatusNotification, refuses everything else.
async fn central_handler(
    request: Inbound<ChargePointRequest>,
    _meta: RequestMetadata,
) -> Result<ChargePointResponse, BoxError> {
    match request.action() {
        "Heartbeat" => Ok(HeartbeatResponse {
            current_time: midnight(),
        }
        .into()),
        "StatusNotification" => Ok(StatusNotificationResponse {}.into()),
        other => Err(format!("{other} not supported").into()),
    }
}

/// Like `central_handler`, but records the action and validation error of
/// every request it sees.
struct Recording(Seen);

impl RequestHandler<CentralSystemRole> for Recording {
    fn handle(
        &self,
        request: Inbound<ChargePointRequest>,
        meta: RequestMetadata,
    ) -> BoxFuture<'static, Result<ChargePointResponse, BoxError>> {
        self.0.lock().unwrap().push((
            request.action().to_owned(),
            meta.validation_error.as_ref().map(ToString::to_string),
        ));
        Box::pin(central_handler(request, meta))
    }
}

/// Answers GetConfiguration with a single `Test` key.
async fn charge_point_handler(
    request: Inbound<CentralSystemRequest>,
    _meta: RequestMetadata,
) -> Result<CentralSystemResponse, BoxError> {
    match request.valid() {
        Some(CentralSystemRequest::GetConfiguration(_)) => Ok(GetConfigurationResponse {
            configuration_key: Some(vec![KeyValue {
                key: CiString50::new("Test")?,
                readonly: false,
                value: None,
            }]),
            unknown_key: None,
        }
        .into()),
        Some(other) => Err(format!("{} not supported", other.action()).into()),
        None => Err("invalid request".into()),
    }
}

fn quiet() -> CentralSystemConfig {
    CentralSystemConfig::default()
        .bind("127.0.0.1:0")
        .keepalive_interval(Duration::ZERO)
}

async fn start(config: CentralSystemConfig) -> CentralSystem {
    CentralSystem::start(config, central_handler)
        .await
        .expect("server should start")
}

fn url(server: &CentralSystem) -> String {
    format!("ws://{}/ocpp", server.local_addr())
}

async fn raw_connect(server: &CentralSystem, path: &str) -> RawClient {
    let mut request = format!("ws://{}{path}", server.local_addr())
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", HeaderValue::from_static("ocpp1.6"));
    let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    ws
}

async fn raw_exchange(ws: &mut RawClient, frame: Value) -> Value {
    ws.send(WsMessage::Text(frame.to_string().into())).await.unwrap();
    loop {
        let msg = tokio::time::timeout(STEP, ws.next())
            .await
            .expect("reply in time")
            .expect("stream open")
            .unwrap();
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_for_connection(server: &CentralSystem, identity: &str) {
    tokio::time::timeout(STEP, async {
        while server.connection(identity).await.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("charge point should register");
}

// =========================================================================
// Charge point → central system
// =========================================================================

#[tokio::test]
async fn test_heartbeat_round_trip() {
    let server = start(quiet()).await;
    let cp = ChargePoint::connect(&url(&server), "CP1", charge_point_handler, ChargePointConfig::default())
        .await
        .unwrap();
    assert_eq!(cp.protocol(), "ocpp1.6");

    let response = cp.send_request(HeartbeatRequest {}.into()).await.unwrap();
    assert_eq!(
        response,
        ChargePointResponse::Heartbeat(HeartbeatResponse {
            current_time: midnight()
        })
    );
}

#[tokio::test]
async fn test_handler_failure_reaches_caller_as_call_error() {
    let server = start(quiet()).await;
    let cp = ChargePoint::connect(&url(&server), "CP1", charge_point_handler, ChargePointConfig::default())
        .await
        .unwrap();

    let request = AuthorizeRequest {
        id_tag: IdToken::new("TAG1").unwrap(),
    };
    match cp.send_request(request.into()).await {
        Err(RequestError::CallError { code, description, .. }) => {
            assert_eq!(code, ErrorCode::GenericError.as_str());
            assert!(description.contains("Authorize not supported"), "{description}");
        }
        other => panic!("expected CallError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_strict_server_rejects_invalid_status_notification() {
    let seen = Seen::default();
    let server = CentralSystem::start(quiet(), Recording(Arc::clone(&seen)))
        .await
        .unwrap();
    let mut ws = raw_connect(&server, "/ocpp/CP1").await;

    let reply = raw_exchange(
        &mut ws,
        json!([2, "1", "StatusNotification", {"connectorId": 1, "errorCode": "NoError", "status": "INVALID"}]),
    )
    .await;

    assert_eq!(reply[0], 4);
    assert_eq!(reply[1], "1");
    assert_eq!(reply[2], "GenericError");
    assert!(seen.lock().unwrap().is_empty(), "handler must not run");
}

#[tokio::test]
async fn test_permissive_server_forwards_invalid_status_notification() {
    let seen = Seen::default();
    let server = CentralSystem::start(
        quiet().reject_invalid_requests(false),
        Recording(Arc::clone(&seen)),
    )
    .await
    .unwrap();
    let mut ws = raw_connect(&server, "/ocpp/CP1").await;

    let reply = raw_exchange(
        &mut ws,
        json!([2, "1", "StatusNotification", {"connectorId": 1, "errorCode": "NoError", "status": "INVALID"}]),
    )
    .await;

    assert_eq!(reply, json!([3, "1", {}]));
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "StatusNotification");
    assert!(seen[0].1.is_some(), "validation error should be attached");
}

#[tokio::test]
async fn test_malformed_call_gets_formation_violation() {
    let server = start(quiet()).await;
    let mut ws = raw_connect(&server, "/ocpp/CP1").await;

    let reply = raw_exchange(&mut ws, json!([2, "9", 42, {}])).await;
    assert_eq!(reply[0], 4);
    assert_eq!(reply[1], "9");
    assert_eq!(reply[2], "FormationViolation");
}

// =========================================================================
// Central system → charge point
// =========================================================================

#[tokio::test]
async fn test_get_configuration_from_charge_point() {
    let server = start(quiet()).await;
    let _cp = ChargePoint::connect(&url(&server), "CP1", charge_point_handler, ChargePointConfig::default())
        .await
        .unwrap();
    wait_for_connection(&server, "CP1").await;

    let response = server
        .send_request("CP1", GetConfigurationRequest::default().into())
        .await
        .unwrap();
    let CentralSystemResponse::GetConfiguration(configuration) = response else {
        panic!("expected a GetConfiguration response");
    };
    let keys = configuration.configuration_key.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(&*keys[0].key, "Test");
    assert!(!keys[0].readonly);
}

#[tokio::test]
async fn test_request_to_unknown_charge_point() {
    let server = start(quiet()).await;

    let err = server
        .send_request("nobody", GetConfigurationRequest::default().into())
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::NoConnection(_)));
    assert_eq!(err.to_string(), "there is no connection to this charge point: nobody");

    let err = server
        .send_request("", GetConfigurationRequest::default().into())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "charge point id was not provided");
}

#[tokio::test]
async fn test_close_fails_calls_in_flight() {
    let server = start(quiet()).await;
    // Connected but never answers.
    let _ws = raw_connect(&server, "/ocpp/CP1").await;
    wait_for_connection(&server, "CP1").await;
    let conn = server.connection("CP1").await.unwrap();

    let server = Arc::new(server);
    let call = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.send_request("CP1", ClearCacheRequest {}.into()).await })
    };
    while conn.pending_calls().await == 0 {
        tokio::task::yield_now().await;
    }

    server.close().await;
    let result = tokio::time::timeout(STEP, call).await.unwrap().unwrap();
    assert!(matches!(result, Err(RequestError::ConnectionClosed)));
    assert!(server.connected().await.is_empty());
}

// =========================================================================
// Identity and lifecycle
// =========================================================================

#[tokio::test]
async fn test_identity_from_site_suffixed_path() {
    let server = start(quiet()).await;
    let _ws = raw_connect(&server, "/ocpp/keba1@Hotel%2023").await;
    wait_for_connection(&server, "keba1").await;
    assert_eq!(server.connected().await, vec!["keba1".to_owned()]);
}

#[tokio::test]
async fn test_identity_with_encoded_separators_survives() {
    let server = start(quiet()).await;
    for identity in ["CP=7", "keba2@Garage 4"] {
        let cp = ChargePoint::connect(&url(&server), identity, charge_point_handler, ChargePointConfig::default())
            .await
            .unwrap();
        wait_for_connection(&server, identity).await;
        let response = server
            .send_request(identity, GetConfigurationRequest::default().into())
            .await
            .unwrap();
        assert!(matches!(response, CentralSystemResponse::GetConfiguration(_)));
        cp.close().await;
    }
}

#[tokio::test]
async fn test_identity_from_query_fallback() {
    let server = start(quiet()).await;
    let _ws = raw_connect(&server, "/ocpp/?chargerId=CP7").await;
    wait_for_connection(&server, "CP7").await;
}

#[tokio::test]
async fn test_unsupported_subprotocol_is_refused() {
    let server = start(quiet()).await;
    let config = ChargePointConfig::default().protocols(&["ocpp2.0.1"]);
    let err = ChargePoint::connect(&url(&server), "CP1", charge_point_handler, config)
        .await
        .unwrap_err();
    assert!(
        matches!(err, OcppError::Transport(TransportError::Rejected(_))),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_upgrade_without_identity_is_refused() {
    let server = start(quiet()).await;
    let result = WebSocketConnection::connect(
        &format!("ws://{}/", server.local_addr()),
        &["ocpp1.6"],
    )
    .await;
    assert!(matches!(result, Err(TransportError::Rejected(_))));
    assert!(server.connected().await.is_empty());
}

#[tokio::test]
async fn test_idle_socket_does_not_hold_up_other_charge_points() {
    let server = start(quiet()).await;
    // Opens TCP and never starts the upgrade.
    let _idle = TcpStream::connect(server.local_addr()).await.unwrap();

    let cp = tokio::time::timeout(
        STEP,
        ChargePoint::connect(&url(&server), "CP1", charge_point_handler, ChargePointConfig::default()),
    )
    .await
    .expect("connect should not wait on the idle socket")
    .unwrap();
    wait_for_connection(&server, "CP1").await;
    let response = cp
        .send_request(HeartbeatRequest {}.into())
        .await
        .unwrap();
    assert!(matches!(response, ChargePointResponse::Heartbeat(_)));
}

#[tokio::test]
async fn test_stalled_upgrade_is_dropped() {
    let server = start(quiet().handshake_timeout(Duration::from_millis(200))).await;
    let mut idle = TcpStream::connect(server.local_addr()).await.unwrap();

    // The server gives up and hangs up: EOF (or a reset) on our side.
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(STEP, idle.read(&mut buf))
        .await
        .expect("server should drop the socket");
    assert!(matches!(read, Ok(0) | Err(_)), "{read:?}");
    assert!(server.connected().await.is_empty());
}

#[tokio::test]
async fn test_charge_point_close_is_answered_and_unregisters() {
    let server = start(quiet()).await;
    let mut ws = raw_connect(&server, "/ocpp/CP1").await;
    wait_for_connection(&server, "CP1").await;

    ws.send(WsMessage::Close(None)).await.unwrap();
    let replied = tokio::time::timeout(STEP, async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Close(_))) => return true,
                Some(Ok(_)) => continue,
                _ => return false,
            }
        }
    })
    .await
    .expect("close reply in time");
    assert!(replied, "server should answer the close frame");

    tokio::time::timeout(STEP, async {
        while server.connection("CP1").await.is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("charge point should unregister");
}

#[tokio::test]
async fn test_listeners_see_connect_and_disconnect() {
    let server = start(quiet()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    server
        .add_connection_listener(move |identity, status| {
            let _ = tx.send((identity.to_owned(), status));
        })
        .await;

    let cp = ChargePoint::connect(&url(&server), "CP1", charge_point_handler, ChargePointConfig::default())
        .await
        .unwrap();
    let event = tokio::time::timeout(STEP, rx.recv()).await.unwrap().unwrap();
    assert_eq!(event, ("CP1".to_owned(), ConnectionStatus::Connected));

    cp.close().await;
    let event = tokio::time::timeout(STEP, rx.recv()).await.unwrap().unwrap();
    assert_eq!(event, ("CP1".to_owned(), ConnectionStatus::Disconnected));
}

#[tokio::test]
async fn test_reconnect_replaces_previous_connection() {
    let server = start(quiet()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    server
        .add_connection_listener(move |identity, status| {
            let _ = tx.send((identity.to_owned(), status));
        })
        .await;

    let first = ChargePoint::connect(&url(&server), "CP1", charge_point_handler, ChargePointConfig::default())
        .await
        .unwrap();
    wait_for_connection(&server, "CP1").await;
    let second = ChargePoint::connect(&url(&server), "CP1", charge_point_handler, ChargePointConfig::default())
        .await
        .unwrap();

    // The first socket is closed by the server.
    tokio::time::timeout(STEP, async {
        while first.is_connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("replaced connection should close");

    // The newer connection still answers.
    let response = server
        .send_request("CP1", GetConfigurationRequest::default().into())
        .await
        .unwrap();
    assert!(matches!(response, CentralSystemResponse::GetConfiguration(_)));
    assert!(second.is_connected());

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event.1);
    }
    assert_eq!(events, vec![ConnectionStatus::Connected, ConnectionStatus::Connected]);
}

#[tokio::test]
async fn test_raw_message_hook_sees_frames() {
    let frames: Arc<Mutex<Vec<(String, String)>>> = Arc::default();
    let sink = Arc::clone(&frames);
    let hook: RawMessageHook = Arc::new(move |identity: &str, raw: &[u8]| {
        sink.lock()
            .unwrap()
            .push((identity.to_owned(), String::from_utf8_lossy(raw).into_owned()));
    });
    let server = start(quiet().on_raw_message(hook)).await;
    let mut ws = raw_connect(&server, "/ocpp/CP1").await;

    raw_exchange(&mut ws, json!([2, "h1", "Heartbeat", {}])).await;

    let frames = frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, "CP1");
    assert_eq!(frames[0].1, r#"[2,"h1","Heartbeat",{}]"#);
}

#[tokio::test]
async fn test_keepalive_pings_reach_charge_point() {
    let config = quiet().keepalive(KeepaliveConfig {
        interval: Duration::from_secs(1),
        initial_jitter: Duration::ZERO,
    });
    let server = start(config).await;
    let mut ws = raw_connect(&server, "/ocpp/CP1").await;

    let msg = tokio::time::timeout(STEP, ws.next())
        .await
        .expect("ping in time")
        .unwrap()
        .unwrap();
    assert!(matches!(msg, WsMessage::Ping(_)), "{msg:?}");
}
