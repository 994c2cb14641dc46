//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener on an OS-assigned port and talk to it with
//! plain `tokio-tungstenite` clients, so the handshake, sub-protocol
//! negotiation and framing are exercised end to end.

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use ocppj_transport::{
        Connection, Incoming, Transport, TransportError, UpgradeRequest,
        WebSocketConnection, WebSocketTransport,
    };
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    async fn bind() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr").to_string();
        (transport, addr)
    }

    async fn accept_one(
        transport: &mut WebSocketTransport,
    ) -> Result<(WebSocketConnection, UpgradeRequest), TransportError> {
        transport.accept().await?.upgrade().await
    }

    #[tokio::test]
    async fn test_accept_negotiates_protocol_and_captures_target() {
        let (mut transport, addr) = bind().await;

        let server = tokio::spawn(async move {
            accept_one(&mut transport).await.expect("should accept")
        });

        let (client, protocol) = WebSocketConnection::connect(
            &format!("ws://{addr}/ocpp/CP%201"),
            &["ocpp1.6"],
        )
        .await
        .expect("client should connect");
        assert_eq!(protocol, "ocpp1.6");

        let (server_conn, upgrade) = server.await.expect("task should complete");
        assert_eq!(upgrade.target, "/ocpp/CP%201");
        assert_eq!(upgrade.protocol.as_deref(), Some("ocpp1.6"));
        assert!(upgrade.remote_addr.is_some());
        assert!(server_conn.id().into_inner() > 0);

        // --- Server sends, client receives ---
        server_conn
            .send(r#"[2,"1","Reset",{"type":"Soft"}]"#)
            .await
            .expect("send should succeed");
        let received = client.recv().await.expect("recv").expect("message");
        assert_eq!(received, br#"[2,"1","Reset",{"type":"Soft"}]"#);

        // --- Client sends, server receives ---
        client.send(r#"[3,"1",{"status":"Accepted"}]"#).await.unwrap();
        let received = server_conn.recv().await.unwrap().unwrap();
        assert_eq!(received, br#"[3,"1",{"status":"Accepted"}]"#);

        // --- Keepalive ping does not surface as a message ---
        server_conn.ping().await.expect("ping should succeed");
        client.send("[]").await.unwrap();
        assert_eq!(server_conn.recv().await.unwrap().unwrap(), b"[]");

        server_conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_upgrade_without_known_protocol_is_rejected() {
        let (mut transport, addr) = bind().await;

        let server = tokio::spawn(async move { accept_one(&mut transport).await });

        let result =
            WebSocketConnection::connect(&format!("ws://{addr}/cp1"), &["ocpp2.0.1"])
                .await;
        assert!(matches!(result, Err(TransportError::Rejected(_))));

        let accepted = server.await.expect("task should complete");
        assert!(matches!(accepted, Err(TransportError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_target_filter_refuses_upgrade() {
        let (transport, addr) = bind().await;
        let mut transport = transport.with_target_filter(|target| target.starts_with("/ocpp/"));

        let server = tokio::spawn(async move { accept_one(&mut transport).await });

        let result =
            WebSocketConnection::connect(&format!("ws://{addr}/other"), &["ocpp1.6"]).await;
        assert!(matches!(result, Err(TransportError::Rejected(_))));
        assert!(matches!(
            server.await.expect("task should complete"),
            Err(TransportError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_recv_returns_none_on_client_close() {
        let (mut transport, addr) = bind().await;

        let server = tokio::spawn(async move {
            accept_one(&mut transport).await.expect("should accept")
        });

        let mut request = format!("ws://{addr}/cp2").into_client_request().unwrap();
        request
            .headers_mut()
            .insert("sec-websocket-protocol", "ocpp1.6".parse().unwrap());
        let (mut client_ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .expect("client should connect");
        let (server_conn, _) = server.await.unwrap();

        client_ws.send(Message::Close(None)).await.unwrap();

        let result = server_conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");

        // The server answers the close handshake.
        let replied = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match client_ws.next().await {
                    Some(Ok(Message::Close(_))) => return true,
                    Some(Ok(_)) => continue,
                    _ => return false,
                }
            }
        })
        .await
        .expect("close reply should arrive");
        assert!(replied, "server should echo the close frame");

        // Sending on a link the peer closed reports it as closed.
        assert!(matches!(
            server_conn.send("[]").await,
            Err(TransportError::ConnectionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        let (transport, addr) = bind().await;
        let mut transport =
            transport.with_handshake_timeout(Duration::from_millis(100));

        // Connects at the TCP level, then never says a word.
        let _idle = TcpStream::connect(&addr).await.unwrap();
        let incoming = transport.accept().await.expect("should accept");
        assert!(incoming.remote_addr().is_some());

        assert!(matches!(
            incoming.upgrade().await,
            Err(TransportError::HandshakeTimeout(limit)) if limit == Duration::from_millis(100)
        ));
    }

    #[tokio::test]
    async fn test_accept_does_not_wait_for_handshake() {
        let (mut transport, addr) = bind().await;

        let _idle = TcpStream::connect(&addr).await.unwrap();
        let stalled = transport.accept().await.expect("should accept");

        // A second peer upgrades while the first one is still silent.
        let server = tokio::spawn(async move {
            let ready = accept_one(&mut transport).await;
            (ready, stalled)
        });
        let (client, _) = tokio::time::timeout(
            Duration::from_secs(5),
            WebSocketConnection::connect(&format!("ws://{addr}/cp3"), &["ocpp1.6"]),
        )
        .await
        .expect("connect should not wait on the idle peer")
        .expect("client should connect");

        let (ready, _stalled) = server.await.unwrap();
        let (server_conn, upgrade) = ready.expect("upgrade should succeed");
        assert_eq!(upgrade.target, "/cp3");
        server_conn.send("[]").await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), b"[]");
    }
}
