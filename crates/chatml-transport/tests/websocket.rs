//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener on an OS-assigned port and talk to it
//! with a `tokio-tungstenite` client.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;
    use std::time::Duration;

    use chatml_transport::{Connection, Transport, WebSocketTransport};
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    type ClientStream = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// Binds a transport on port 0, connects one client and returns both
    /// ends.
    async fn connected() -> (chatml_transport::WebSocketConnection, ClientStream)
    {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("bound address");

        let server = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");
        let conn = server.await.expect("accept task should complete");
        (conn, client)
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let (conn, mut client) = connected().await;
        assert!(conn.id().into_inner() > 0);

        conn.send(br#"{"type":"presence","members":[]}"#)
            .await
            .expect("send should succeed");
        let msg = client.next().await.unwrap().unwrap();
        assert!(msg.is_text(), "UTF-8 payloads go out as text frames");
        assert_eq!(
            msg.into_data().as_ref(),
            br#"{"type":"presence","members":[]}"#
        );

        client.send(Message::text("hello from client")).await.unwrap();
        let received = conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, b"hello from client");

        conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let (conn, mut client) = connected().await;

        client.send(Message::Close(None)).await.unwrap();

        let result = conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_send_not_blocked_by_pending_recv() {
        let (conn, mut client) = connected().await;
        let conn = Arc::new(conn);

        // Park a reader; nothing arrives from the client yet.
        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), conn.send(b"ping"))
            .await
            .expect("send must not wait for the reader")
            .expect("send should succeed");
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"ping");

        client.send(Message::text("pong")).await.unwrap();
        let received = reader.await.unwrap().unwrap();
        assert_eq!(received.as_deref(), Some(&b"pong"[..]));
    }

    #[tokio::test]
    async fn test_websocket_accept_gives_up_on_stalled_upgrade() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind")
            .with_upgrade_timeout(Duration::from_millis(50));
        let addr = transport.local_addr().expect("bound address");

        // Plain TCP, never sends the upgrade request.
        let _stalled = tokio::net::TcpStream::connect(addr).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), transport.accept())
            .await
            .expect("accept should not hang");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_websocket_stalled_socket_does_not_hold_back_next_client() {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("bound address");

        let _stalled = tokio::net::TcpStream::connect(addr).await.unwrap();
        let stalled = transport.accept_socket().await.expect("tcp accept");
        let stalled_upgrade = tokio::spawn(stalled.upgrade());

        let client = tokio::spawn(tokio_tungstenite::connect_async(format!("ws://{addr}")));
        let pending = tokio::time::timeout(Duration::from_secs(1), transport.accept_socket())
            .await
            .expect("accept must not wait on the stalled socket")
            .expect("tcp accept");
        assert_eq!(pending.peer_addr().ip(), addr.ip());

        let conn = tokio::time::timeout(Duration::from_secs(1), pending.upgrade())
            .await
            .expect("upgrade must not wait on the stalled socket")
            .expect("upgrade");
        let (mut client, _) = client.await.unwrap().expect("client should connect");

        conn.send(b"first served").await.unwrap();
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"first served");
        assert!(!stalled_upgrade.is_finished());
        stalled_upgrade.abort();
    }
}
