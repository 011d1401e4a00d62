fn main() {
    println!("Run `cargo test -p fireline-e2e` to execute the end-to-end scenarios.");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    use fireline_client::{ClientConfig, ClientEvent, ConnStatus, EdgeClient, WsConnector};
    use fireline_edge::{EdgeServer, ServerConfig};

    type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start_edge() -> (Arc<EdgeServer>, tokio::task::JoinHandle<()>, String) {
        let server = EdgeServer::new(ServerConfig {
            port: 0,
            ..ServerConfig::default()
        });
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        let mut port = 0;
        for _ in 0..100 {
            port = server.port().await;
            if port > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(port > 0, "server should bind");
        (server, handle, format!("ws://127.0.0.1:{port}/"))
    }

    /// Next text frame as JSON, skipping keepalive frames.
    async fn recv_json(ws: &mut Ws) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("read error");
            match msg {
                WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    /// Asserts no text frame arrives within the window.
    async fn expect_quiet(ws: &mut Ws, window: Duration) {
        let result = tokio::time::timeout(window, async {
            loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                    other => break other,
                }
            }
        })
        .await;
        if let Ok(frame) = result {
            panic!("expected quiet, got {frame:?}");
        }
    }

    async fn send(ws: &mut Ws, text: &str) {
        ws.send(WsMessage::Text(text.to_string().into()))
            .await
            .unwrap();
    }

    /// Connects, handshakes, and returns the stream plus the snapshot.
    async fn join(url: &str, incident: &str, responder: &str) -> (Ws, Value) {
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        send(
            &mut ws,
            &format!(
                r#"{{"type":"CLIENT_HELLO","incidentId":"{incident}","responderId":"{responder}"}}"#
            ),
        )
        .await;

        let ack = recv_json(&mut ws).await;
        assert_eq!(ack["type"], "ACK", "handshake confirmation comes first");
        assert_eq!(ack["incidentId"], incident);

        let snap = recv_json(&mut ws).await;
        assert_eq!(snap["type"], "INCIDENT_SNAPSHOT");
        (ws, snap)
    }

    #[tokio::test]
    async fn join_and_snapshot() {
        let (server, handle, url) = start_edge().await;

        let (_ws, snap) = join(&url, "I1", "A").await;
        assert_eq!(snap["incidentId"], "I1");
        assert_eq!(snap["responders"], serde_json::json!(["A"]));
        assert_eq!(snap["locations"], serde_json::json!({}));
        assert_eq!(snap["sos"], serde_json::json!({}));

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cross_incident_isolation() {
        let (server, handle, url) = start_edge().await;

        let (mut ws_a, _) = join(&url, "I1", "A").await;
        let (mut ws_b, _) = join(&url, "I2", "B").await;

        send(
            &mut ws_a,
            r#"{"type":"CHAT_SEND","msgId":"m1","text":"hi"}"#,
        )
        .await;

        // A gets the ACK and its own echo.
        let ack = recv_json(&mut ws_a).await;
        assert_eq!(ack["type"], "ACK_MSG");
        assert_eq!(ack["msgId"], "m1");
        let echo = recv_json(&mut ws_a).await;
        assert_eq!(echo["type"], "CHAT_SEND");
        assert_eq!(echo["from"], "A");

        // B, bound to another incident, receives nothing.
        expect_quiet(&mut ws_b, Duration::from_millis(500)).await;

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn sos_persists_across_reconnect() {
        let (server, handle, url) = start_edge().await;

        let (mut ws, _) = join(&url, "I1", "A").await;
        send(
            &mut ws,
            r#"{"type":"SOS_RAISE","msgId":"s1","note":"trapped"}"#,
        )
        .await;
        recv_json(&mut ws).await; // ACK_MSG
        recv_json(&mut ws).await; // echo
        ws.close(None).await.unwrap();
        drop(ws);

        // Wait for the server to process the disconnect.
        for _ in 0..100 {
            if server.coordinator().room_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let (_ws2, snap) = join(&url, "I1", "A").await;
        assert_eq!(snap["sos"]["A"]["note"], "trapped");
        assert!(snap["sos"]["A"]["at"].is_u64());

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_send_one_broadcast_two_acks() {
        let (server, handle, url) = start_edge().await;

        let (mut ws_a, _) = join(&url, "I1", "A").await;
        let (mut ws_b, _) = join(&url, "I1", "B").await;

        let update = r#"{"type":"LOCATION_UPDATE","msgId":"L1","lat":37.0,"lng":-122.0}"#;
        send(&mut ws_a, update).await;
        send(&mut ws_a, update).await;

        // A: ACK, echo, ACK. The repeat is acknowledged but not re-run.
        assert_eq!(recv_json(&mut ws_a).await["type"], "ACK_MSG");
        let echo = recv_json(&mut ws_a).await;
        assert_eq!(echo["type"], "LOCATION_UPDATE");
        let ack2 = recv_json(&mut ws_a).await;
        assert_eq!(ack2["type"], "ACK_MSG");
        assert_eq!(ack2["msgId"], "L1");

        // B sees exactly one broadcast.
        let seen = recv_json(&mut ws_b).await;
        assert_eq!(seen["type"], "LOCATION_UPDATE");
        assert_eq!(seen["responderId"], "A");
        expect_quiet(&mut ws_b, Duration::from_millis(500)).await;

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn invalid_coordinates_error_ack_no_broadcast() {
        let (server, handle, url) = start_edge().await;

        let (mut ws_a, _) = join(&url, "I1", "A").await;
        let (mut ws_b, _) = join(&url, "I1", "B").await;

        send(
            &mut ws_a,
            r#"{"type":"LOCATION_UPDATE","msgId":"L2","lat":200.0,"lng":0.0}"#,
        )
        .await;

        // The msgId was marked, so the ACK still arrives, then the error.
        let ack = recv_json(&mut ws_a).await;
        assert_eq!(ack["type"], "ACK_MSG");
        assert_eq!(ack["msgId"], "L2");
        let err = recv_json(&mut ws_a).await;
        assert_eq!(err["type"], "ERROR");

        // No broadcast, no state change.
        expect_quiet(&mut ws_b, Duration::from_millis(500)).await;
        drop(ws_a);

        let (_ws3, snap) = join(&url, "I1", "A2").await;
        assert_eq!(snap["locations"], serde_json::json!({}));

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn offline_queue_drains_by_priority_on_reconnect() {
        // Reserve a port, then start the client before any server exists.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("ws://127.0.0.1:{port}/");

        let (client, mut events) = EdgeClient::start(
            ClientConfig::new("I1", "sim"),
            WsConnector::new(url.as_str()),
        );

        // Queue while thoroughly offline, worst-priority first.
        client.send_chat("sitrep");
        client.send_location(37.0, -122.0, None);
        client.raise_sos(Some("trapped"));
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Bring the edge up on the reserved port; the client reconnects.
        let server = EdgeServer::new(ServerConfig {
            port,
            ..ServerConfig::default()
        });
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        // The self-echoes arrive in the order the edge observed the sends.
        let collect = async {
            let mut order = Vec::new();
            while order.len() < 3 {
                match events.recv().await {
                    Some(ClientEvent::Broadcast(env)) => order.push(env.type_name),
                    Some(_) => {}
                    None => break,
                }
            }
            order
        };
        let order = tokio::time::timeout(Duration::from_secs(30), collect)
            .await
            .expect("queue should drain after reconnect");
        assert_eq!(order, vec!["SOS_RAISE", "LOCATION_UPDATE", "CHAT_SEND"]);

        client.shutdown();
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reliable_client_full_roundtrip() {
        let (server, handle, url) = start_edge().await;

        let (mut watcher, _) = join(&url, "I1", "watcher").await;

        let (client, mut events) =
            EdgeClient::start(ClientConfig::new("I1", "sim"), WsConnector::new(url.as_str()));

        // Wait for handshake and snapshot.
        let wait_join = async {
            let mut joined = false;
            let mut snapshotted = false;
            while !(joined && snapshotted) {
                match events.recv().await.expect("event stream open") {
                    ClientEvent::Joined { incident_id } => {
                        assert_eq!(incident_id, "I1");
                        joined = true;
                    }
                    ClientEvent::SnapshotApplied => snapshotted = true,
                    _ => {}
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), wait_join)
            .await
            .expect("client should join");

        let view = client.view();
        assert_eq!(view.status, ConnStatus::Connected);
        assert!(view.responders.contains(&"watcher".to_string()));
        assert!(view.responders.contains(&"sim".to_string()));

        // A queued chat reaches the rest of the room.
        client.send_chat("on scene");
        let chat = recv_json(&mut watcher).await;
        assert_eq!(chat["type"], "CHAT_SEND");
        assert_eq!(chat["from"], "sim");
        assert_eq!(chat["text"], "on scene");

        // The sender retires the item on its ACK.
        let wait_delivery = async {
            loop {
                if let Some(ClientEvent::Delivered { .. }) =
                    events.recv().await
                {
                    break;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), wait_delivery)
            .await
            .expect("chat should be acknowledged");

        client.shutdown();
        server.shutdown();
        handle.await.unwrap();
    }
}
