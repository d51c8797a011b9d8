//! End-to-end tests against a real server using a WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use vicinity_core::VehicleId;
use vicinity_server::{
    start, Collaborators, HubConfig, ServerConfig, ServerHandle, SharedSecretVerifier,
};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn boot_with(hub_config: HubConfig, collaborators: Collaborators) -> ServerHandle {
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerConfig::default()
    };
    start(config, hub_config, collaborators).await.unwrap()
}

async fn boot() -> ServerHandle {
    boot_with(HubConfig::default(), Collaborators::default()).await
}

fn ws_url(server: &ServerHandle) -> String {
    format!("ws://{}/ws", server.addr())
}

fn http_url(server: &ServerHandle, path: &str) -> String {
    format!("http://{}{path}", server.addr())
}

struct Client {
    ws: WsStream,
}

impl Client {
    /// Connect and consume the `connected` greeting.
    async fn connect(server: &ServerHandle) -> Self {
        let (ws, _) = connect_async(ws_url(server)).await.unwrap();
        let mut client = Self { ws };
        let greeting = client.read_json().await;
        assert_eq!(greeting["event"], "connected");
        assert!(greeting["data"]["connectionId"].is_string());
        client
    }

    async fn register(server: &ServerHandle, vehicle: &str) -> Self {
        let mut client = Self::connect(server).await;
        client
            .send("register", json!({"vehicleId": vehicle, "driverName": format!("driver {vehicle}")}))
            .await;
        let ack = client.next_event("registered").await;
        assert_eq!(ack["vehicleId"], vehicle);
        client
    }

    async fn send(&mut self, event: &str, data: Value) {
        let frame = json!({"event": event, "data": data});
        self.ws.send(Message::text(frame.to_string())).await.unwrap();
    }

    async fn read_json(&mut self) -> Value {
        loop {
            let msg = timeout(TIMEOUT, self.ws.next())
                .await
                .expect("timeout waiting for message")
                .expect("stream closed")
                .expect("ws error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Skip frames until `event` arrives; returns its data.
    async fn next_event(&mut self, event: &str) -> Value {
        loop {
            let frame = self.read_json().await;
            if frame["event"] == event {
                return frame["data"].clone();
            }
        }
    }

    /// Read until the server closes the socket; returns the close code.
    async fn close_code(&mut self) -> Option<u16> {
        loop {
            let next = timeout(TIMEOUT, self.ws.next())
                .await
                .expect("timeout waiting for close");
            match next {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    }
}

#[tokio::test]
async fn nearby_vehicles_enter_and_exit() {
    let server = boot().await;
    let mut v1 = Client::register(&server, "v1").await;
    let mut v2 = Client::register(&server, "v2").await;

    v1.send("location_update", json!({"vehicleId": "v1", "lat": 12.9716, "lon": 77.5946}))
        .await;
    let nearby = v1.next_event("nearby_vehicles").await;
    assert_eq!(nearby["vehicles"], json!([]));

    v2.send("location_update", json!({"vehicleId": "v2", "lat": 12.9720, "lon": 77.5950}))
        .await;
    let peer = v1.next_event("peer_location").await;
    assert_eq!(peer["vehicleId"], "v2");
    let d = peer["distanceM"].as_f64().unwrap();
    assert!((55.0..=65.0).contains(&d), "distance {d}");

    let nearby = v2.next_event("nearby_vehicles").await;
    assert_eq!(nearby["vehicles"][0]["vehicleId"], "v1");
    let enter = v2.next_event("proximity_event").await;
    assert_eq!(enter["eventType"], "enter");

    // Respect the coalescing interval so the move is processed at once.
    tokio::time::sleep(Duration::from_millis(200)).await;
    v2.send("location_update", json!({"vehicleId": "v2", "lat": 13.10, "lon": 77.70}))
        .await;
    let nearby = v2.next_event("nearby_vehicles").await;
    assert_eq!(nearby["vehicles"], json!([]));
    let exit = v2.next_event("proximity_event").await;
    assert_eq!(exit["eventType"], "exit");
    assert_eq!(exit["peerVehicleId"], "v1");

    server.shutdown().await;
}

#[tokio::test]
async fn direct_message_is_delivered() {
    let server = boot().await;
    let mut a = Client::register(&server, "car-a").await;
    let mut b = Client::register(&server, "car-b").await;

    a.send(
        "send_message",
        json!({"senderId": "car-a", "recipientId": "car-b", "content": "lunch?"}),
    )
    .await;
    let received = b.next_event("receive_message").await;
    assert_eq!(received["content"], "lunch?");
    let sent = a.next_event("message_sent").await;
    assert_eq!(sent["status"], "delivered");

    server.shutdown().await;
}

#[tokio::test]
async fn consent_handshake() {
    let server = boot().await;
    let mut a = Client::register(&server, "car-a").await;
    let mut b = Client::register(&server, "car-b").await;

    b.send(
        "connect_response",
        json!({"requesterId": "car-a", "targetId": "car-b", "approved": true}),
    )
    .await;
    assert_eq!(b.next_event("error").await["code"], "no_pending_request");

    a.send("connect_request", json!({"requesterId": "car-a", "targetId": "car-b"}))
        .await;
    assert_eq!(b.next_event("connect_request").await["requesterId"], "car-a");

    b.send(
        "connect_response",
        json!({"requesterId": "car-a", "targetId": "car-b", "approved": true}),
    )
    .await;
    let answer = a.next_event("connect_response").await;
    assert_eq!(answer["approved"], true);

    server.shutdown().await;
}

#[tokio::test]
async fn protocol_errors_keep_the_connection_open() {
    let server = boot().await;
    let mut c = Client::connect(&server).await;

    c.send("heartbeat", json!({})).await;
    assert_eq!(c.next_event("error").await["code"], "not_registered");

    c.send("warp_drive", json!({})).await;
    let err = c.next_event("error").await;
    assert_eq!(err["code"], "unknown_event");
    assert!(err["details"]["knownEvents"].is_array());

    c.ws.send(Message::text("not json")).await.unwrap();
    assert_eq!(c.next_event("error").await["code"], "validation_error");

    c.send("ping", json!({})).await;
    assert!(c.next_event("pong").await["timestamp"].is_number());

    server.shutdown().await;
}

#[tokio::test]
async fn second_registration_replaces_the_first() {
    let server = boot().await;
    let mut first = Client::register(&server, "car-a").await;
    let _second = Client::register(&server, "car-a").await;

    let notice = first.next_event("error").await;
    assert_eq!(notice["code"], "session_replaced");

    let stats = server.hub().stats().await.unwrap();
    assert_eq!(stats.vehicles, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn bad_token_closes_with_auth_failed() {
    let hub_config = HubConfig {
        auth_required: true,
        ..HubConfig::default()
    };
    let verifier = Arc::new(SharedSecretVerifier::new(SecretString::from("fleet-secret")));
    let token = verifier.issue(&VehicleId::from_raw("car-a"));
    let collaborators = Collaborators {
        verifier,
        ..Collaborators::default()
    };
    let server = boot_with(hub_config, collaborators).await;

    let mut good = Client::connect(&server).await;
    good.send("register", json!({"vehicleId": "car-a", "authToken": token}))
        .await;
    assert_eq!(good.next_event("registered").await["vehicleId"], "car-a");

    let mut bad = Client::connect(&server).await;
    bad.send("register", json!({"vehicleId": "car-b", "authToken": "forged"}))
        .await;
    assert_eq!(bad.next_event("error").await["code"], "auth_failed");
    assert_eq!(bad.close_code().await, Some(4001));

    server.shutdown().await;
}

#[tokio::test]
async fn http_queries_reflect_registrations() {
    let server = boot().await;
    let mut a = Client::register(&server, "car-a").await;
    a.send("location_update", json!({"vehicleId": "car-a", "lat": 48.8566, "lon": 2.3522}))
        .await;
    a.next_event("nearby_vehicles").await;

    let http = reqwest::Client::new();
    let health: Value = http
        .get(http_url(&server, "/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["vehicles"], 1);
    assert_eq!(health["located"], 1);

    let vehicle: Value = http
        .get(http_url(&server, "/vehicles/car-a"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(vehicle["driverName"], "driver car-a");
    assert_eq!(vehicle["lat"], 48.8566);
    assert_eq!(vehicle["geohash"].as_str().unwrap().len(), 6);

    let missing = http
        .get(http_url(&server, "/vehicles/nobody"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    server.shutdown().await;
}

#[tokio::test]
async fn disconnect_broadcasts_offline() {
    let server = boot().await;
    let mut a = Client::register(&server, "car-a").await;
    let b = Client::register(&server, "car-b").await;
    let online = a.next_event("presence_update").await;
    assert_eq!(online["vehicleId"], "car-b");

    drop(b);
    let offline = a.next_event("presence_update").await;
    assert_eq!(offline["vehicleId"], "car-b");
    assert_eq!(offline["status"], "offline");

    server.shutdown().await;
}
