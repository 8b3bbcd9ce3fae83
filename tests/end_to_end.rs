//! End-to-end tests over real sockets
//!
//! Each test starts a control listener and the HTTP router on ephemeral
//! localhost ports, registers render nodes over TCP the way a node would,
//! and then allocates through the HTTP endpoints.

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use matchmaker::config::MatchmakerConfig;
use matchmaker::protocol::ControlListener;
use matchmaker::registry::{
    new_shared_registry, AllocationSelector, RenderNodeRegistry, SharedRegistry,
};
use matchmaker::server::{create_router, AppState};

struct Harness {
    registry: SharedRegistry,
    control_addr: SocketAddr,
    base_url: String,
    _shutdown: watch::Sender<bool>,
}

async fn start_matchmaker() -> Harness {
    start_matchmaker_with(AllocationSelector::new()).await
}

async fn start_matchmaker_with(selector: AllocationSelector) -> Harness {
    let registry = new_shared_registry();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let control_tcp = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind control listener");
    let control_addr = control_tcp.local_addr().unwrap();
    let control = ControlListener::new(registry.clone());
    tokio::spawn(async move {
        control.run(control_tcp, shutdown_rx).await;
    });

    let http_tcp = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind HTTP listener");
    let http_addr = http_tcp.local_addr().unwrap();
    let app = create_router(
        AppState::new(registry.clone(), MatchmakerConfig::default()).with_selector(selector),
    );
    tokio::spawn(async move {
        axum::serve(http_tcp, app).await.unwrap();
    });

    Harness {
        registry,
        control_addr,
        base_url: format!("http://{}", http_addr),
        _shutdown: shutdown_tx,
    }
}

/// Poll the registry until `check` holds
async fn wait_for<F>(registry: &SharedRegistry, mut check: F)
where
    F: FnMut(&RenderNodeRegistry) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            if check(&*registry.read().await) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry never reached expected state");
}

/// A render node's side of the control connection
struct FakeNode {
    stream: TcpStream,
}

impl FakeNode {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .expect("Failed to open control connection");
        Self { stream }
    }

    /// Send one message and give the broker a moment so reads are not merged
    async fn send(&mut self, message: serde_json::Value) {
        self.stream
            .write_all(message.to_string().as_bytes())
            .await
            .expect("Failed to send control message");
        self.stream.flush().await.unwrap();
        sleep(Duration::from_millis(50)).await;
    }

    async fn register(&mut self, registry: &SharedRegistry, address: &str, port: u16, ready: bool) {
        self.send(serde_json::json!({
            "type": "connect",
            "address": address,
            "port": port,
            "ready": ready,
        }))
        .await;
        let address = address.to_string();
        wait_for(registry, |r| r.find_by_address(&address, port).is_some()).await;
    }

    /// True once the broker has closed its end
    async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 16];
        matches!(
            timeout(Duration::from_secs(5), self.stream.read(&mut buf)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

async fn query(base_url: &str) -> serde_json::Value {
    let response = reqwest::get(format!("{}/signallingserver", base_url))
        .await
        .expect("Failed to query allocation endpoint");
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_registered_streaming_node_is_allocated() {
    let mm = start_matchmaker().await;

    let mut node = FakeNode::connect(mm.control_addr).await;
    node.register(&mm.registry, "10.0.0.1", 8888, true).await;
    node.send(serde_json::json!({ "type": "streamerConnected" })).await;

    assert_eq!(
        query(&mm.base_url).await,
        serde_json::json!({ "signallingServer": "10.0.0.1:8888" })
    );
}

#[tokio::test]
async fn test_empty_registry_returns_failure_payload() {
    let mm = start_matchmaker().await;

    let body = query(&mm.base_url).await;
    assert_eq!(body["signallingServer"], "");
    assert_eq!(body["error"], "No signalling servers available");
}

#[tokio::test]
async fn test_back_to_back_allocations_skip_cooling_node() {
    let mm = start_matchmaker().await;

    let mut first = FakeNode::connect(mm.control_addr).await;
    first.register(&mm.registry, "10.0.0.1", 8888, true).await;
    let mut second = FakeNode::connect(mm.control_addr).await;
    second.register(&mm.registry, "10.0.0.2", 8888, true).await;

    assert_eq!(query(&mm.base_url).await["signallingServer"], "10.0.0.1:8888");
    assert_eq!(query(&mm.base_url).await["signallingServer"], "10.0.0.2:8888");
    assert_eq!(query(&mm.base_url).await["signallingServer"], "");
}

#[tokio::test]
async fn test_single_node_cooldown() {
    let mm = start_matchmaker().await;

    let mut node = FakeNode::connect(mm.control_addr).await;
    node.register(&mm.registry, "10.0.0.1", 8888, true).await;

    assert_eq!(query(&mm.base_url).await["signallingServer"], "10.0.0.1:8888");
    assert_eq!(query(&mm.base_url).await["signallingServer"], "");
}

#[tokio::test]
async fn test_zero_cooldown_reallocates_same_node() {
    let selector = AllocationSelector::new().with_cooldown(chrono::Duration::zero());
    let mm = start_matchmaker_with(selector).await;

    let mut node = FakeNode::connect(mm.control_addr).await;
    node.register(&mm.registry, "10.0.0.1", 8888, true).await;

    assert_eq!(query(&mm.base_url).await["signallingServer"], "10.0.0.1:8888");
    assert_eq!(query(&mm.base_url).await["signallingServer"], "10.0.0.1:8888");
}

#[tokio::test]
async fn test_busy_node_is_not_allocated() {
    let mm = start_matchmaker().await;

    let mut node = FakeNode::connect(mm.control_addr).await;
    node.register(&mm.registry, "10.0.0.1", 8888, true).await;
    node.send(serde_json::json!({ "type": "clientConnected" })).await;
    wait_for(&mm.registry, |r| {
        r.values().next().map(|e| e.num_connected_clients) == Some(1)
    })
    .await;

    assert_eq!(query(&mm.base_url).await["signallingServer"], "");
}

#[tokio::test]
async fn test_reconnect_replaces_registration() {
    let mm = start_matchmaker().await;

    let mut old = FakeNode::connect(mm.control_addr).await;
    old.register(&mm.registry, "10.0.0.1", 8888, true).await;
    let old_id = mm.registry.read().await.iter().next().unwrap().0;

    let mut new = FakeNode::connect(mm.control_addr).await;
    new.register(&mm.registry, "10.0.0.1", 8888, true).await;
    wait_for(&mm.registry, |r| r.len() == 1 && !r.contains(old_id)).await;

    // The stale connection is no longer registered; its next message ends it
    old.send(serde_json::json!({ "type": "ping" })).await;
    assert!(old.is_closed().await);

    sleep(Duration::from_millis(50)).await;
    let registry = mm.registry.read().await;
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.values().next().unwrap().endpoint(), "10.0.0.1:8888");
}

#[tokio::test]
async fn test_disconnect_removes_node() {
    let mm = start_matchmaker().await;

    let node = {
        let mut node = FakeNode::connect(mm.control_addr).await;
        node.register(&mm.registry, "10.0.0.1", 8888, true).await;
        node
    };
    drop(node);

    wait_for(&mm.registry, |r| r.is_empty()).await;
    assert_eq!(query(&mm.base_url).await["signallingServer"], "");
}

#[tokio::test]
async fn test_malformed_message_closes_connection() {
    let mm = start_matchmaker().await;

    let mut node = FakeNode::connect(mm.control_addr).await;
    node.register(&mm.registry, "10.0.0.1", 8888, true).await;

    node.stream.write_all(b"definitely not json").await.unwrap();
    assert!(node.is_closed().await);
    wait_for(&mm.registry, |r| r.is_empty()).await;
}

#[tokio::test]
async fn test_custom_html_with_encoded_separator_is_rejected() {
    let mm = start_matchmaker().await;

    let mut node = FakeNode::connect(mm.control_addr).await;
    node.register(&mm.registry, "10.0.0.1", 8888, true).await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    for path in ["a%0Ab.html", "a%3Fb.html"] {
        let response = client
            .get(format!("{}/custom_html/{}", mm.base_url, path))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get("location").is_none());
    }

    // The node was never stamped, so it is still free
    assert_eq!(query(&mm.base_url).await["signallingServer"], "10.0.0.1:8888");
}

#[tokio::test]
async fn test_redirect_to_allocated_node() {
    let mm = start_matchmaker().await;

    let mut node = FakeNode::connect(mm.control_addr).await;
    node.register(&mm.registry, "10.0.0.1", 8888, true).await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let response = client
        .get(format!("{}/custom_html/player.html", mm.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers()["location"],
        "http://10.0.0.1:8888/custom_html/player.html"
    );

    // Cooling down: the next visitor gets the retry page
    let response = client.get(format!("{}/", mm.base_url)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("All 1 render nodes are in use"));
}
