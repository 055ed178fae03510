//! End-to-end attach tests: a real proxy server in front of a fake runtime
//! attach endpoint, driven by a tokio-tungstenite client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Path, RawQuery, State, WebSocketUpgrade,
        ws::{Message as AxumMessage, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use vdcloud::endpoint::RuntimeEndpoint;

mod common;
use common::{FakeRuntime, spawn_server, test_app_with};

const ID: &str = "abc123abc123";
const GREETING: &[u8] = b"\x1b[?1049h\x1b[H\x00\xff";
const WAIT: Duration = Duration::from_secs(5);

/// What the fake runtime observed.
#[derive(Clone)]
struct Probe {
    attaches: mpsc::UnboundedSender<(String, Option<String>)>,
    frames: mpsc::UnboundedSender<AxumMessage>,
    ended: mpsc::UnboundedSender<()>,
    hang_up_after_greeting: bool,
}

struct ProbeRx {
    attaches: mpsc::UnboundedReceiver<(String, Option<String>)>,
    frames: mpsc::UnboundedReceiver<AxumMessage>,
    ended: mpsc::UnboundedReceiver<()>,
}

async fn fake_attach(
    State(probe): State<Probe>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> Response {
    let _ = probe.attaches.send((id, query));
    ws.on_upgrade(move |socket| run_fake_terminal(socket, probe))
}

async fn run_fake_terminal(mut socket: WebSocket, probe: Probe) {
    let _ = socket
        .send(AxumMessage::Binary(Bytes::from_static(GREETING)))
        .await;
    let _ = socket.send(AxumMessage::Text("visidata".into())).await;

    if probe.hang_up_after_greeting {
        let _ = socket.send(AxumMessage::Close(None)).await;
    } else {
        while let Some(Ok(msg)) = socket.recv().await {
            if matches!(msg, AxumMessage::Close(_)) {
                break;
            }
            let _ = probe.frames.send(msg);
        }
    }
    let _ = probe.ended.send(());
}

async fn spawn_fake_runtime(hang_up_after_greeting: bool) -> (SocketAddr, ProbeRx) {
    let (attaches_tx, attaches) = mpsc::unbounded_channel();
    let (frames_tx, frames) = mpsc::unbounded_channel();
    let (ended_tx, ended) = mpsc::unbounded_channel();
    let probe = Probe {
        attaches: attaches_tx,
        frames: frames_tx,
        ended: ended_tx,
        hang_up_after_greeting,
    };

    let app = Router::new()
        .route("/v1.40/containers/{id}/attach/ws", get(fake_attach))
        .with_state(probe);
    let addr = spawn_server(app).await;
    (
        addr,
        ProbeRx {
            attaches,
            frames,
            ended,
        },
    )
}

/// Start a proxy attaching to `runtime_addr` with one created and started session.
async fn spawn_proxy(runtime_addr: SocketAddr) -> SocketAddr {
    let endpoint = RuntimeEndpoint::parse(&format!("tcp://{runtime_addr}"), false).unwrap();
    let app = test_app_with(Arc::new(FakeRuntime::with_ids(&[ID])), endpoint);
    let addr = spawn_server(app).await;

    let client = reqwest::Client::new();
    let created: serde_json::Value = client
        .post(format!("http://{addr}/containers/create"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["Id"], ID);
    let started = client
        .post(format!("http://{addr}/containers/{ID}/start"))
        .send()
        .await
        .unwrap();
    assert_eq!(started.status(), reqwest::StatusCode::NO_CONTENT);

    addr
}

#[tokio::test]
async fn test_attach_ferries_frames_and_preserves_types() {
    let (runtime_addr, mut probe) = spawn_fake_runtime(false).await;
    let proxy_addr = spawn_proxy(runtime_addr).await;

    let query = "logs=1&stream=1&stdin=1&stdout=1&stderr=1";
    let (mut client, _) = connect_async(format!(
        "ws://{proxy_addr}/containers/{ID}/attach/ws?{query}"
    ))
    .await
    .unwrap();

    let (id, forwarded_query) = timeout(WAIT, probe.attaches.recv()).await.unwrap().unwrap();
    assert_eq!(id, ID);
    assert_eq!(forwarded_query.as_deref(), Some(query));

    // runtime -> client
    let first = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first, Message::Binary(Bytes::from_static(GREETING)));
    let second = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(second, Message::Text("visidata".into()));

    // client -> runtime
    client.send(Message::Text("q".into())).await.unwrap();
    client
        .send(Message::Binary(Bytes::from_static(&[0x03, 0x00, 0xff])))
        .await
        .unwrap();

    let text = timeout(WAIT, probe.frames.recv()).await.unwrap().unwrap();
    assert_eq!(text, AxumMessage::Text("q".into()));
    let binary = timeout(WAIT, probe.frames.recv()).await.unwrap().unwrap();
    assert_eq!(
        binary,
        AxumMessage::Binary(Bytes::from_static(&[0x03, 0x00, 0xff]))
    );

    // Client hangs up first; the runtime side must be closed too.
    client.close(None).await.unwrap();
    timeout(WAIT, probe.ended.recv()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_runtime_hang_up_closes_client() {
    let (runtime_addr, mut probe) = spawn_fake_runtime(true).await;
    let proxy_addr = spawn_proxy(runtime_addr).await;

    let (mut client, _) = connect_async(format!("ws://{proxy_addr}/containers/{ID}/attach/ws"))
        .await
        .unwrap();

    let (_, forwarded_query) = timeout(WAIT, probe.attaches.recv()).await.unwrap().unwrap();
    assert_eq!(forwarded_query, None);

    // Greeting frames arrive, then the connection ends.
    let mut payload = Vec::new();
    loop {
        match timeout(WAIT, client.next()).await.unwrap() {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(msg)) => payload.push(msg),
        }
    }
    assert_eq!(
        payload,
        vec![
            Message::Binary(Bytes::from_static(GREETING)),
            Message::Text("visidata".into()),
        ]
    );
    timeout(WAIT, probe.ended.recv()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_refused_runtime_rejects_client_without_upgrade() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let proxy_addr = spawn_proxy(dead_addr).await;

    let result = connect_async(format!("ws://{proxy_addr}/containers/{ID}/attach/ws")).await;
    match result {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), 502);
            assert!(response.body().as_ref().is_none_or(|body| body.is_empty()));
        }
        other => panic!("expected refused upgrade, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_rejected_attach_handshake_rejects_client_without_upgrade() {
    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    let reject = move |Path(id): Path<String>| {
        let seen_tx = seen_tx.clone();
        async move {
            let _ = seen_tx.send(id.clone());
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "message": format!("No such container: {id}") })),
            )
                .into_response()
        }
    };
    let runtime = Router::new().route("/v1.40/containers/{id}/attach/ws", get(reject));
    let runtime_addr = spawn_server(runtime).await;
    let proxy_addr = spawn_proxy(runtime_addr).await;

    let result = connect_async(format!("ws://{proxy_addr}/containers/{ID}/attach/ws")).await;
    match result {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), 502);
            assert!(response.body().as_ref().is_none_or(|body| body.is_empty()));
        }
        other => panic!("expected refused upgrade, got {:?}", other.map(|_| ())),
    }

    // The runtime saw exactly one handshake and nothing more.
    assert_eq!(timeout(WAIT, seen.recv()).await.unwrap().as_deref(), Some(ID));
    assert!(seen.try_recv().is_err());
}

#[tokio::test]
async fn test_attach_to_unknown_session_is_not_found() {
    let (runtime_addr, mut probe) = spawn_fake_runtime(false).await;
    let proxy_addr = spawn_proxy(runtime_addr).await;

    let result = connect_async(format!("ws://{proxy_addr}/containers/deadbeefdead/attach/ws")).await;
    assert!(matches!(result, Err(WsError::Http(ref response)) if response.status() == 404));
    assert!(probe.attaches.try_recv().is_err());
}
