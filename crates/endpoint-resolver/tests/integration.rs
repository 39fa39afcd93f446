use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use endpoint_resolver::probe::probe;
use endpoint_resolver::protocol::{OperationMessage, decode_msg, encode_msg, message_type};
use endpoint_resolver::{
    EndpointStateStore, MemoryStorage, StaticPage, StoreContext, StoreEvent, StoreOptions,
    WsProbe, find_first_valid,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// How the mock server answers `connection_init`.
#[derive(Debug, Clone, Copy)]
enum Behavior {
    Ack,
    KeepAliveThenAck,
    Reject,
    Close,
    Silent,
    /// Acknowledge only connections to this path, reject the rest.
    AckPath(&'static str),
    /// Acknowledge, but leave `Sec-WebSocket-Protocol` out of the 101 response.
    AckWithoutProtocolEcho,
}

/// A `graphql-ws` server accepting any number of connections.
struct MockGraphQlServer {
    port: u16,
    connections: Arc<AtomicUsize>,
    /// Connections whose client has gone away.
    ended: Arc<AtomicUsize>,
    protocols: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl MockGraphQlServer {
    async fn start(behavior: Behavior) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let connections = Arc::new(AtomicUsize::new(0));
        let ended = Arc::new(AtomicUsize::new(0));
        let protocols = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn({
            let connections = connections.clone();
            let ended = ended.clone();
            let protocols = protocols.clone();
            async move {
                while let Ok((tcp, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let ended = ended.clone();
                    let protocols = protocols.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve(tcp, behavior, protocols).await {
                            eprintln!("mock server connection ended: {e}");
                        }
                        ended.fetch_add(1, Ordering::SeqCst);
                    });
                }
            }
        });

        Ok(Self {
            port,
            connections,
            ended,
            protocols,
            task,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("ws://127.0.0.1:{}{path}", self.port)
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Waits until `count` connections have been closed by their client.
    async fn wait_for_ended(&self, count: usize) -> bool {
        let ended = async {
            while self.ended.load(Ordering::SeqCst) < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), ended).await.is_ok()
    }

    fn protocols(&self) -> Result<Vec<String>, BoxError> {
        let seen = self.protocols.lock().map_err(|e| e.to_string())?;
        Ok(seen.clone())
    }
}

impl Drop for MockGraphQlServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    tcp: TcpStream,
    behavior: Behavior,
    protocols: Arc<Mutex<Vec<String>>>,
) -> Result<(), BoxError> {
    let mut path = String::new();
    // The error type is fixed by the handshake `Callback` trait.
    #[allow(clippy::result_large_err)]
    let callback = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
        path = req.uri().path().to_string();
        if let Some(protocol) = req.headers().get(SEC_WEBSOCKET_PROTOCOL) {
            if let Ok(mut seen) = protocols.lock() {
                seen.push(protocol.to_str().unwrap_or_default().to_string());
            }
            if !matches!(behavior, Behavior::AckWithoutProtocolEcho) {
                resp.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol.clone());
            }
        }
        Ok(resp)
    };
    let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback).await?;

    let init = read_operation(&mut ws).await?;
    if !init.is(message_type::CONNECTION_INIT) {
        return Err(format!("expected connection_init, got {}", init.kind).into());
    }

    match behavior {
        Behavior::Ack | Behavior::AckWithoutProtocolEcho => {
            send(&mut ws, message_type::CONNECTION_ACK).await?;
        }
        Behavior::KeepAliveThenAck => {
            send(&mut ws, message_type::KEEP_ALIVE).await?;
            send(&mut ws, message_type::CONNECTION_ACK).await?;
        }
        Behavior::Reject => send(&mut ws, message_type::CONNECTION_ERROR).await?,
        Behavior::Close => ws.close(None).await?,
        Behavior::Silent => {}
        Behavior::AckPath(ack_path) if ack_path == path => {
            send(&mut ws, message_type::CONNECTION_ACK).await?;
        }
        Behavior::AckPath(_) => send(&mut ws, message_type::CONNECTION_ERROR).await?,
    }

    // Drain until the client goes away.
    while let Some(frame) = ws.next().await {
        if frame.is_err() {
            break;
        }
    }
    Ok(())
}

async fn read_operation(ws: &mut WsStream) -> Result<OperationMessage, BoxError> {
    loop {
        let frame = ws.next().await.ok_or("WebSocket closed unexpectedly")??;
        if let tungstenite::Message::Text(text) = frame {
            return Ok(decode_msg(text.as_str())?);
        }
    }
}

async fn send(ws: &mut WsStream, kind: &str) -> Result<(), BoxError> {
    let mut msg = OperationMessage::new(kind);
    if kind == message_type::CONNECTION_ERROR {
        msg.payload = Some(serde_json::json!({ "message": "not allowed" }));
    }
    ws.send(tungstenite::Message::Text(encode_msg(&msg)?.into()))
        .await?;
    Ok(())
}

const SHORT_TIMEOUT: Duration = Duration::from_millis(300);

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn probe_succeeds_on_connection_ack() {
    let server = MockGraphQlServer::start(Behavior::Ack).await.unwrap();
    assert!(probe(&server.url("/graphql"), Duration::from_secs(2)).await);
    assert_eq!(server.protocols().unwrap(), ["graphql-ws"]);
}

#[tokio::test]
async fn connection_released_after_ack() {
    let server = MockGraphQlServer::start(Behavior::Ack).await.unwrap();
    assert!(probe(&server.url("/graphql"), Duration::from_secs(2)).await);
    assert!(server.wait_for_ended(1).await, "client kept the socket open");
}

#[tokio::test]
async fn probe_ignores_keep_alive_before_ack() {
    let server = MockGraphQlServer::start(Behavior::KeepAliveThenAck)
        .await
        .unwrap();
    assert!(probe(&server.url("/graphql"), Duration::from_secs(2)).await);
}

#[tokio::test]
async fn probe_fails_on_connection_error() {
    let server = MockGraphQlServer::start(Behavior::Reject).await.unwrap();
    let started = Instant::now();
    assert!(!probe(&server.url("/graphql"), Duration::from_secs(2)).await);
    // Rejection resolves without waiting for the timeout.
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn connection_released_after_rejection() {
    let server = MockGraphQlServer::start(Behavior::Reject).await.unwrap();
    assert!(!probe(&server.url("/graphql"), Duration::from_secs(2)).await);
    assert!(server.wait_for_ended(1).await, "client kept the socket open");
}

#[tokio::test]
async fn probe_fails_when_server_closes() {
    let server = MockGraphQlServer::start(Behavior::Close).await.unwrap();
    assert!(!probe(&server.url("/graphql"), Duration::from_secs(2)).await);
}

#[tokio::test]
async fn probe_times_out_on_silent_server() {
    let server = MockGraphQlServer::start(Behavior::Silent).await.unwrap();
    let started = Instant::now();
    assert!(!probe(&server.url("/graphql"), SHORT_TIMEOUT).await);
    let elapsed = started.elapsed();
    assert!(elapsed >= SHORT_TIMEOUT, "resolved early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "resolved late: {elapsed:?}");
}

#[tokio::test]
async fn connection_released_after_timeout() {
    let server = MockGraphQlServer::start(Behavior::Silent).await.unwrap();
    assert!(!probe(&server.url("/graphql"), SHORT_TIMEOUT).await);
    assert_eq!(server.connections(), 1);
    assert!(server.wait_for_ended(1).await, "client kept the socket open");
}

#[tokio::test]
async fn ack_without_subprotocol_echo_is_not_accepted() {
    let server = MockGraphQlServer::start(Behavior::AckWithoutProtocolEcho)
        .await
        .unwrap();
    // The client requires the negotiated subprotocol to be echoed.
    assert!(!probe(&server.url("/graphql"), Duration::from_secs(2)).await);
    assert_eq!(server.protocols().unwrap(), ["graphql-ws"]);
    assert!(server.wait_for_ended(1).await, "client kept the socket open");
}

#[tokio::test]
async fn ws_probe_uses_configured_timeout() {
    use endpoint_resolver::HandshakeProbe;

    let server = MockGraphQlServer::start(Behavior::Silent).await.unwrap();
    let started = Instant::now();
    assert!(!WsProbe::new(SHORT_TIMEOUT).probe(&server.url("/")).await);
    assert!(started.elapsed() < Duration::from_secs(2));
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn find_first_valid_stops_at_first_ack() {
    let a = MockGraphQlServer::start(Behavior::Silent).await.unwrap();
    let b = MockGraphQlServer::start(Behavior::Ack).await.unwrap();
    let c = MockGraphQlServer::start(Behavior::Ack).await.unwrap();

    let candidates = vec![a.url("/graphql"), b.url("/graphql"), c.url("/graphql")];
    let found = find_first_valid(&candidates, SHORT_TIMEOUT).await;

    assert_eq!(found, Some(b.url("/graphql")));
    assert_eq!(a.connections(), 1);
    assert_eq!(b.connections(), 1);
    assert_eq!(c.connections(), 0);
}

#[tokio::test]
async fn find_first_valid_exhausts_candidates() {
    let a = MockGraphQlServer::start(Behavior::Reject).await.unwrap();
    let b = MockGraphQlServer::start(Behavior::Close).await.unwrap();

    let candidates = vec![a.url("/"), b.url("/")];
    assert_eq!(find_first_valid(&candidates, SHORT_TIMEOUT).await, None);
    assert_eq!(a.connections(), 1);
    assert_eq!(b.connections(), 1);
}

#[tokio::test]
async fn store_discovers_local_development_subscription_endpoint() {
    let server = MockGraphQlServer::start(Behavior::AckPath("/subscriptions/v1/cj8local"))
        .await
        .unwrap();
    let endpoint = format!("http://127.0.0.1:{}/simple/v1/cj8local", server.port);

    let context = StoreContext::new(
        Arc::new(StaticPage::new("http://localhost:3000/")),
        Arc::new(MemoryStorage::new()),
    )
    .with_prober(Arc::new(WsProbe::new(Duration::from_secs(2))));
    let mut store = EndpointStateStore::new(
        StoreOptions {
            endpoint: Some(endpoint.clone()),
            subscription_endpoint: Some("tcp://legacy.example.com".into()),
            ..Default::default()
        },
        context,
    )
    .unwrap();
    let mut events = store.take_events().unwrap();

    let state = store.wait_for_discovery().await;
    let expected = server.url("/subscriptions/v1/cj8local");
    assert_eq!(state.endpoint, endpoint);
    assert_eq!(state.subscription_endpoint.as_deref(), Some(expected.as_str()));
    // The scheme-swapped endpoint was tried and rejected first.
    assert_eq!(server.connections(), 2);
    assert_eq!(
        events.next().await,
        Some(StoreEvent::SubscriptionEndpointChanged(Some(expected)))
    );
}
