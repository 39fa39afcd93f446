//! Subscription endpoint discovery: candidate generation and handshake
//! probing.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use url::Url;

use crate::normalize::{MANAGED_DOMAIN, MANAGED_SUBSCRIPTIONS_BASE, is_realtime_url, project_id, swap_http_scheme};
use crate::protocol::{OperationMessage, SUBSCRIPTION_PROTOCOL, decode_msg, encode_msg, message_type};
use crate::types::{Error, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Path marker of local development servers of the managed service.
const LOCAL_DEV_PATH: &str = "/simple/v1/";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// Realtime URLs worth probing for `endpoint`, most likely first:
/// the endpoint with its scheme swapped, the managed-service subscription
/// URL, then the local-development subscription path on the same host.
pub fn generate_candidates(endpoint: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut push = |candidate: String| {
        if is_realtime_url(&candidate) && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    };

    push(swap_http_scheme(endpoint));

    let parsed = Url::parse(endpoint).ok();
    let host = parsed.as_ref().and_then(Url::host_str).unwrap_or_default();

    if host == MANAGED_DOMAIN || host.ends_with(&format!(".{MANAGED_DOMAIN}")) {
        push(format!("{MANAGED_SUBSCRIPTIONS_BASE}/{}", project_id(endpoint)));
    }

    if let Some(url) = parsed.as_ref().filter(|u| u.path().contains(LOCAL_DEV_PATH)) {
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        push(format!(
            "ws://{authority}/subscriptions/v1/{}",
            project_id(endpoint)
        ));
    }

    candidates
}

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

/// Checks whether a realtime URL completes the `graphql-ws` handshake.
#[async_trait]
pub trait HandshakeProbe: Send + Sync {
    async fn probe(&self, url: &str) -> bool;
}

/// [`HandshakeProbe`] over a real WebSocket connection.
#[derive(Debug, Clone, Copy)]
pub struct WsProbe {
    timeout: Duration,
}

impl WsProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for WsProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl HandshakeProbe for WsProbe {
    async fn probe(&self, url: &str) -> bool {
        probe(url, self.timeout).await
    }
}

/// Open `url` with the `graphql-ws` sub-protocol, send `connection_init` and
/// wait for `connection_ack`.
///
/// Resolves exactly once: `true` on acknowledgement, `false` on transport
/// error, rejection or when `timeout` elapses first. The connection is closed
/// after an answer and dropped together with the handshake future on timeout.
pub async fn probe(url: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, handshake(url)).await {
        Ok(Ok(())) => {
            tracing::debug!(url, "Subscription endpoint acknowledged");
            true
        }
        Ok(Err(e)) => {
            tracing::debug!(url, "Subscription probe failed: {e}");
            false
        }
        Err(_) => {
            tracing::debug!(url, ?timeout, "Subscription probe timed out");
            false
        }
    }
}

async fn handshake(url: &str) -> Result<()> {
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(SUBSCRIPTION_PROTOCOL),
    );
    // Fails when the 101 response does not echo the requested sub-protocol.
    let (mut ws, _resp) = tokio_tungstenite::connect_async(request).await?;

    let init = encode_msg(&OperationMessage::new(message_type::CONNECTION_INIT))?;
    let result = match ws.send(tungstenite::Message::Text(init.into())).await {
        Ok(()) => wait_for_ack(&mut ws).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = ws.close(None).await {
        tracing::trace!(url, "Close after probe: {e}");
    }
    result
}

async fn wait_for_ack(ws: &mut WsStream) -> Result<()> {
    while let Some(frame) = ws.next().await {
        match frame? {
            tungstenite::Message::Text(text) => match decode_msg(text.as_str()) {
                Ok(msg) if msg.is(message_type::CONNECTION_ACK) => return Ok(()),
                Ok(msg) if msg.is(message_type::CONNECTION_ERROR) => {
                    return Err(Error::Handshake(format!(
                        "connection_error: {}",
                        msg.payload.unwrap_or_default()
                    )));
                }
                Ok(msg) => {
                    tracing::trace!(kind = %msg.kind, "Ignoring pre-ack message");
                }
                Err(e) => {
                    tracing::debug!("Ignoring undecodable frame: {e}");
                }
            },
            tungstenite::Message::Close(frame) => {
                return Err(Error::Handshake(format!(
                    "closed before connection_ack: {frame:?}"
                )));
            }
            _ => {
                // Ignore binary, ping, pong frames
            }
        }
    }
    Err(Error::Handshake(
        "connection ended before connection_ack".to_string(),
    ))
}

/// Probe `candidates` one after another with a [`WsProbe`] and return the
/// first that acknowledges.
pub async fn find_first_valid(candidates: &[String], timeout: Duration) -> Option<String> {
    find_first_valid_with(&WsProbe::new(timeout), candidates).await
}

/// Probe `candidates` strictly in order, never two at once; the first
/// acknowledged candidate wins.
pub async fn find_first_valid_with<P>(prober: &P, candidates: &[String]) -> Option<String>
where
    P: HandshakeProbe + ?Sized,
{
    for candidate in candidates {
        if prober.probe(candidate).await {
            tracing::info!(url = %candidate, "Discovered subscription endpoint");
            return Some(candidate.clone());
        }
    }
    tracing::info!(
        attempted = candidates.len(),
        "No subscription endpoint candidate acknowledged"
    );
    None
}
