//! Signaling Client.
//!
//! Persistent bidirectional websocket to the server; exchanges session
//! description offers/answers and ICE candidates; emits connect/disconnect/
//! reconnect events. The client is always the answerer: it awaits the
//! server's offer, returns an answer, then streams ICE candidates as they
//! are discovered.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug)]
pub enum SignalingError {
    ConnectFailed(String),
    SendFailed(String),
    Protocol(String),
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingError::ConnectFailed(msg) => write!(f, "signaling connect failed: {}", msg),
            SignalingError::SendFailed(msg) => write!(f, "signaling send failed: {}", msg),
            SignalingError::Protocol(msg) => write!(f, "signaling protocol error: {}", msg),
        }
    }
}

impl std::error::Error for SignalingError {}

/// Session-description / ICE exchange messages plus a current-resolution
/// advisory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    #[serde(rename = "ice")]
    IceCandidate {
        candidate: String,
        #[serde(rename = "sdpMid", default)]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex", default)]
        sdp_mline_index: Option<u16>,
    },
    IceComplete,
    Resolution {
        width: u32,
        height: u32,
    },
}

/// Events the signaling client raises for the orchestrator/transport.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    Status(String),
    Error(String),
    Disconnected { reconnect: bool },
    Debug(String),
    Message(SignalingMessage),
}

/// Persistent signaling connection with automatic exponential-backoff
/// reconnect.
pub struct SignalingClient {
    url: String,
    reconnect_base: Duration,
    reconnect_max: Duration,
    events_tx: mpsc::UnboundedSender<SignalingEvent>,
    outbound_tx: mpsc::UnboundedSender<WsMessage>,
    outbound_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<WsMessage>>>,
    explicit_disconnect: Arc<AtomicBool>,
}

impl SignalingClient {
    pub fn new(
        url: String,
        reconnect_base_ms: u64,
        reconnect_max_ms: u64,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SignalingEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            url,
            reconnect_base: Duration::from_millis(reconnect_base_ms),
            reconnect_max: Duration::from_millis(reconnect_max_ms),
            events_tx,
            outbound_tx,
            outbound_rx: AsyncMutex::new(Some(outbound_rx)),
            explicit_disconnect: Arc::new(AtomicBool::new(false)),
        });
        (client, events_rx)
    }

    /// Begin the reconnect-with-backoff connection loop as a background
    /// task. Idempotent only in the sense that a second call while the
    /// first loop still owns the outbound receiver is a no-op.
    pub fn connect(self: &Arc<Self>) {
        self.explicit_disconnect.store(false, Ordering::SeqCst);
        let client = self.clone();
        tokio::spawn(async move {
            client.run().await;
        });
    }

    /// Send a signaling message. Queues onto the outbound channel; actual
    /// delivery happens on the connection task.
    pub fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        let json = serde_json::to_string(&message)
            .map_err(|e| SignalingError::Protocol(e.to_string()))?;
        self.outbound_tx
            .send(WsMessage::Text(json))
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    /// Explicit, application-initiated disconnect: no reconnection follows.
    pub fn disconnect(&self) {
        self.explicit_disconnect.store(true, Ordering::SeqCst);
        let _ = self.events_tx.send(SignalingEvent::Disconnected { reconnect: false });
    }

    async fn run(self: Arc<Self>) {
        let mut outbound_rx = match self.outbound_rx.lock().await.take() {
            Some(rx) => rx,
            None => return,
        };

        let mut backoff = self.reconnect_base;
        loop {
            if self.explicit_disconnect.load(Ordering::SeqCst) {
                break;
            }

            let _ = self.events_tx.send(SignalingEvent::Status("connecting".to_string()));
            match self.connect_and_handle(&mut outbound_rx).await {
                Ok(()) => {
                    // Clean close, e.g. explicit disconnect mid-flight.
                    break;
                }
                Err(e) => {
                    let _ = self.events_tx.send(SignalingEvent::Error(e.to_string()));
                    if self.explicit_disconnect.load(Ordering::SeqCst) {
                        break;
                    }
                    let _ = self
                        .events_tx
                        .send(SignalingEvent::Disconnected { reconnect: true });
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.reconnect_max);
                }
            }
        }
    }

    async fn connect_and_handle(
        &self,
        outbound_rx: &mut mpsc::UnboundedReceiver<WsMessage>,
    ) -> Result<(), SignalingError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| SignalingError::ConnectFailed(e.to_string()))?;

        let _ = self.events_tx.send(SignalingEvent::Status("connected".to_string()));
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        loop {
            tokio::select! {
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<SignalingMessage>(&text) {
                                Ok(message) => {
                                    let _ = self.events_tx.send(SignalingEvent::Message(message));
                                }
                                Err(e) => {
                                    let _ = self.events_tx.send(SignalingEvent::Debug(
                                        format!("dropped malformed signaling frame: {}", e)
                                    ));
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(SignalingError::ConnectFailed(e.to_string())),
                    }
                }
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(message) => {
                            ws_tx.send(message).await
                                .map_err(|e| SignalingError::SendFailed(e.to_string()))?;
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_roundtrips_through_json() {
        let msg = SignalingMessage::Offer { sdp: "v=0".to_string() };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: SignalingMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            SignalingMessage::Offer { sdp } => assert_eq!(sdp, "v=0"),
            _ => panic!("expected offer"),
        }
    }

    #[test]
    fn ice_candidate_roundtrips_field_names() {
        let msg = SignalingMessage::IceCandidate {
            candidate: "candidate:1 1 UDP".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("sdpMid"));
        assert!(json.contains("sdpMLineIndex"));
    }
}
