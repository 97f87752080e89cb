//! Transport Manager: peer connection lifecycle, the primary `input` data
//! channel (opened by the server/offerer), and the on-demand auxiliary
//! `aux` data channel (opened by us, the uploader).

use log::{debug, info, warn};
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock as AsyncRwLock};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::ice_transport::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};

use super::receivers::MediaReceivers;
use super::TransportError;
use crate::codec;

/// A payload handed to `send_data_channel_message`.
#[derive(Debug, Clone)]
pub enum DataChannelPayload {
    Text(String),
    Binary(Vec<u8>),
}

/// Events the transport manager raises for the orchestrator to route.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    DataChannelOpen(String),
    DataChannelClose(String),
    ConnectionStateChange(String),
    PlayStreamRequired,
    ClipboardContent(String),
    CursorChange(Vec<u8>),
    SystemAction(String),
    GpuStats(Value),
    SystemStats(Value),
    LatencyMeasurement(u32),
    ServerSettings(String),
    IceCandidateGenerated {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    },
    Status(String),
    Error(String),
    Debug(String),
}

pub struct TransportManagerConfig {
    pub buffered_amount_high: u64,
    pub buffered_amount_low: u64,
    pub backpressure_yield_ms: u64,
    pub jitter_buffer_tick_ms: u64,
}

/// Owns the peer connection and its channels. Singleton per session; only
/// this type mutates the peer connection or its data channels.
pub struct TransportManager {
    config: TransportManagerConfig,
    api: API,
    ice_servers: SyncMutex<Vec<RTCIceServer>>,
    force_relay: AtomicBool,
    peer_connection: AsyncRwLock<Option<Arc<RTCPeerConnection>>>,
    primary_channel: AsyncRwLock<Option<Arc<RTCDataChannel>>>,
    aux_channel: AsyncRwLock<Option<Arc<RTCDataChannel>>>,
    receivers: Arc<MediaReceivers>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
    aux_generation: Arc<AtomicU64>,
}

impl TransportManager {
    pub fn new(config: TransportManagerConfig) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let mut media_engine = MediaEngine::default();
        register_codecs(&mut media_engine)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::SetupFailed(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(SettingEngine::default())
            .build();

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let manager = Arc::new(Self {
            config,
            api,
            ice_servers: SyncMutex::new(Vec::new()),
            force_relay: AtomicBool::new(false),
            peer_connection: AsyncRwLock::new(None),
            primary_channel: AsyncRwLock::new(None),
            aux_channel: AsyncRwLock::new(None),
            receivers: Arc::new(MediaReceivers::new()),
            events_tx,
            connected: Arc::new(AtomicBool::new(false)),
            aux_generation: Arc::new(AtomicU64::new(0)),
        });

        Ok((manager, events_rx))
    }

    /// Must be called before `connect()`.
    pub fn configure(&self, ice_servers: Vec<RTCIceServer>, force_relay: bool) {
        *self.ice_servers.lock() = ice_servers;
        self.force_relay.store(force_relay, Ordering::SeqCst);
    }

    /// Create the peer connection and register its callbacks. Negotiation
    /// itself proceeds as the server's offer and our ICE candidates arrive.
    pub async fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        let ice_servers = self.ice_servers.lock().clone();
        let ice_transport_policy = if self.force_relay.load(Ordering::SeqCst) {
            RTCIceTransportPolicy::Relay
        } else {
            RTCIceTransportPolicy::All
        };

        let rtc_config = RTCConfiguration {
            ice_servers,
            ice_transport_policy,
            ..Default::default()
        };

        let peer_connection = self
            .api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let peer_connection = Arc::new(peer_connection);

        self.register_callbacks(&peer_connection);
        *self.peer_connection.write().await = Some(peer_connection);

        Ok(())
    }

    fn register_callbacks(self: &Arc<Self>, pc: &Arc<RTCPeerConnection>) {
        let events = self.events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let events = events.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    if let Ok(json) = candidate.to_json() {
                        let _ = events.send(TransportEvent::IceCandidateGenerated {
                            candidate: json.candidate,
                            sdp_mid: json.sdp_mid,
                            sdp_mline_index: json.sdp_mline_index,
                        });
                    }
                }
            })
        }));

        let events = self.events_tx.clone();
        let connected = self.connected.clone();
        let manager = self.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events.clone();
            let connected = connected.clone();
            let manager = manager.clone();
            Box::pin(async move {
                let _ = events.send(TransportEvent::ConnectionStateChange(format!("{:?}", state)));
                match state {
                    RTCPeerConnectionState::Connected => {
                        connected.store(true, Ordering::SeqCst);
                        manager.spawn_jitter_buffer_loop();
                    }
                    RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Closed => {
                        connected.store(false, Ordering::SeqCst);
                    }
                    _ => {}
                }
            })
        }));

        let events = self.events_tx.clone();
        let manager = self.clone();
        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let events = events.clone();
            let manager = manager.clone();
            Box::pin(async move {
                let label = channel.label().to_string();
                if label == "input" {
                    manager.adopt_primary_channel(channel).await;
                } else {
                    debug!("ignoring unexpected server-opened channel '{}'", label);
                }
                let _ = events.send(TransportEvent::DataChannelOpen(label));
            })
        }));

        let receivers = self.receivers.clone();
        let events = self.events_tx.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let receivers = receivers.clone();
            let events = events.clone();
            Box::pin(async move {
                let _ = events.send(TransportEvent::Debug(format!(
                    "receiving {:?} track, codec {}",
                    track.kind(),
                    track.codec().capability.mime_type
                )));
                receivers.set_track(track);
            })
        }));
    }

    async fn adopt_primary_channel(self: &Arc<Self>, channel: Arc<RTCDataChannel>) {
        let events = self.events_tx.clone();
        let label = channel.label().to_string();
        let events_for_close = events.clone();
        let label_for_close = label.clone();
        channel.on_close(Box::new(move || {
            let events = events_for_close.clone();
            let label = label_for_close.clone();
            Box::pin(async move {
                let _ = events.send(TransportEvent::DataChannelClose(label));
            })
        }));

        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let events = events.clone();
            Box::pin(async move { dispatch_primary_message(&events, msg) })
        }));

        *self.primary_channel.write().await = Some(channel);
    }

    fn spawn_jitter_buffer_loop(self: &Arc<Self>) {
        let receivers = self.receivers.clone();
        let connected = self.connected.clone();
        let tick = Duration::from_millis(self.config.jitter_buffer_tick_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                ticker.tick().await;
                if !connected.load(Ordering::SeqCst) || !receivers.is_live() {
                    break;
                }
                receivers.reset_jitter_buffer_targets().await;
            }
        });
    }

    /// Handle the server's SDP offer; returns the SDP answer to send back.
    pub async fn handle_remote_offer(&self, sdp: String) -> Result<String, TransportError> {
        let guard = self.peer_connection.read().await;
        let pc = guard.as_ref().ok_or(TransportError::NotConnected)?;

        let offer = RTCSessionDescription::offer(sdp).map_err(|e| TransportError::SdpError(e.to_string()))?;
        pc.set_remote_description(offer)
            .await
            .map_err(|e| TransportError::SdpError(e.to_string()))?;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::SdpError(e.to_string()))?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(|e| TransportError::SdpError(e.to_string()))?;

        Ok(answer.sdp)
    }

    pub async fn add_ice_candidate(
        &self,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Result<(), TransportError> {
        let guard = self.peer_connection.read().await;
        let pc = guard.as_ref().ok_or(TransportError::NotConnected)?;

        pc.add_ice_candidate(RTCIceCandidateInit {
            candidate,
            sdp_mid,
            sdp_mline_index,
            username_fragment: None,
        })
        .await
        .map_err(|e| TransportError::IceError(e.to_string()))
    }

    /// Tear down the peer connection and both channels; leaves media
    /// elements detached. Idempotent.
    pub async fn reset(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.aux_generation.fetch_add(1, Ordering::SeqCst);
        self.receivers.clear();

        if let Some(channel) = self.primary_channel.write().await.take() {
            let _ = channel.close().await;
        }
        if let Some(channel) = self.aux_channel.write().await.take() {
            let _ = channel.close().await;
        }
        if let Some(pc) = self.peer_connection.write().await.take() {
            let _ = pc.close().await;
        }
    }

    /// Primary channel send. Drops with a logged warning instead of
    /// returning an error when the channel is not open.
    pub async fn send_data_channel_message(&self, payload: DataChannelPayload) {
        let guard = self.primary_channel.read().await;
        let Some(channel) = guard.as_ref() else {
            warn!("dropped primary channel message: channel not open");
            return;
        };
        if channel.ready_state() != RTCDataChannelState::Open {
            warn!("dropped primary channel message: channel not open");
            return;
        }
        let result = match payload {
            DataChannelPayload::Text(text) => channel.send_text(text).await,
            DataChannelPayload::Binary(bytes) => channel.send(&bytes.into()).await,
        };
        if let Err(e) = result {
            warn!("primary channel send failed: {}", e);
        }
    }

    /// Allocate the auxiliary channel. Returns `false` without disturbing
    /// any existing aux channel if one is already present.
    pub async fn create_aux_data_channel(self: &Arc<Self>) -> bool {
        {
            let guard = self.aux_channel.read().await;
            if guard.is_some() {
                return false;
            }
        }

        let pc = {
            let guard = self.peer_connection.read().await;
            match guard.as_ref() {
                Some(pc) => pc.clone(),
                None => return false,
            }
        };

        let channel = match pc.create_data_channel("aux", None).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!("failed to create aux data channel: {}", e);
                return false;
            }
        };

        let events = self.events_tx.clone();
        let label = channel.label().to_string();
        let label_for_close = label.clone();
        let events_for_close = events.clone();
        channel.on_close(Box::new(move || {
            let events = events_for_close.clone();
            let label = label_for_close.clone();
            Box::pin(async move {
                let _ = events.send(TransportEvent::DataChannelClose(label));
            })
        }));
        channel.on_open(Box::new(move || {
            let events = events.clone();
            let label = label.clone();
            Box::pin(async move {
                let _ = events.send(TransportEvent::DataChannelOpen(label));
            })
        }));

        *self.aux_channel.write().await = Some(channel);
        true
    }

    /// Resolves once the aux channel reaches the Open state.
    pub async fn wait_for_aux_channel_open(&self) {
        loop {
            let open = {
                let guard = self.aux_channel.read().await;
                guard
                    .as_ref()
                    .map(|c| c.ready_state() == RTCDataChannelState::Open)
                    .unwrap_or(false)
            };
            if open {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn send_aux_channel_data(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        let guard = self.aux_channel.read().await;
        let channel = guard.as_ref().ok_or(TransportError::AuxChannelNotOpen)?;
        channel
            .send(&bytes.into())
            .await
            .map(|_| ())
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    pub async fn close_aux_channel(&self) {
        if let Some(channel) = self.aux_channel.write().await.take() {
            let _ = channel.close().await;
        }
    }

    pub async fn is_aux_buffer_near_threshold(&self) -> bool {
        let guard = self.aux_channel.read().await;
        match guard.as_ref() {
            Some(channel) => channel.buffered_amount().await as u64 >= self.config.buffered_amount_high,
            None => false,
        }
    }

    /// Completes when `bufferedAmount <= low`. Polls at the configured
    /// back-pressure yield interval (senders yield for at least 50ms).
    pub async fn await_for_aux_buffer_to_drain(&self) {
        let yield_duration = Duration::from_millis(self.config.backpressure_yield_ms.max(50));
        loop {
            let buffered = {
                let guard = self.aux_channel.read().await;
                match guard.as_ref() {
                    Some(channel) => channel.buffered_amount().await as u64,
                    None => return,
                }
            };
            if buffered <= self.config.buffered_amount_low {
                return;
            }
            tokio::time::sleep(yield_duration).await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn peer_connection_handle(&self) -> Option<Arc<RTCPeerConnection>> {
        self.peer_connection.read().await.clone()
    }

    /// Fetch the current `RTCStatsReport` for the Stats Aggregator. Returns
    /// `None` before the peer connection is established.
    pub async fn get_stats(&self) -> Option<webrtc::stats::StatsReport> {
        let guard = self.peer_connection.read().await;
        match guard.as_ref() {
            Some(pc) => Some(pc.get_stats().await),
            None => None,
        }
    }
}

fn dispatch_primary_message(events: &mpsc::UnboundedSender<TransportEvent>, msg: DataChannelMessage) {
    if !msg.is_string {
        let _ = events.send(TransportEvent::CursorChange(msg.data.to_vec()));
        return;
    }

    let text = match std::str::from_utf8(&msg.data) {
        Ok(text) => text,
        Err(e) => {
            let _ = events.send(TransportEvent::Debug(format!("non-utf8 primary channel message: {}", e)));
            return;
        }
    };

    if let Some(rest) = text.strip_prefix("cw,") {
        let _ = events.send(TransportEvent::ClipboardContent(rest.to_string()));
        return;
    }

    match codec::decode_server_text(text) {
        Ok(codec::ServerOp::SystemAction { action }) => {
            let _ = events.send(TransportEvent::SystemAction(action));
        }
        Ok(codec::ServerOp::ServerSettings { json }) => {
            let _ = events.send(TransportEvent::ServerSettings(json));
        }
        Ok(codec::ServerOp::Latency { ms }) => {
            let _ = events.send(TransportEvent::LatencyMeasurement(ms));
        }
        Ok(codec::ServerOp::Cursor { bytes }) => {
            let _ = events.send(TransportEvent::CursorChange(bytes));
        }
        Err(e) => {
            let _ = events.send(TransportEvent::Debug(format!("dropped: {}", e)));
        }
    }
}

fn register_codecs(media_engine: &mut MediaEngine) -> Result<(), TransportError> {
    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_H264.to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                        .to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 96,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .map_err(|e| TransportError::SetupFailed(e.to_string()))?;

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                payload_type: 97,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .map_err(|e| TransportError::SetupFailed(e.to_string()))?;

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .map_err(|e| TransportError::SetupFailed(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cw_frame_is_routed_to_clipboard_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch_primary_message(
            &tx,
            DataChannelMessage {
                is_string: true,
                data: bytes::Bytes::from_static(b"cw,aGVsbG8="),
            },
        );
        match rx.try_recv().unwrap() {
            TransportEvent::ClipboardContent(text) => assert_eq!(text, "aGVsbG8="),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn binary_frame_is_routed_to_cursor_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch_primary_message(
            &tx,
            DataChannelMessage {
                is_string: false,
                data: bytes::Bytes::from_static(&[1, 2, 3]),
            },
        );
        match rx.try_recv().unwrap() {
            TransportEvent::CursorChange(bytes) => assert_eq!(bytes, vec![1, 2, 3]),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
