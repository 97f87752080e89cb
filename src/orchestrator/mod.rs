//! Session Orchestrator.
//!
//! Wires the Signaling Client, Transport Manager, Wire Protocol Codec,
//! Settings Reconciler, Rendering Geometry Controller, File Upload
//! Pipeline, and Stats Aggregator together; owns the public lifecycle
//! operations `initialize()`/`cleanup()`; bridges dashboard `postMessage`
//! events to internal commands, one task per external event source,
//! plumbed through typed channels with a 1:1 command-dispatch mapping.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use log::{debug, info, warn};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::ClientOp;
use crate::config::ClientConfig;
use crate::geometry::{scale_to_fit, GeometryEvent, ImageRendering, RenderingGeometryController, SurfaceSink};
use crate::persist::PersistentStore;
use crate::settings::descriptor::value_to_persisted;
use crate::settings::reconcile::ManualResolutionDecision;
use crate::settings::SettingsReconciler;
use crate::signaling::{SignalingClient, SignalingEvent, SignalingMessage};
use crate::stats::{StatsAggregator, StatsAggregatorConfig};
use crate::transport::{self, DataChannelPayload, TransportEvent, TransportManager, TransportManagerConfig};
use crate::upload::{walk_entries, UploadEvent, UploadPipeline, UploadPipelineConfig};

#[derive(Debug)]
pub enum OrchestratorError {
    Transport(String),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Transport(msg) => write!(f, "failed to start transport: {}", msg),
        }
    }
}

impl std::error::Error for OrchestratorError {}

/// Viewport size and device-pixel-ratio, supplied by the embedder in place
/// of a global `window` object.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_pixel_ratio: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device_pixel_ratio: 1.0,
        }
    }
}

/// Local clipboard access, gated by secure-context policy at the embedder
/// level. `NoClipboardSource` is the default: clipboard bridging stays
/// disabled until an embedder supplies a real source.
pub trait ClipboardSource: Send + Sync {
    fn read(&self) -> Option<String>;
}

pub struct NoClipboardSource;

impl ClipboardSource for NoClipboardSource {
    fn read(&self) -> Option<String> {
        None
    }
}

/// Logs CSS application instead of touching a DOM element; rendering
/// widgets are out of scope for this crate.
pub struct LoggingSurfaceSink;

impl SurfaceSink for LoggingSurfaceSink {
    fn apply_css(
        &self,
        width: u32,
        height: u32,
        rendering: ImageRendering,
        letterbox: Option<(u32, u32)>,
    ) {
        debug!(
            "surface css: {}x{} rendering={:?} letterbox={:?}",
            width, height, rendering, letterbox
        );
    }
}

/// Inbound dashboard `postMessage` commands. Unrecognised
/// `type` tags are warned and dropped by `DashboardMessage::from_json`
/// rather than reaching `dispatch`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum DashboardMessage {
    #[serde(rename = "mode")]
    Mode { mode: String },
    #[serde(rename = "setScaleLocally")]
    SetScaleLocally { value: bool },
    #[serde(rename = "resetResolutionToWindow")]
    ResetResolutionToWindow,
    #[serde(rename = "setManualResolution")]
    SetManualResolution { width: u32, height: u32 },
    #[serde(rename = "setUseCssScaling")]
    SetUseCssScaling { value: bool },
    #[serde(rename = "clipboardUpdateFromUI")]
    ClipboardUpdateFromUi { text: String },
    #[serde(rename = "settings")]
    Settings { settings: serde_json::Value },
    #[serde(rename = "command")]
    Command { command: String },
    #[serde(rename = "requestFileUpload")]
    RequestFileUpload,
}

impl DashboardMessage {
    /// Parse a dashboard `postMessage` payload. Malformed JSON and unknown
    /// `type` tags are warned and dropped, not surfaced as an error.
    pub fn from_json(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("dropped unrecognised dashboard message: {}", e);
                None
            }
        }
    }
}

/// Outbound notifications the core posts to the dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum DashboardNotification {
    #[serde(rename = "clipboardContentUpdate")]
    ClipboardContentUpdate { text: String },
    #[serde(rename = "fileUpload")]
    FileUpload {
        status: String,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_size: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "serverSettings")]
    ServerSettings { payload: String },
}

/// Shared handles cloned into each event-bridging task. Cheap to clone:
/// every field is an `Arc`, a channel sender, or a `parking_lot::Mutex`
/// behind an `Arc`.
#[derive(Clone)]
struct BridgeContext {
    signaling: Arc<SignalingClient>,
    transport: Arc<TransportManager>,
    geometry: Arc<RenderingGeometryController>,
    settings: Arc<SettingsReconciler>,
    stats: Arc<StatsAggregator>,
    surface: Arc<dyn SurfaceSink>,
    notifications: mpsc::UnboundedSender<DashboardNotification>,
    viewport: Arc<SyncMutex<Viewport>>,
    scale_locally: Arc<AtomicBool>,
    primary_open: Arc<AtomicBool>,
}

/// Wires components A-G together and owns the public session lifecycle.
/// Not `Clone`: exactly one orchestrator exists per session.
pub struct SessionOrchestrator {
    config: ClientConfig,
    store: Arc<dyn PersistentStore>,
    settings: Arc<SettingsReconciler>,
    geometry: Arc<RenderingGeometryController>,
    surface: Arc<dyn SurfaceSink>,
    clipboard: Arc<dyn ClipboardSource>,
    signaling: Option<Arc<SignalingClient>>,
    transport: Option<Arc<TransportManager>>,
    upload: Option<Arc<UploadPipeline>>,
    stats: Option<Arc<StatsAggregator>>,
    notifications_tx: mpsc::UnboundedSender<DashboardNotification>,
    notifications_rx: Option<mpsc::UnboundedReceiver<DashboardNotification>>,
    tasks: Vec<JoinHandle<()>>,
    pending_uploads: Vec<PathBuf>,
    viewport: Arc<SyncMutex<Viewport>>,
    scale_locally: Arc<AtomicBool>,
    primary_open: Arc<AtomicBool>,
    initialized: AtomicBool,
}

impl SessionOrchestrator {
    pub fn new(config: ClientConfig, store: Arc<dyn PersistentStore>) -> Result<Self, OrchestratorError> {
        let settings = Arc::new(SettingsReconciler::new(store.clone()));
        let (geometry, _geometry_rx) =
            RenderingGeometryController::new(Duration::from_millis(config.geometry.resize_debounce_ms));
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            store,
            settings,
            geometry: Arc::new(geometry),
            surface: Arc::new(LoggingSurfaceSink),
            clipboard: Arc::new(NoClipboardSource),
            signaling: None,
            transport: None,
            upload: None,
            stats: None,
            notifications_tx,
            notifications_rx: Some(notifications_rx),
            tasks: Vec::new(),
            pending_uploads: Vec::new(),
            viewport: Arc::new(SyncMutex::new(Viewport::default())),
            scale_locally: Arc::new(AtomicBool::new(false)),
            primary_open: Arc::new(AtomicBool::new(false)),
            initialized: AtomicBool::new(false),
        })
    }

    /// Supply a non-default surface sink (e.g. a real embedder binding),
    /// before `initialize()`.
    pub fn set_surface_sink(&mut self, surface: Arc<dyn SurfaceSink>) {
        self.surface = surface;
    }

    /// Supply a real clipboard source, before `initialize()`.
    pub fn set_clipboard_source(&mut self, clipboard: Arc<dyn ClipboardSource>) {
        self.clipboard = clipboard;
    }

    /// Take the dashboard notification receiver. Returns `None` if already
    /// taken.
    pub fn take_notifications(&mut self) -> Option<mpsc::UnboundedReceiver<DashboardNotification>> {
        self.notifications_rx.take()
    }

    /// Begin negotiation: fetches TURN configuration, stands up the
    /// transport and signaling client, and spawns the event-bridging
    /// tasks. Resolves once the primary data channel is open or a 30s
    /// timeout elapses. Idempotent: a second call is a no-op.
    pub async fn initialize(&mut self) -> Result<(), OrchestratorError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let ice_entries = match &self.config.signaling.turn_config_url {
            Some(url) => transport::fetch_turn_config(url)
                .await
                .map_err(|e| OrchestratorError::Transport(e.to_string()))?,
            None => Vec::new(),
        };
        let ice_servers = transport::to_rtc_ice_servers(&ice_entries);

        let (transport_manager, transport_rx) = TransportManager::new(TransportManagerConfig {
            buffered_amount_high: self.config.transport.buffered_amount_high,
            buffered_amount_low: self.config.transport.buffered_amount_low,
            backpressure_yield_ms: self.config.transport.backpressure_yield_ms,
            jitter_buffer_tick_ms: self.config.transport.jitter_buffer_tick_ms,
        })
        .map_err(|e| OrchestratorError::Transport(e.to_string()))?;
        transport_manager.configure(ice_servers, self.config.transport.force_relay);
        transport_manager
            .connect()
            .await
            .map_err(|e| OrchestratorError::Transport(e.to_string()))?;

        let (signaling, signaling_rx) = SignalingClient::new(
            self.config.signaling.base_url.clone(),
            self.config.signaling.reconnect_base_ms,
            self.config.signaling.reconnect_max_ms,
        );

        let (upload, upload_rx) = UploadPipeline::new(
            transport_manager.clone(),
            UploadPipelineConfig {
                chunk_size: self.config.upload.chunk_size,
            },
        );
        let upload = Arc::new(upload);

        let (stats, stats_rx) = StatsAggregator::new(
            transport_manager.clone(),
            StatsAggregatorConfig {
                snapshot_interval: Duration::from_millis(self.config.stats.snapshot_interval_ms),
                client_push_interval: Duration::from_millis(self.config.stats.client_push_interval_ms),
            },
        );

        let (geometry, geometry_rx) = RenderingGeometryController::new(Duration::from_millis(
            self.config.geometry.resize_debounce_ms,
        ));
        self.geometry = Arc::new(geometry);

        let ctx = BridgeContext {
            signaling: signaling.clone(),
            transport: transport_manager.clone(),
            geometry: self.geometry.clone(),
            settings: self.settings.clone(),
            stats: stats.clone(),
            surface: self.surface.clone(),
            notifications: self.notifications_tx.clone(),
            viewport: self.viewport.clone(),
            scale_locally: self.scale_locally.clone(),
            primary_open: self.primary_open.clone(),
        };

        self.tasks.push({
            let ctx = ctx.clone();
            tokio::spawn(async move { run_signaling_bridge(ctx, signaling_rx).await })
        });
        self.tasks.push({
            let ctx = ctx.clone();
            tokio::spawn(async move { run_transport_bridge(ctx, transport_rx).await })
        });
        self.tasks.push({
            let ctx = ctx.clone();
            tokio::spawn(async move { run_geometry_bridge(ctx, geometry_rx).await })
        });
        self.tasks.push({
            let ctx = ctx.clone();
            tokio::spawn(async move { run_upload_bridge(ctx, upload_rx).await })
        });
        self.tasks.extend(stats.spawn());
        self.tasks.push(tokio::spawn(async move {
            run_stats_snapshot_drain(stats_rx).await
        }));

        signaling.connect();

        self.signaling = Some(signaling);
        self.transport = Some(transport_manager);
        self.upload = Some(upload.clone());
        self.stats = Some(stats);

        for root in self.pending_uploads.drain(..).collect::<Vec<_>>() {
            self.tasks.push(spawn_upload_batch(upload.clone(), vec![root]));
        }

        self.wait_for_primary_channel(Duration::from_secs(30)).await;
        Ok(())
    }

    async fn wait_for_primary_channel(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.primary_open.load(Ordering::SeqCst) {
            if tokio::time::Instant::now() >= deadline {
                warn!("timed out waiting for the primary data channel to open");
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Queue a file or directory root for upload. Before `initialize()`
    /// completes, the root is held and submitted once the upload pipeline
    /// exists.
    pub fn queue_upload(&mut self, root: PathBuf) {
        match &self.upload {
            Some(upload) => {
                self.tasks.push(spawn_upload_batch(upload.clone(), vec![root]));
            }
            None => self.pending_uploads.push(root),
        }
    }

    /// Parse and dispatch one dashboard `postMessage` payload.
    pub async fn handle_dashboard_json(&mut self, raw: &str) {
        if let Some(message) = DashboardMessage::from_json(raw) {
            self.dispatch(message).await;
        }
    }

    /// 1:1 dispatch of a dashboard command onto the settings, geometry,
    /// transport, and upload components.
    pub async fn dispatch(&mut self, message: DashboardMessage) {
        match message {
            DashboardMessage::Mode { mode } => {
                self.store.set("stream_mode", &mode);
                self.trigger_reload();
            }
            DashboardMessage::SetScaleLocally { value } => {
                self.scale_locally.store(value, Ordering::SeqCst);
            }
            DashboardMessage::ResetResolutionToWindow => {
                let viewport = *self.viewport.lock();
                self.settings.set_user_value("is_manual_resolution_mode", "false");
                self.geometry.reset_to_window_resolution(viewport.width, viewport.height);
            }
            DashboardMessage::SetManualResolution { width, height } => {
                self.settings.set_user_value("manual_width", &width.to_string());
                self.settings.set_user_value("manual_height", &height.to_string());
                self.settings.set_user_value("is_manual_resolution_mode", "true");
                self.geometry.apply_manual_style(width, height);
            }
            DashboardMessage::SetUseCssScaling { value } => {
                self.settings
                    .set_user_value("use_css_scaling", if value { "true" } else { "false" });
                self.geometry.set_use_css_scaling(value);
            }
            DashboardMessage::ClipboardUpdateFromUi { text } => {
                if let Some(transport) = self.transport.clone() {
                    let base64_text = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
                    tokio::spawn(async move {
                        transport
                            .send_data_channel_message(DataChannelPayload::Text(
                                ClientOp::ClipboardWrite { base64_text }.encode(),
                            ))
                            .await;
                    });
                }
            }
            DashboardMessage::Settings { settings } => {
                if let Some(map) = settings.as_object() {
                    for (key, value) in map {
                        self.settings.set_user_value(key, &value_to_persisted(value));
                    }
                }
            }
            DashboardMessage::Command { command } => {
                if let Some(transport) = self.transport.clone() {
                    tokio::spawn(async move {
                        transport
                            .send_data_channel_message(DataChannelPayload::Text(
                                ClientOp::Command { command }.encode(),
                            ))
                            .await;
                    });
                }
            }
            DashboardMessage::RequestFileUpload => {
                // Triggers the hidden file-input click in the browser shell;
                // out of scope here. The embedder picks files and calls
                // `queue_upload` directly.
                debug!("requestFileUpload: embedder is responsible for file selection");
            }
        }
    }

    fn trigger_reload(&self) {
        let Some(signaling) = self.signaling.clone() else {
            return;
        };
        let Some(transport) = self.transport.clone() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            signaling.disconnect();
            transport.reset().await;
            signaling.connect();
        });
    }

    /// Viewport changed (resize or DPR change). Re-arms the resize
    /// debounce timer.
    pub fn on_viewport_changed(&self, viewport: Viewport) {
        *self.viewport.lock() = viewport;
        self.geometry.on_window_resize(viewport.width, viewport.height);
    }

    /// Window gained focus: reset keyboard state and, if a clipboard
    /// source is configured, forward the current clipboard contents.
    pub fn on_focus(&self) {
        self.send_keyboard_reset();
        if let (Some(text), Some(transport)) = (self.clipboard.read(), self.transport.clone()) {
            let base64_text = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
            tokio::spawn(async move {
                transport
                    .send_data_channel_message(DataChannelPayload::Text(
                        ClientOp::ClipboardWrite { base64_text }.encode(),
                    ))
                    .await;
            });
        }
    }

    /// Window lost focus: reset keyboard state only.
    pub fn on_blur(&self) {
        self.send_keyboard_reset();
    }

    fn send_keyboard_reset(&self) {
        if let Some(transport) = self.transport.clone() {
            tokio::spawn(async move {
                transport
                    .send_data_channel_message(DataChannelPayload::Text(ClientOp::KeyboardReset.encode()))
                    .await;
            });
        }
    }

    /// Report a client-rendered frame rate sample to the Stats Aggregator.
    pub fn record_client_fps(&self, fps: u32) {
        if let Some(stats) = &self.stats {
            stats.record_client_fps(fps);
        }
    }

    /// Tear down every component, abort all spawned tasks, and zero
    /// mutable state. Idempotent.
    pub async fn cleanup(&mut self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }

        if let Some(signaling) = self.signaling.take() {
            signaling.disconnect();
        }
        if let Some(transport) = self.transport.take() {
            transport.reset().await;
        }
        self.upload = None;
        self.stats = None;
        self.pending_uploads.clear();
        self.primary_open.store(false, Ordering::SeqCst);
        info!("session orchestrator cleaned up");
    }
}

fn spawn_upload_batch(upload: Arc<UploadPipeline>, roots: Vec<PathBuf>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let entries = match tokio::task::spawn_blocking(move || walk_entries(&roots)).await {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                warn!("upload directory walk failed: {}", e);
                return;
            }
            Err(e) => {
                warn!("upload directory walk task panicked: {}", e);
                return;
            }
        };
        if let Err(e) = upload.run_batch(entries).await {
            warn!("upload batch did not complete: {}", e);
        }
    })
}

async fn run_stats_snapshot_drain(mut rx: mpsc::UnboundedReceiver<crate::stats::StatsEvent>) {
    // The stats aggregator already pushes snapshots to the server and to
    // dashboard-facing consumers that hold their own receiver; this task
    // just keeps the channel drained when nothing else is listening.
    while rx.recv().await.is_some() {}
}

async fn run_signaling_bridge(ctx: BridgeContext, mut rx: mpsc::UnboundedReceiver<SignalingEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SignalingEvent::Message(SignalingMessage::Offer { sdp }) => {
                match ctx.transport.handle_remote_offer(sdp).await {
                    Ok(answer_sdp) => {
                        if let Err(e) = ctx.signaling.send(SignalingMessage::Answer { sdp: answer_sdp }) {
                            warn!("failed to send sdp answer: {}", e);
                        }
                    }
                    Err(e) => warn!("failed to handle remote offer: {}", e),
                }
            }
            SignalingEvent::Message(SignalingMessage::IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            }) => {
                if let Err(e) = ctx
                    .transport
                    .add_ice_candidate(candidate, sdp_mid, sdp_mline_index)
                    .await
                {
                    debug!("dropped ice candidate: {}", e);
                }
            }
            SignalingEvent::Message(SignalingMessage::IceComplete) => {}
            SignalingEvent::Message(SignalingMessage::Resolution { .. }) => {}
            SignalingEvent::Disconnected { reconnect: true } => {
                ctx.transport.reset().await;
                ctx.primary_open.store(false, Ordering::SeqCst);
            }
            SignalingEvent::Disconnected { reconnect: false } => {}
            SignalingEvent::Status(status) => debug!("signaling status: {}", status),
            SignalingEvent::Error(err) => warn!("signaling error: {}", err),
            SignalingEvent::Debug(msg) => debug!("signaling debug: {}", msg),
        }
    }
}

async fn run_transport_bridge(ctx: BridgeContext, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            TransportEvent::IceCandidateGenerated {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                let _ = ctx.signaling.send(SignalingMessage::IceCandidate {
                    candidate,
                    sdp_mid,
                    sdp_mline_index,
                });
            }
            TransportEvent::DataChannelOpen(label) if label == "input" => {
                ctx.primary_open.store(true, Ordering::SeqCst);
            }
            TransportEvent::DataChannelOpen(_) => {}
            TransportEvent::DataChannelClose(label) if label == "input" => {
                ctx.primary_open.store(false, Ordering::SeqCst);
            }
            TransportEvent::DataChannelClose(_) => {}
            TransportEvent::ConnectionStateChange(state) => {
                debug!("peer connection state: {}", state);
                if state.contains("Failed") || state.contains("Disconnected") || state.contains("Closed") {
                    ctx.primary_open.store(false, Ordering::SeqCst);
                    ctx.transport.reset().await;
                }
            }
            TransportEvent::PlayStreamRequired => {
                debug!("autoplay blocked; a user-gesture control is required");
            }
            TransportEvent::ClipboardContent(text) => {
                let _ = ctx.notifications.send(DashboardNotification::ClipboardContentUpdate { text });
            }
            TransportEvent::CursorChange(_) => {}
            TransportEvent::SystemAction(action) => handle_system_action(&ctx, action),
            TransportEvent::GpuStats(_) | TransportEvent::SystemStats(_) => {}
            TransportEvent::LatencyMeasurement(ms) => ctx.stats.record_client_latency(ms),
            TransportEvent::ServerSettings(json) => handle_server_settings(&ctx, json).await,
            TransportEvent::Status(status) => debug!("transport status: {}", status),
            TransportEvent::Error(err) => warn!("transport error: {}", err),
            TransportEvent::Debug(msg) => debug!("transport debug: {}", msg),
        }
    }
}

fn handle_system_action(ctx: &BridgeContext, action: String) {
    if action == "reload" {
        // After 700ms, signaling disconnects, transport resets, and a new
        // offer is negotiated.
        let signaling = ctx.signaling.clone();
        let transport = ctx.transport.clone();
        let primary_open = ctx.primary_open.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            signaling.disconnect();
            transport.reset().await;
            primary_open.store(false, Ordering::SeqCst);
            signaling.connect();
        });
    } else {
        debug!("system_action: {}", action);
    }
}

async fn handle_server_settings(ctx: &BridgeContext, json: String) {
    match ctx.settings.reconcile_json(&json) {
        Ok(outcome) => {
            match outcome.manual_resolution {
                ManualResolutionDecision::Manual { width, height } => {
                    ctx.geometry.apply_manual_style(width, height);
                }
                ManualResolutionDecision::Auto => {
                    let viewport = *ctx.viewport.lock();
                    ctx.geometry
                        .reset_to_window_resolution(viewport.width, viewport.height);
                }
            }

            if !outcome.delta.is_empty() {
                if let Ok(delta_json) = serde_json::to_string(&outcome.delta) {
                    ctx.transport
                        .send_data_channel_message(DataChannelPayload::Text(
                            ClientOp::Settings { json: delta_json }.encode(),
                        ))
                        .await;
                }
            }

            let _ = ctx.notifications.send(DashboardNotification::ServerSettings { payload: json });
        }
        Err(e) => warn!("dropped malformed server_settings: {}", e),
    }
}

async fn run_geometry_bridge(ctx: BridgeContext, mut rx: mpsc::UnboundedReceiver<GeometryEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            GeometryEvent::ResolutionDue { width, height } => {
                let dpr = ctx.viewport.lock().device_pixel_ratio;
                let (logical_w, logical_h) = ctx.geometry.logical_dimensions(width, height, dpr);

                ctx.transport
                    .send_data_channel_message(DataChannelPayload::Text(
                        ClientOp::Resolution {
                            width: logical_w,
                            height: logical_h,
                        }
                        .encode(),
                    ))
                    .await;

                let rendering = ctx.geometry.image_rendering(dpr);
                let letterbox = if ctx.scale_locally.load(Ordering::Relaxed) {
                    Some(scale_to_fit(width, height, logical_w, logical_h))
                } else {
                    None
                };
                ctx.surface.apply_css(logical_w, logical_h, rendering, letterbox);
            }
        }
    }
}

async fn run_upload_bridge(ctx: BridgeContext, mut rx: mpsc::UnboundedReceiver<UploadEvent>) {
    while let Some(event) = rx.recv().await {
        let notification = match event {
            UploadEvent::Started { path, size } => DashboardNotification::FileUpload {
                status: "start".to_string(),
                file_name: path,
                file_size: Some(size),
                progress: Some(0.0),
                message: None,
            },
            UploadEvent::Progress { path, offset, size } => DashboardNotification::FileUpload {
                status: "progress".to_string(),
                file_name: path,
                file_size: Some(size),
                progress: Some(if size > 0 {
                    offset as f64 / size as f64
                } else {
                    1.0
                }),
                message: None,
            },
            UploadEvent::Completed { path } => DashboardNotification::FileUpload {
                status: "end".to_string(),
                file_name: path,
                file_size: None,
                progress: Some(1.0),
                message: None,
            },
            UploadEvent::Failed { path, reason } => DashboardNotification::FileUpload {
                status: "error".to_string(),
                file_name: path,
                file_size: None,
                progress: None,
                message: Some(reason),
            },
            UploadEvent::Rejected { path, reason } => DashboardNotification::FileUpload {
                status: "warning".to_string(),
                file_name: path,
                file_size: None,
                progress: None,
                message: Some(reason),
            },
        };
        let _ = ctx.notifications.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashboard_message_parses_known_types() {
        let msg = DashboardMessage::from_json(
            r#"{"type":"setManualResolution","width":1920,"height":1080}"#,
        )
        .unwrap();
        match msg {
            DashboardMessage::SetManualResolution { width, height } => {
                assert_eq!((width, height), (1920, 1080));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn dashboard_message_drops_unknown_type() {
        assert!(DashboardMessage::from_json(r#"{"type":"bogus"}"#).is_none());
    }

    #[test]
    fn file_upload_notification_serialises_warning_status() {
        let notification = DashboardNotification::FileUpload {
            status: "warning".to_string(),
            file_name: "_N/A_".to_string(),
            file_size: None,
            progress: None,
            message: Some("Please let the ongoing upload complete".to_string()),
        };
        let json = serde_json::to_string(&notification).unwrap();
        assert!(json.contains("\"status\":\"warning\""));
        assert!(json.contains("_N/A_"));
        assert!(!json.contains("file_size"));
    }

    #[tokio::test]
    async fn orchestrator_new_is_idle_until_initialized() {
        let store: Arc<dyn PersistentStore> = Arc::new(crate::persist::MemoryStore::new());
        let orchestrator = SessionOrchestrator::new(ClientConfig::default(), store).unwrap();
        assert!(!orchestrator.initialized.load(Ordering::SeqCst));
    }
}
