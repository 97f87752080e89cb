//! Stats Aggregator.
//!
//! Periodic sampling of transport statistics, derivation of round-trip and
//! jitter-buffer-induced latencies, and publication of selected metrics to
//! the server and dashboard by reading `webrtc::stats::StatsReportType` off
//! the inbound receivers.

use log::debug;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::stats::StatsReportType;

use crate::codec::ClientOp;
use crate::transport::{DataChannelPayload, TransportManager};

/// Immutable per-tick record.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub video_bitrate_mbps: f64,
    pub audio_bitrate_kbps: f64,
    pub video_latency_ms: f64,
    pub audio_latency_ms: f64,
    pub connection_latency_ms: f64,
}

#[derive(Debug, Clone)]
pub enum StatsEvent {
    Snapshot(StatsSnapshot),
}

pub struct StatsAggregatorConfig {
    pub snapshot_interval: Duration,
    pub client_push_interval: Duration,
}

#[derive(Default, Clone, Copy)]
struct StreamCounters {
    bytes: u64,
    jitter_buffer_delay: f64,
    jitter_buffer_emitted_count: u64,
}

#[derive(Default, Clone, Copy)]
struct RawSample {
    video: StreamCounters,
    audio: StreamCounters,
    rtt_ms: f64,
}

/// 1s-tick stats aggregator. Not `Clone`; shared via `Arc`.
pub struct StatsAggregator {
    transport: Arc<TransportManager>,
    config: StatsAggregatorConfig,
    events: mpsc::UnboundedSender<StatsEvent>,
    client_fps: AtomicU32,
    client_latency_ms: AtomicU32,
}

impl StatsAggregator {
    pub fn new(
        transport: Arc<TransportManager>,
        config: StatsAggregatorConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<StatsEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let aggregator = Arc::new(Self {
            transport,
            config,
            events,
            client_fps: AtomicU32::new(0),
            client_latency_ms: AtomicU32::new(0),
        });
        (aggregator, rx)
    }

    /// Record the client-measured frame rate, supplied by the embedder's
    /// render loop (this crate does not render).
    pub fn record_client_fps(&self, fps: u32) {
        self.client_fps.store(fps, Ordering::Relaxed);
    }

    /// Record a client-measured latency sample, e.g. from the transport's
    /// `onlatencymeasurement` event.
    pub fn record_client_latency(&self, ms: u32) {
        self.client_latency_ms.store(ms, Ordering::Relaxed);
    }

    /// Spawn the 1s snapshot loop and the 5s client-metric push loop.
    /// Returns the task handles for the orchestrator to abort on cleanup.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let snapshot_task = {
            let aggregator = self.clone();
            tokio::spawn(async move { aggregator.run_snapshot_loop().await })
        };
        let push_task = {
            let aggregator = self.clone();
            tokio::spawn(async move { aggregator.run_client_push_loop().await })
        };
        vec![snapshot_task, push_task]
    }

    async fn run_snapshot_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.snapshot_interval);
        let mut previous: Option<RawSample> = None;

        loop {
            ticker.tick().await;
            let Some(report) = self.transport.get_stats().await else {
                continue;
            };
            let sample = sample_from_report(&report);

            if let Some(prev) = previous {
                let dt = self.config.snapshot_interval.as_secs_f64();
                let snapshot = derive_snapshot(&prev, &sample, dt);
                self.publish(snapshot).await;
            }
            previous = Some(sample);
        }
    }

    async fn publish(&self, snapshot: StatsSnapshot) {
        debug!(
            "stats: video={:.2}Mbps audio={:.2}kbps latency={:.0}ms",
            snapshot.video_bitrate_mbps, snapshot.audio_bitrate_kbps, snapshot.connection_latency_ms
        );
        if let Ok(json) = serde_json::to_string(&snapshot) {
            self.transport
                .send_data_channel_message(DataChannelPayload::Text(
                    ClientOp::StatsVideo { json }.encode(),
                ))
                .await;
        }
        let _ = self.events.send(StatsEvent::Snapshot(snapshot));
    }

    async fn run_client_push_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.client_push_interval);
        loop {
            ticker.tick().await;
            let fps = self.client_fps.load(Ordering::Relaxed);
            let latency = self.client_latency_ms.load(Ordering::Relaxed);
            self.transport
                .send_data_channel_message(DataChannelPayload::Text(
                    ClientOp::ClientFps { fps }.encode(),
                ))
                .await;
            self.transport
                .send_data_channel_message(DataChannelPayload::Text(
                    ClientOp::ClientLatency { ms: latency }.encode(),
                ))
                .await;
        }
    }
}

fn sample_from_report(report: &webrtc::stats::StatsReport) -> RawSample {
    let mut sample = RawSample::default();

    for stat in report.reports.values() {
        match stat {
            StatsReportType::InboundRTP(rtp) if rtp.kind == "video" => {
                sample.video.bytes = rtp.bytes_received;
                sample.video.jitter_buffer_delay = rtp.jitter_buffer_delay;
                sample.video.jitter_buffer_emitted_count = rtp.jitter_buffer_emitted_count;
            }
            StatsReportType::InboundRTP(rtp) if rtp.kind == "audio" => {
                sample.audio.bytes = rtp.bytes_received;
                sample.audio.jitter_buffer_delay = rtp.jitter_buffer_delay;
                sample.audio.jitter_buffer_emitted_count = rtp.jitter_buffer_emitted_count;
            }
            StatsReportType::CandidatePair(pair) => {
                if let Some(rtt) = pair.current_round_trip_time {
                    sample.rtt_ms = sample.rtt_ms.max(rtt * 1000.0);
                }
            }
            _ => {}
        }
    }

    sample
}

fn derive_snapshot(prev: &RawSample, cur: &RawSample, dt_seconds: f64) -> StatsSnapshot {
    let delta_video_bytes = cur.video.bytes.saturating_sub(prev.video.bytes) as f64;
    let delta_audio_bytes = cur.audio.bytes.saturating_sub(prev.audio.bytes) as f64;

    let video_bitrate_mbps = if dt_seconds > 0.0 {
        (delta_video_bytes * 8.0) / (dt_seconds * 1e6)
    } else {
        0.0
    };
    let audio_bitrate_kbps = if dt_seconds > 0.0 {
        (delta_audio_bytes * 8.0) / (dt_seconds * 1e3)
    } else {
        0.0
    };

    let video_latency_ms = jitter_latency(prev.rtt_ms.max(cur.rtt_ms), &prev.video, &cur.video);
    let audio_latency_ms = jitter_latency(prev.rtt_ms.max(cur.rtt_ms), &prev.audio, &cur.audio);
    let connection_latency_ms = video_latency_ms.max(audio_latency_ms);

    StatsSnapshot {
        video_bitrate_mbps,
        audio_bitrate_kbps,
        video_latency_ms,
        audio_latency_ms,
        connection_latency_ms,
    }
}

fn jitter_latency(rtt_ms: f64, prev: &StreamCounters, cur: &StreamCounters) -> f64 {
    let delta_delay = cur.jitter_buffer_delay - prev.jitter_buffer_delay;
    let delta_emitted = cur
        .jitter_buffer_emitted_count
        .saturating_sub(prev.jitter_buffer_emitted_count);

    if delta_emitted == 0 {
        rtt_ms
    } else {
        rtt_ms + 1000.0 * delta_delay / delta_emitted as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(bytes: u64, jb_delay: f64, jb_emitted: u64) -> StreamCounters {
        StreamCounters {
            bytes,
            jitter_buffer_delay: jb_delay,
            jitter_buffer_emitted_count: jb_emitted,
        }
    }

    #[test]
    fn derives_bitrate_from_byte_delta() {
        let prev = RawSample {
            video: counters(0, 0.0, 0),
            audio: counters(0, 0.0, 0),
            rtt_ms: 0.0,
        };
        let cur = RawSample {
            video: counters(125_000, 0.0, 0),
            audio: counters(12_500, 0.0, 0),
            rtt_ms: 0.0,
        };
        let snapshot = derive_snapshot(&prev, &cur, 1.0);
        assert!((snapshot.video_bitrate_mbps - 1.0).abs() < 1e-9);
        assert!((snapshot.audio_bitrate_kbps - 100.0).abs() < 1e-9);
    }

    #[test]
    fn jitter_latency_is_zero_denominator_safe() {
        let prev = counters(0, 0.0, 10);
        let cur = counters(0, 1.0, 10);
        assert_eq!(jitter_latency(5.0, &prev, &cur), 5.0);
    }

    #[test]
    fn jitter_latency_adds_buffer_delay_component() {
        let prev = counters(0, 0.0, 0);
        let cur = counters(0, 0.2, 100);
        // 5ms rtt + 1000 * 0.2 / 100 = 5 + 2 = 7ms
        assert!((jitter_latency(5.0, &prev, &cur) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn connection_latency_is_max_of_video_and_audio() {
        let prev = RawSample::default();
        let cur = RawSample {
            video: counters(0, 0.3, 100),
            audio: counters(0, 0.1, 100),
            rtt_ms: 10.0,
        };
        let snapshot = derive_snapshot(&prev, &cur, 1.0);
        assert_eq!(snapshot.connection_latency_ms, snapshot.video_latency_ms.max(snapshot.audio_latency_ms));
        assert!(snapshot.video_latency_ms > snapshot.audio_latency_ms);
    }
}
