//! File Upload Pipeline.
//!
//! Chunked, back-pressured transfer over the auxiliary data channel; a
//! depth-first directory tree walker; per-file progress reporting; mutual
//! exclusion against concurrent uploads via the transport's single-aux-
//! channel invariant. Speaks the sender's side of the
//! `FILE_UPLOAD_START`/`END`/`ERROR` control ops and the `0x01`-prefixed
//! binary chunk framing the server expects on the aux channel.

use log::{info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::codec::{self, ClientOp};
use crate::transport::{DataChannelPayload, TransportManager};

#[derive(Debug)]
pub enum UploadError {
    Contention,
    Io(String),
    Send(String),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Contention => write!(f, "an upload batch is already in progress"),
            UploadError::Io(msg) => write!(f, "upload io error: {}", msg),
            UploadError::Send(msg) => write!(f, "upload send error: {}", msg),
        }
    }
}

impl std::error::Error for UploadError {}

/// One file queued for upload, with its wire path (forward-slash separated,
/// no leading separator) and local filesystem location.
#[derive(Debug, Clone)]
pub struct UploadEntry {
    pub wire_path: String,
    pub local_path: PathBuf,
}

/// Progress events the pipeline raises for the orchestrator to forward to
/// the dashboard as `fileUpload{...}` notifications.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    Started { path: String, size: u64 },
    Progress { path: String, offset: u64, size: u64 },
    Completed { path: String },
    Failed { path: String, reason: String },
    /// Aux-channel contention: a batch was rejected because one is already
    /// in flight. `path` is `"_N/A_"` when the rejection happens before any
    /// file in the new batch is known.
    Rejected { path: String, reason: String },
}

/// Depth-first walk of `roots`: files are yielded as-is; directories are
/// walked recursively with entries sorted for determinism. Empty
/// directories are silently skipped. The wire path is always forward-slash
/// separated with any leading separator stripped.
pub fn walk_entries(roots: &[PathBuf]) -> std::io::Result<Vec<UploadEntry>> {
    let mut entries = Vec::new();
    for root in roots {
        let base_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if root.is_dir() {
            walk_dir(root, &base_name, &mut entries)?;
        } else if root.is_file() {
            entries.push(UploadEntry {
                wire_path: strip_leading_separator(&base_name),
                local_path: root.clone(),
            });
        }
    }
    Ok(entries)
}

fn walk_dir(dir: &Path, wire_prefix: &str, out: &mut Vec<UploadEntry>) -> std::io::Result<()> {
    let mut children: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    children.sort_by_key(|e| e.file_name());

    for child in children {
        let path = child.path();
        let name = child.file_name().to_string_lossy().into_owned();
        let wire_path = format!("{}/{}", wire_prefix, name);
        if path.is_dir() {
            walk_dir(&path, &wire_path, out)?;
        } else if path.is_file() {
            out.push(UploadEntry {
                wire_path: strip_leading_separator(&wire_path),
                local_path: path,
            });
        }
    }
    Ok(())
}

fn strip_leading_separator(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

pub struct UploadPipelineConfig {
    pub chunk_size: usize,
}

/// Sender-side file upload pipeline. Not `Clone`; shared via `Arc`. Only one
/// `run_batch` call may make progress at a time, enforced by the transport's
/// "at most one aux channel" invariant.
pub struct UploadPipeline {
    transport: Arc<TransportManager>,
    config: UploadPipelineConfig,
    events: mpsc::UnboundedSender<UploadEvent>,
    batch_lock: AsyncMutex<()>,
}

impl UploadPipeline {
    pub fn new(
        transport: Arc<TransportManager>,
        config: UploadPipelineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            transport,
            config,
            events,
            batch_lock: AsyncMutex::new(()),
        };
        (pipeline, rx)
    }

    /// Upload every entry in `entries` sequentially over one aux channel.
    /// Rejects immediately (without touching the aux channel) if a batch is
    /// already running or the transport already has an open aux channel.
    pub async fn run_batch(&self, entries: Vec<UploadEntry>) -> Result<(), UploadError> {
        let _batch_guard = match self.batch_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let _ = self.events.send(UploadEvent::Rejected {
                    path: "_N/A_".to_string(),
                    reason: "Please let the ongoing upload complete".to_string(),
                });
                return Err(UploadError::Contention);
            }
        };

        if !self.transport.create_aux_data_channel().await {
            let _ = self.events.send(UploadEvent::Rejected {
                path: "_N/A_".to_string(),
                reason: "Please let the ongoing upload complete".to_string(),
            });
            return Err(UploadError::Contention);
        }
        self.transport.wait_for_aux_channel_open().await;

        let mut channel_wide_failure = None;
        for entry in &entries {
            match self.upload_one(entry).await {
                Ok(()) => {}
                Err(UploadError::Send(reason)) => {
                    // Aux channel itself is gone: abort remaining files.
                    warn!("aborting upload batch: {}", reason);
                    channel_wide_failure = Some(reason);
                    break;
                }
                Err(e) => {
                    // Per-file fault: siblings still get a chance.
                    warn!("upload of {} failed: {}", entry.wire_path, e);
                }
            }
        }

        self.transport.close_aux_channel().await;

        match channel_wide_failure {
            Some(reason) => Err(UploadError::Send(reason)),
            None => Ok(()),
        }
    }

    async fn upload_one(&self, entry: &UploadEntry) -> Result<(), UploadError> {
        let metadata = tokio::fs::metadata(&entry.local_path)
            .await
            .map_err(|e| self.fail_file(entry, UploadError::Io(e.to_string())))?;
        let size = metadata.len();

        self.transport
            .send_data_channel_message(DataChannelPayload::Text(
                ClientOp::FileUploadStart {
                    path: entry.wire_path.clone(),
                    size,
                }
                .encode(),
            ))
            .await;
        let _ = self.events.send(UploadEvent::Started {
            path: entry.wire_path.clone(),
            size,
        });

        if size == 0 {
            self.send_end(entry).await;
            return Ok(());
        }

        let mut file = tokio::fs::File::open(&entry.local_path)
            .await
            .map_err(|e| self.fail_file(entry, UploadError::Io(e.to_string())))?;

        let mut offset: u64 = 0;
        let mut buf = vec![0u8; self.config.chunk_size];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| self.fail_file(entry, UploadError::Io(e.to_string())))?;
            if n == 0 {
                break;
            }

            let frame = codec::frame_chunk(&buf[..n])
                .map_err(|e| self.fail_file(entry, UploadError::Io(e.to_string())))?;
            self.transport
                .send_aux_channel_data(frame)
                .await
                .map_err(|e| UploadError::Send(e.to_string()))?;

            offset += n as u64;
            let _ = self.events.send(UploadEvent::Progress {
                path: entry.wire_path.clone(),
                offset,
                size,
            });

            if self.transport.is_aux_buffer_near_threshold().await {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        self.transport.await_for_aux_buffer_to_drain().await;
        self.send_end(entry).await;
        Ok(())
    }

    async fn send_end(&self, entry: &UploadEntry) {
        self.transport
            .send_data_channel_message(DataChannelPayload::Text(
                ClientOp::FileUploadEnd {
                    path: entry.wire_path.clone(),
                }
                .encode(),
            ))
            .await;
        info!("upload finished: {}", entry.wire_path);
        let _ = self.events.send(UploadEvent::Completed {
            path: entry.wire_path.clone(),
        });
    }

    /// Reports the per-file failure to the server and dashboard, and
    /// returns the error unchanged so the caller can classify it.
    fn fail_file(&self, entry: &UploadEntry, error: UploadError) -> UploadError {
        let reason = error.to_string();
        let path = entry.wire_path.clone();
        let events = self.events.clone();
        let transport = self.transport.clone();
        let op = ClientOp::FileUploadError {
            path: path.clone(),
            reason: reason.clone(),
        }
        .encode();
        tokio::spawn(async move {
            transport
                .send_data_channel_message(DataChannelPayload::Text(op))
                .await;
        });
        let _ = events.send(UploadEvent::Failed { path, reason });
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_leading_separator_removes_one_slash() {
        assert_eq!(strip_leading_separator("/a/b"), "a/b");
        assert_eq!(strip_leading_separator("a/b"), "a/b");
    }

    #[test]
    fn walk_entries_depth_first_over_nested_dirs() {
        let root = std::env::temp_dir().join(format!("selkies-upload-walk-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::write(root.join("a.txt"), b"hello").unwrap();
        std::fs::write(root.join("sub/b.txt"), b"world").unwrap();

        let entries = walk_entries(&[root.clone()]).unwrap();
        let wire_paths: Vec<_> = entries.iter().map(|e| e.wire_path.clone()).collect();

        let base = root.file_name().unwrap().to_string_lossy().into_owned();
        assert!(wire_paths.contains(&format!("{}/a.txt", base)));
        assert!(wire_paths.contains(&format!("{}/sub/b.txt", base)));
        assert_eq!(entries.len(), 2, "empty directory must be skipped");
        assert!(wire_paths.iter().all(|p| !p.starts_with('/')));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn walk_entries_single_file_root() {
        let file = std::env::temp_dir().join(format!("selkies-upload-single-{}.txt", std::process::id()));
        std::fs::write(&file, b"data").unwrap();

        let entries = walk_entries(&[file.clone()]).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].local_path, file);

        let _ = std::fs::remove_file(&file);
    }
}
