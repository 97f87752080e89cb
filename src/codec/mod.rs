//! Wire Protocol Codec
//!
//! Encodes/decodes the ASCII comma-prefixed control messages and the binary
//! file-chunk framing carried on the primary and auxiliary data channels.

use std::fmt;

/// Byte prefix marking a binary aux-channel frame as a file chunk body.
pub const FILE_CHUNK_PREFIX: u8 = 0x01;

/// Maximum chunk payload size, leaving one byte of frame for the prefix.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 - 1;

#[derive(Debug)]
pub enum CodecError {
    UnknownOp(String),
    MalformedArgs(String),
    ChunkTooLarge(usize),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::UnknownOp(op) => write!(f, "unknown op: {}", op),
            CodecError::MalformedArgs(op) => write!(f, "malformed args for op: {}", op),
            CodecError::ChunkTooLarge(n) => {
                write!(f, "chunk of {} bytes exceeds {} byte limit", n, MAX_CHUNK_SIZE)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Messages sent from client to server on the primary channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientOp {
    Resolution { width: u32, height: u32 },
    VideoBitrate { kbps: u32 },
    AudioBitrate { bps: u32 },
    TargetFps { fps: u32 },
    ScalingDpi { dpi: u32 },
    ClipboardWrite { base64_text: String },
    Command { command: String },
    KeyboardReset,
    ClientFps { fps: u32 },
    ClientLatency { ms: u32 },
    StatsVideo { json: String },
    Settings { json: String },
    FileUploadStart { path: String, size: u64 },
    FileUploadEnd { path: String },
    FileUploadError { path: String, reason: String },
}

impl ClientOp {
    /// Encode into the textual form sent on the primary channel.
    pub fn encode(&self) -> String {
        match self {
            ClientOp::Resolution { width, height } => format!("r,{}x{}", width, height),
            ClientOp::VideoBitrate { kbps } => format!("vb,{}", kbps),
            ClientOp::AudioBitrate { bps } => format!("ab,{}", bps),
            ClientOp::TargetFps { fps } => format!("_arg_fps,{}", fps),
            ClientOp::ScalingDpi { dpi } => format!("s,{}", dpi),
            ClientOp::ClipboardWrite { base64_text } => format!("cw,{}", base64_text),
            ClientOp::Command { command } => format!("cmd,{}", command),
            ClientOp::KeyboardReset => "kr".to_string(),
            ClientOp::ClientFps { fps } => format!("_f,{}", fps),
            ClientOp::ClientLatency { ms } => format!("_l,{}", ms),
            ClientOp::StatsVideo { json } => format!("_stats_video,{}", json),
            ClientOp::Settings { json } => format!("SETTINGS,{}", json),
            ClientOp::FileUploadStart { path, size } => {
                format!("FILE_UPLOAD_START,{}:{}", path, size)
            }
            ClientOp::FileUploadEnd { path } => format!("FILE_UPLOAD_END,{}", path),
            ClientOp::FileUploadError { path, reason } => {
                format!("FILE_UPLOAD_ERROR,{}:{}", path, reason)
            }
        }
    }
}

/// Messages received from the server on the primary channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerOp {
    SystemAction { action: String },
    ServerSettings { json: String },
    Cursor { bytes: Vec<u8> },
    Latency { ms: u32 },
    ClipboardWrite { base64_text: String },
}

/// Parse one line of primary-channel text into a `ServerOp`.
///
/// Unknown ops are reported as `CodecError::UnknownOp` so callers can log a
/// warning and drop the message per the protocol-violation handling rule;
/// they must not treat this as a fatal condition.
pub fn decode_server_text(text: &str) -> Result<ServerOp, CodecError> {
    let text = text.trim_end_matches(['\r', '\n']);
    let (op, rest) = match text.split_once(',') {
        Some((op, rest)) => (op, Some(rest)),
        None => (text, None),
    };

    match op {
        "system_action" => Ok(ServerOp::SystemAction {
            action: rest.unwrap_or_default().to_string(),
        }),
        "server_settings" => Ok(ServerOp::ServerSettings {
            json: rest.unwrap_or_default().to_string(),
        }),
        "latency" => {
            let ms = rest
                .ok_or_else(|| CodecError::MalformedArgs("latency".to_string()))?
                .parse::<u32>()
                .map_err(|_| CodecError::MalformedArgs("latency".to_string()))?;
            Ok(ServerOp::Latency { ms })
        }
        "cw" => Ok(ServerOp::ClipboardWrite {
            base64_text: rest.unwrap_or_default().to_string(),
        }),
        other => Err(CodecError::UnknownOp(other.to_string())),
    }
}

/// Cursor payloads arrive as raw binary on the primary channel (not
/// comma-prefixed text); callers hand the bytes directly to this helper.
pub fn decode_cursor_binary(bytes: &[u8]) -> ServerOp {
    ServerOp::Cursor {
        bytes: bytes.to_vec(),
    }
}

/// Frame a file chunk for the auxiliary channel: one prefix byte followed by
/// the payload. `payload.len()` MUST be `<= MAX_CHUNK_SIZE`.
pub fn frame_chunk(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    if payload.len() > MAX_CHUNK_SIZE {
        return Err(CodecError::ChunkTooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.push(FILE_CHUNK_PREFIX);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Strip the prefix byte from a received aux-channel frame, returning the
/// chunk payload if the prefix identifies a file chunk.
pub fn unframe_chunk(frame: &[u8]) -> Option<&[u8]> {
    match frame.split_first() {
        Some((&FILE_CHUNK_PREFIX, payload)) => Some(payload),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_resolution() {
        let op = ClientOp::Resolution {
            width: 1920,
            height: 1080,
        };
        assert_eq!(op.encode(), "r,1920x1080");
    }

    #[test]
    fn encodes_upload_ops() {
        assert_eq!(
            ClientOp::FileUploadStart {
                path: "a.txt".to_string(),
                size: 200
            }
            .encode(),
            "FILE_UPLOAD_START,a.txt:200"
        );
        assert_eq!(
            ClientOp::FileUploadEnd {
                path: "a.txt".to_string()
            }
            .encode(),
            "FILE_UPLOAD_END,a.txt"
        );
    }

    #[test]
    fn decodes_system_action() {
        let op = decode_server_text("system_action,reload").unwrap();
        assert_eq!(
            op,
            ServerOp::SystemAction {
                action: "reload".to_string()
            }
        );
    }

    #[test]
    fn decodes_latency() {
        let op = decode_server_text("latency,42").unwrap();
        assert_eq!(op, ServerOp::Latency { ms: 42 });
    }

    #[test]
    fn unknown_op_is_reported_not_panicked() {
        assert!(decode_server_text("bogus,1,2").is_err());
    }

    #[test]
    fn chunk_at_limit_succeeds() {
        let payload = vec![0u8; MAX_CHUNK_SIZE];
        let frame = frame_chunk(&payload).unwrap();
        assert_eq!(frame.len(), MAX_CHUNK_SIZE + 1);
        assert_eq!(unframe_chunk(&frame).unwrap().len(), MAX_CHUNK_SIZE);
    }

    #[test]
    fn chunk_over_limit_rejected() {
        let payload = vec![0u8; MAX_CHUNK_SIZE + 1];
        assert!(frame_chunk(&payload).is_err());
    }

    #[test]
    fn four_chunk_split_of_200_bytes_at_chunk_size_64() {
        // Mirrors end-to-end scenario #4 in spec, with a smaller chunk size.
        let total = 200usize;
        let chunk_size = 64usize;
        let data = vec![7u8; total];
        let mut offset = 0;
        let mut frame_lens = Vec::new();
        while offset < total {
            let end = (offset + chunk_size).min(total);
            let frame = frame_chunk(&data[offset..end]).unwrap();
            frame_lens.push(frame.len());
            offset = end;
        }
        assert_eq!(frame_lens, vec![65, 65, 65, 41]);
    }
}
