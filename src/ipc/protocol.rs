//! IPC protocol definitions for viewer-daemon communication
//!
//! This module defines the JSON protocol used between the viewer UI and the
//! cache daemon over a Unix domain socket. File content travels base64 encoded.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheStatsSnapshot, SetOutcome};

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands sent from the viewer UI to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Read a cached file
    Get { path: String },
    /// Read a cached text file
    GetText { path: String },
    /// Cache file content
    Set {
        path: String,
        /// Base64 content
        data: String,
    },
    /// Cache raw binary content in the local folder
    SetBinary { path: String, data: String },
    /// Playback URL for a cached video
    GetVideoUrl { path: String },
    /// Select a local folder (the path the UI's dialog returned)
    SelectLocalFolder {
        #[serde(default)]
        hint: Option<String>,
    },
    TryRestoreFolder,
    DisconnectLocalFolder,
    IsLocalFolderSupported,
    /// Drop one path from both tiers
    Invalidate { path: String },
    GetStats,
    Clear,
    ClearIndexedDb,
    ClearLocalFolder,
}

/// Responses sent from the daemon to the viewer UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Success response
    Success {
        /// Optional success message
        message: Option<String>,
    },
    /// Error response
    Error {
        /// Error message
        error: String,
    },
    /// Cached content, `None` on a miss
    Content { data: Option<String> },
    /// Cached text, `None` on a miss or non-UTF-8 content
    Text { text: Option<String> },
    /// Outcome of a write
    SetResult { result: SetOutcome },
    VideoUrl { url: Option<String> },
    /// Boolean answer (folder selection, restore, capability)
    Flag { value: bool },
    /// Cache statistics
    Stats {
        /// Protocol version
        version: u32,
        stats: CacheStatsSnapshot,
    },
}

/// Encode file content for the wire
pub fn encode_content(content: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(content)
}

/// Decode file content from the wire
pub fn decode_content(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(data)
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n'); // Add newline delimiter
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::{StorageMode, TierCounters};

    #[test]
    fn test_parse_set_command() {
        let json = r#"{"type":"set","path":"/books/a.epub","data":"aGVsbG8="}"#;
        let cmd = parse_command(json.as_bytes()).unwrap();
        match cmd {
            Command::Set { path, data } => {
                assert_eq!(path, "/books/a.epub");
                assert_eq!(decode_content(&data).unwrap(), b"hello");
            }
            _ => panic!("Expected Set command"),
        }
    }

    #[test]
    fn test_parse_select_folder_without_hint() {
        let json = r#"{"type":"selectLocalFolder"}"#;
        match parse_command(json.as_bytes()).unwrap() {
            Command::SelectLocalFolder { hint } => assert_eq!(hint, None),
            _ => panic!("Expected SelectLocalFolder command"),
        }
    }

    #[test]
    fn test_parse_unit_commands() {
        assert!(matches!(
            parse_command(br#"{"type":"clearIndexedDb"}"#).unwrap(),
            Command::ClearIndexedDb
        ));
        assert!(matches!(
            parse_command(br#"{"type":"getVideoUrl","path":"/m.mp4"}"#).unwrap(),
            Command::GetVideoUrl { .. }
        ));
        assert!(matches!(
            parse_command(br#"{"type":"getText","path":"/notes/a.md"}"#).unwrap(),
            Command::GetText { .. }
        ));
        assert!(parse_command(br#"{"type":"format"}"#).is_err());
    }

    #[test]
    fn test_serialize_set_result() {
        let response = Response::SetResult {
            result: SetOutcome::NeedLocalFolder,
        };
        let json = String::from_utf8(serialize_response(&response).unwrap()).unwrap();
        assert_eq!(json, "{\"type\":\"setResult\",\"result\":\"need_local_folder\"}\n");
    }

    #[test]
    fn test_serialize_stats_response() {
        let response = Response::Stats {
            version: PROTOCOL_VERSION,
            stats: CacheStatsSnapshot {
                directory_count: 0,
                directory_size: 0,
                kv_count: 1,
                kv_size: 5,
                kv_capacity: 10,
                directory_capacity: 100,
                mode: StorageMode::Auto,
                folder_name: None,
                capabilities_supported: false,
                directory_counters: TierCounters::default(),
                kv_counters: TierCounters::default(),
            },
        };
        let json = String::from_utf8(serialize_response(&response).unwrap()).unwrap();
        assert!(json.contains(r#""kvCount":1"#));
        assert!(json.contains(r#""mode":"auto""#));
    }
}
