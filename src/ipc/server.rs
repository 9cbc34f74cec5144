//! IPC Server - Unix socket server for viewer communication
//!
//! Handles incoming connections from the viewer UI and dispatches commands
//! to the MediaCache.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::cache::MediaCache;
use crate::ipc::protocol::{
    decode_content, encode_content, parse_command, serialize_response, Command, Response,
    PROTOCOL_VERSION,
};

/// IPC Server that listens for commands from the viewer UI
pub struct IpcServer {
    /// Shared cache context
    cache: Arc<MediaCache>,
    /// Socket path
    socket_path: PathBuf,
    /// Socket listener
    listener: Option<UnixListener>,
    /// Active connections counter
    connection_count: Arc<RwLock<u32>>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(cache: Arc<MediaCache>, socket_path: PathBuf) -> Self {
        Self {
            cache,
            socket_path,
            listener: None,
            connection_count: Arc::new(RwLock::new(0)),
        }
    }

    /// Start the IPC server
    pub async fn start(&mut self) -> Result<()> {
        // Clean up any existing socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .context("Failed to bind Unix socket")?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let cache = Arc::clone(&self.cache);
                    let connection_count = Arc::clone(&self.connection_count);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, cache, connection_count).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Remove the socket file
    pub fn stop(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        info!("IPC server stopped");
        Ok(())
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    cache: Arc<MediaCache>,
    connection_count: Arc<RwLock<u32>>,
) -> Result<()> {
    {
        let mut count = connection_count.write().await;
        *count += 1;
        debug!(count = *count, "New connection");
    }

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    // Read commands line by line (newline-delimited JSON)
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match parse_command(trimmed.as_bytes()) {
                    Ok(command) => process_command(command, &cache).await,
                    Err(e) => {
                        error!(error = %e, "Failed to parse command");
                        Response::Error {
                            error: format!("Invalid command: {}", e),
                        }
                    }
                };

                match serialize_response(&response) {
                    Ok(json) => {
                        if let Err(e) = writer.write_all(&json).await {
                            error!(error = %e, "Failed to write response");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    {
        let mut count = connection_count.write().await;
        *count = count.saturating_sub(1);
        debug!(count = *count, "Connection ended");
    }

    Ok(())
}

/// Process a command and return a response
pub async fn process_command(command: Command, cache: &MediaCache) -> Response {
    match command {
        Command::Get { path } => {
            debug!(path = %path, "Processing get command");
            Response::Content {
                data: cache.get(&path).await.map(|c| encode_content(&c)),
            }
        }

        Command::GetText { path } => Response::Text {
            text: cache.get_text(&path).await,
        },

        Command::Set { path, data } => match decode_content(&data) {
            Ok(content) => Response::SetResult {
                result: cache.set(&path, content).await,
            },
            Err(e) => Response::Error {
                error: format!("Invalid content encoding: {}", e),
            },
        },

        Command::SetBinary { path, data } => match decode_content(&data) {
            Ok(content) => Response::SetResult {
                result: cache.set_binary(&path, content).await,
            },
            Err(e) => Response::Error {
                error: format!("Invalid content encoding: {}", e),
            },
        },

        Command::GetVideoUrl { path } => Response::VideoUrl {
            url: cache.get_video_url(&path).await,
        },

        Command::SelectLocalFolder { hint } => {
            info!("Processing selectLocalFolder command");
            Response::Flag {
                value: cache.select_local_folder(hint.as_deref()).await,
            }
        }

        Command::TryRestoreFolder => Response::Flag {
            value: cache.try_restore_folder().await,
        },

        Command::DisconnectLocalFolder => {
            cache.disconnect_local_folder().await;
            Response::Success {
                message: Some("Local folder disconnected".to_string()),
            }
        }

        Command::IsLocalFolderSupported => Response::Flag {
            value: cache.is_local_folder_supported(),
        },

        Command::Invalidate { path } => {
            cache.invalidate(&path).await;
            Response::Success { message: None }
        }

        Command::GetStats => Response::Stats {
            version: PROTOCOL_VERSION,
            stats: cache.get_stats().await,
        },

        Command::Clear => clear_response(cache.clear().await, "Cache cleared"),

        Command::ClearIndexedDb => clear_response(cache.clear_indexed_db().await, "KV tier cleared"),

        Command::ClearLocalFolder => {
            clear_response(cache.clear_local_folder().await, "Local folder cleared")
        }
    }
}

fn clear_response(result: crate::cache::CacheResult<()>, message: &str) -> Response {
    match result {
        Ok(()) => Response::Success {
            message: Some(message.to_string()),
        },
        Err(e) => Response::Error {
            error: format!("Clear failed: {}", e),
        },
    }
}
