//! MediaHub Cache Daemon - tiered file cache for the media hub viewers
//!
//! Serves the file cache to the viewer UI over a Unix socket.

mod cache;
mod config;
mod ipc;

use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use cache::{MediaCache, SetOutcome};
use config::CacheConfig;
use ipc::IpcServer;

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run IPC server mode (default)
    Server,
    /// Print cache statistics (CLI mode)
    Stats,
    /// Clear both cache tiers (CLI mode)
    Clear,
    /// Cache a local file under a viewer path unless already cached (CLI mode)
    Import { path: String, source: PathBuf },
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"MediaHub Cache Daemon - Tiered file cache for the media hub viewers

USAGE:
    mediahub-cache           # Run IPC server (default)
    mediahub-cache stats
    mediahub-cache clear
    mediahub-cache import <cache-path> <file>
    mediahub-cache help

COMMANDS:
    (none)  Run IPC server mode (waits for commands from the viewer UI)
    stats   Print cache statistics
    clear   Clear the KV tier and the local folder cache
    import  Cache <file> under <cache-path> unless it is already cached
    help    Show this help message

ENVIRONMENT:
    MEDIAHUB_CACHE_CONFIG    Path to a JSON config file
    MEDIAHUB_DATA_DIR        Directory for the KV store
    MEDIAHUB_SOCKET          IPC socket path
    MEDIAHUB_KV_CAPACITY     KV tier capacity in bytes
    MEDIAHUB_TOUCH_DELAY_MS  Delay before access times are refreshed
    MEDIAHUB_DEFAULT_FOLDER  Folder offered when the UI supplies none
    MEDIAHUB_LOCAL_FOLDERS   Set to false to keep every file in the KV tier
    RUST_LOG                 Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Server);
    }

    match args[1].as_str() {
        "stats" => Ok(Command::Stats),
        "clear" => Ok(Command::Clear),
        "import" => match (args.get(2), args.get(3)) {
            (Some(path), Some(source)) => Ok(Command::Import {
                path: path.clone(),
                source: PathBuf::from(source),
            }),
            _ => Err(anyhow!("import requires <cache-path> and <file>")),
        },
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(anyhow!("Unknown command: {}", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if let Command::Help = command {
        print_help();
        return Ok(());
    }

    let config = CacheConfig::load()?;
    let cache = Arc::new(MediaCache::new(&config, config.directory_access()));
    cache.init().await;

    match command {
        Command::Server => {
            info!("Starting media cache daemon in IPC server mode");

            if cache.try_restore_folder().await {
                info!("Local folder restored from last session");
            }

            let mut ipc_server = IpcServer::new(Arc::clone(&cache), config.socket_path.clone());
            if let Err(e) = ipc_server.start().await {
                error!(error = %e, "Failed to start IPC server");
                return Err(e);
            }
            let ipc_server = Arc::new(ipc_server);

            info!("Daemon ready. Waiting for commands from the viewer UI...");

            let running = Arc::clone(&ipc_server);
            let ipc_handle = tokio::spawn(async move {
                if let Err(e) = running.run().await {
                    error!(error = %e, "IPC server error");
                }
            });

            let flushing = Arc::clone(&cache);
            let flush_interval = config.flush_interval();
            let flush_handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(flush_interval);
                loop {
                    ticker.tick().await;
                    flushing.flush().await;
                }
            });

            tokio::signal::ctrl_c().await?;

            info!("Received shutdown signal");
            ipc_handle.abort();
            flush_handle.abort();
            ipc_server.stop()?;
            cache.flush().await;

            info!("Shutdown complete.");
        }
        Command::Stats => {
            cache.try_restore_folder().await;
            let stats = cache.get_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Clear => {
            cache.try_restore_folder().await;
            cache.clear().await?;
            println!("Cache cleared.");
        }
        Command::Import { path, source } => {
            cache.try_restore_folder().await;
            let fetched = cache
                .get_or_fetch(&path, || tokio::fs::read(&source))
                .await
                .map_err(|e| anyhow!("Failed to read {}: {}", source.display(), e))?;
            match fetched.write_back {
                None => println!("{} already cached ({} bytes).", path, fetched.content.len()),
                Some(SetOutcome::Success) => {
                    println!("Cached {} ({} bytes).", path, fetched.content.len())
                }
                Some(SetOutcome::NeedLocalFolder) => {
                    println!("{} needs a local folder; select one in the viewer first.", path)
                }
                Some(SetOutcome::Error) => return Err(anyhow!("Failed to cache {}", path)),
            }
            cache.flush().await;
        }
        Command::Help => {}
    }

    Ok(())
}
