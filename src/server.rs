//! dictd TCP server
//!
//! One request per connection: read a line, apply it to the store, answer
//! `200 <v>...` or `404`, close. A background task snapshots the store on a
//! fixed interval and the server saves once more on shutdown.

use crate::{
    error::{DictError, Result},
    protocol::{parse_command_with, Command, ParseMode, Response},
    scheduler::{save_store, spawn_snapshot_task},
    snapshot::SnapshotFile,
    store::{MemoryStore, Store},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{watch, Semaphore},
    task::JoinSet,
    time::timeout,
};
use tracing::{debug, error, info, warn};

/// Upper bound on a single request line, newline included
const MAX_REQUEST_BYTES: u64 = 4096;

/// dictd server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub snapshot_path: PathBuf,
    pub snapshot_interval: Duration,
    /// `None` waits forever for the request line
    pub read_timeout: Option<Duration>,
    pub max_connections: usize,
    pub parse_mode: ParseMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:27000".to_string(),
            snapshot_path: PathBuf::from("./data.dat"),
            snapshot_interval: Duration::from_secs(30),
            read_timeout: Some(Duration::from_secs(30)),
            max_connections: 1000,
            parse_mode: ParseMode::Strict,
        }
    }
}

/// dictd TCP server
pub struct DictServer {
    config: ServerConfig,
    store: Arc<MemoryStore>,
    snapshot: Arc<SnapshotFile>,
    shutdown_tx: watch::Sender<bool>,
}

impl DictServer {
    /// Create a server, loading the snapshot or creating an empty one
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let snapshot = SnapshotFile::new(&config.snapshot_path);
        let loader = snapshot.clone();
        let data = tokio::task::spawn_blocking(move || loader.open_or_initialize())
            .await
            .map_err(|e| DictError::Snapshot(format!("load task failed: {}", e)))??;

        let store = MemoryStore::from_dictionary(data);
        info!("Restored {} keys from {}", store.len().await?, snapshot.path().display());

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            store: Arc::new(store),
            snapshot: Arc::new(snapshot),
            shutdown_tx,
        })
    }

    /// Shared handle to the live store
    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown,
    /// then write a final snapshot once every in-flight request is done.
    ///
    /// Returns right away (after the final save) if shutdown was already
    /// requested.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("dictd listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let snapshot_task = spawn_snapshot_task(
            Arc::clone(&self.store),
            Arc::clone(&self.snapshot),
            self.config.snapshot_interval,
            self.shutdown_tx.subscribe(),
        );
        let permits = Arc::new(Semaphore::new(self.config.max_connections));
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let permit = match Arc::clone(&permits).try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!("Connection limit reached, dropping {}", addr);
                                    continue;
                                }
                            };
                            debug!("Request from {}", addr);
                            let store = Arc::clone(&self.store);
                            let read_timeout = self.config.read_timeout;
                            let mode = self.config.parse_mode;
                            let conn_shutdown_rx = self.shutdown_tx.subscribe();

                            connections.spawn(async move {
                                if let Err(e) = Self::handle_client(stream, store, read_timeout, mode, conn_shutdown_rx).await {
                                    warn!("Error handling request from {}: {}", addr, e);
                                }
                                drop(permit);
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Connection task failed: {}", e);
                    }
                }

                _ = wait_for_shutdown(&mut shutdown_rx) => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        // Acknowledged writes must make it into the final snapshot
        debug!("Waiting for {} open connections", connections.len());
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                warn!("Connection task failed: {}", e);
            }
        }

        if let Err(e) = snapshot_task.await {
            warn!("Snapshot task ended abnormally: {}", e);
        }

        info!("Writing final snapshot to {}", self.snapshot.path().display());
        save_store(&self.store, &self.snapshot).await?;
        info!("Server stopped");
        Ok(())
    }

    /// Handle a single request on a client connection.
    ///
    /// Requests are raw bytes; anything that is not UTF-8 is decoded lossily
    /// so the client still gets a 200 or 404.
    async fn handle_client(
        stream: TcpStream,
        store: Arc<MemoryStore>,
        read_timeout: Option<Duration>,
        mode: ParseMode,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut buf_reader = BufReader::new(reader).take(MAX_REQUEST_BYTES);
        let mut request = Vec::new();

        let read = tokio::select! {
            result = read_request(&mut buf_reader, &mut request, read_timeout) => result?,
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                return Err(DictError::Server(
                    "shutting down before the request line arrived".to_string(),
                ));
            }
        };
        if read == 0 || !request.ends_with(b"\n") {
            return Err(DictError::Protocol(
                "connection closed before a complete request line".to_string(),
            ));
        }
        let line = String::from_utf8_lossy(&request);
        debug!("Got: {}", line.trim());

        let response = Self::process_line(&line, &store, mode).await?;
        debug!("Sending back {:?}", response);

        writer.write_all(&response.to_bytes()).await?;
        writer.flush().await?;
        writer.shutdown().await?;
        Ok(())
    }

    /// Parse and execute one request line
    async fn process_line(line: &str, store: &MemoryStore, mode: ParseMode) -> Result<Response> {
        let command = parse_command_with(line, mode);
        Self::execute_command(command, store).await
    }

    /// Execute a parsed command
    async fn execute_command(command: Command, store: &MemoryStore) -> Result<Response> {
        let values = match command {
            Command::Get { key } => store.get(&key).await?,
            Command::Put { key, value } => store.put(key, value).await?,
            Command::Delete { key, value } => store.delete(&key, &value).await?,
            Command::Invalid => Vec::new(),
        };
        Ok(Response::from_values(values))
    }

    /// Trigger graceful shutdown. Safe to call before `serve` starts.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Read one request line, up to and including the newline
async fn read_request<R>(
    reader: &mut R,
    request: &mut Vec<u8>,
    read_timeout: Option<Duration>,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let read = match read_timeout {
        Some(limit) => timeout(limit, reader.read_until(b'\n', request))
            .await
            .map_err(|_| DictError::Timeout(limit))??,
        None => reader.read_until(b'\n', request).await?,
    };
    Ok(read)
}

/// Resolves once shutdown has been requested, including before the call
pub(crate) async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    // An error means the server itself is gone, which is a shutdown too
    let _ = shutdown_rx.wait_for(|stopped| *stopped).await;
}
