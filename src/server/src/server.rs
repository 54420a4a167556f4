use std::env;
use std::io;
use std::sync::Arc;
use log::info;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use repl::{ReplConfig, ReplManager};
use storage::{SegmentMgr, StorageConfig};

use crate::error::ServerError;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "2112";

/// Longest accepted verb line
const MAX_COMMAND_LINE: usize = 1024;

/// Replication listener: accepts slave connections, reads the verb line
/// and hands the socket to the replication manager.
pub struct Server {
    manager: Arc<ReplManager>,
    segments: Arc<SegmentMgr>,
    host: String,
    port: u16,
}

impl Server {
    pub fn new() -> Result<Self, ServerError> {
        let host = env::var("FLUX_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port_str = env::var("FLUX_REPL_PORT").unwrap_or_else(|_| DEFAULT_PORT.to_string());
        let port = port_str
            .parse::<u16>()
            .map_err(|e| ServerError::InvalidPort(format!("{}: {}", port_str, e)))?;

        let storage_config = StorageConfig::from_env();
        info!(
            "Opening {} store instances under {}",
            storage_config.instance_num, storage_config.data_dir
        );
        let segments = Arc::new(SegmentMgr::open(&storage_config)?);
        let manager = Arc::new(ReplManager::new(ReplConfig::from_env(), Arc::clone(&segments)));

        Ok(Server {
            manager,
            segments,
            host,
            port,
        })
    }

    pub fn manager(&self) -> &Arc<ReplManager> {
        &self.manager
    }

    pub fn segments(&self) -> &Arc<SegmentMgr> {
        &self.segments
    }

    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr).await?;

        info!("FLUX replication master is running on {} ...", addr);
        Arc::clone(&self.manager).start();

        // Shutdown broadcast channel
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        // Spawn signal handler
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                info!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Received shutdown signal, stopping server...");
            let _ = shutdown_tx_clone.send(());
        });

        loop {
            let mut shutdown_rx = shutdown_tx.subscribe();

            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let manager = Arc::clone(&self.manager);

                            info!("New replication connection from {}", peer_addr);

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, manager).await {
                                    info!("Connection closed from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            info!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    self.manager.stop();
                    self.segments.stop_all();
                    info!("FLUX server stopped");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    manager: Arc<ReplManager>,
) -> io::Result<()> {
    let line = read_command_line(&mut stream).await?;
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.len() == 2 && parts[0].eq_ignore_ascii_case("FULLSYNC") {
        manager.supply_full_sync(stream, parts[1]).await;
    } else if parts.len() == 4 && parts[0].eq_ignore_ascii_case("INCRSYNC") {
        manager
            .register_incr_sync(stream, parts[1], parts[2], parts[3])
            .await;
    } else {
        info!("Unknown replication command: {}", line);
        stream.write_all(b"-ERR unknown command\r\n").await?;
    }

    Ok(())
}

/// Read the CRLF verb line byte-wise, leaving the stream otherwise
/// untouched so it can be handed to the replication manager.
async fn read_command_line(stream: &mut TcpStream) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_COMMAND_LINE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "command line too long",
            ));
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "command line is not utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    async fn setup(dir: &str) -> (Arc<ReplManager>, TcpStream, tokio::task::JoinHandle<()>) {
        let _ = fs::remove_dir_all(dir);
        let config = StorageConfig {
            data_dir: dir.to_string(),
            instance_num: 2,
        };
        let segments = Arc::new(SegmentMgr::open(&config).unwrap());
        let manager = Arc::new(ReplManager::new(ReplConfig::default(), segments));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mgr = Arc::clone(&manager);
        let handle = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let _ = handle_connection(sock, mgr).await;
        });
        let client = TcpStream::connect(addr).await.unwrap();
        (manager, client, handle)
    }

    async fn read_reply_line(stream: &mut TcpStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_command_rejected() {
        let dir = "/tmp/test_flux_server_unknown";
        let (_manager, mut client, handle) = setup(dir).await;

        client.write_all(b"BOGUS 1 2 3\r\n").await.unwrap();
        assert_eq!(read_reply_line(&mut client).await, "-ERR unknown command");
        handle.await.unwrap();

        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_incrsync_verb_routes_to_handshake() {
        let dir = "/tmp/test_flux_server_incrsync";
        let (manager, mut client, handle) = setup(dir).await;

        client.write_all(b"INCRSYNC 0 0 0\r\n").await.unwrap();
        assert_eq!(read_reply_line(&mut client).await, "+OK");
        client.write_all(b"+PONG\r\n").await.unwrap();
        handle.await.unwrap();

        assert_eq!(manager.replicas(0).len(), 1);

        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_fullsync_verb_routes_to_supplier() {
        let dir = "/tmp/test_flux_server_fullsync";
        let (_manager, mut client, handle) = setup(dir).await;

        client.write_all(b"FULLSYNC 0\r\n").await.unwrap();
        handle.await.unwrap();

        // manifest line proves the supplier took the socket
        let manifest = read_reply_line(&mut client).await;
        assert!(manifest.starts_with('{'), "got {:?}", manifest);

        fs::remove_dir_all(dir).unwrap();
    }
}
