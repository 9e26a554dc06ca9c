//! TCP listener for accepting client connections.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use super::access::AllowedHosts;
use super::housekeeping::Housekeeper;
use super::registry::SessionRegistry;
use super::session::Session;
use crate::host::HostContext;

/// How long one accept wait may block before housekeeping runs.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_millis(250);

const LISTEN_BACKLOG: i32 = 10;
const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
#[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd"))]
const KEEPALIVE_RETRIES: u32 = 5;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Directory holding the access list.
    pub config_dir: PathBuf,
}

/// The session server: accepts clients and keeps them informed.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    registry: SessionRegistry,
    housekeeper: Housekeeper,
}

impl Server {
    /// Open the listening socket. Must be called within a tokio runtime.
    pub fn bind(config: ServerConfig, host: HostContext) -> Result<Self, ServerError> {
        let addr = config.listen_addr;
        let listener = listen(addr).map_err(|source| ServerError::Bind { addr, source })?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Self {
            config,
            listener,
            registry: SessionRegistry::new(),
            housekeeper: Housekeeper::new(host),
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until `stop` turns true, then drop every session.
    pub async fn run(mut self, stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                break;
            }

            match tokio::time::timeout(ACCEPT_TIMEOUT, self.listener.accept()).await {
                Ok(Ok((socket, addr))) => self.accept_connection(socket, addr).await,
                Ok(Err(e)) => error!("Failed to accept connection: {}", e),
                Err(_) => {
                    self.housekeeper.tick(&mut self.registry, Instant::now());
                }
            }
        }

        info!("Server stopping, closing {} sessions", self.registry.len());
        self.registry.clear();
    }

    async fn accept_connection(&mut self, socket: TcpStream, addr: SocketAddr) {
        let hosts = self.load_access_list().await;
        if !hosts.is_acceptable(addr.ip()) {
            match hosts.source() {
                Some(path) => warn!("Connection from {} refused, not in {}", addr, path.display()),
                None => warn!("Connection from {} refused, only 127.0.0.1 allowed", addr),
            }
            return;
        }

        if let Err(e) = configure_socket(&socket) {
            error!("Failed to set up connection from {}: {}", addr, e);
            return;
        }

        let id = self.registry.next_id();
        info!("[Session {}] New connection from {}", id, addr);
        self.registry.insert(Box::new(Session::spawn(id, socket, addr)));
    }

    /// Re-read the access list for every connection, off the runtime threads.
    async fn load_access_list(&self) -> AllowedHosts {
        let config_dir = self.config.config_dir.clone();
        match tokio::task::spawn_blocking(move || AllowedHosts::load(&config_dir)).await {
            Ok(hosts) => hosts,
            Err(e) => {
                error!("Access list task failed: {}", e);
                AllowedHosts::localhost_only()
            }
        }
    }
}

fn listen(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

fn configure_socket(socket: &TcpStream) -> std::io::Result<()> {
    // Disable Nagle's algorithm for lower latency
    socket.set_nodelay(true)?;

    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL);
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd"))]
    let keepalive = keepalive.with_retries(KEEPALIVE_RETRIES);

    SockRef::from(socket).set_tcp_keepalive(&keepalive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::ChannelDirectory;
    use crate::host::{InactivityTracker, StateCounter};
    use crate::server::access::ALLOWED_HOSTS_FILE;
    use crate::server::session::testing::{hello, recv, send};
    use livecast_protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    struct Running {
        addr: SocketAddr,
        timers: Arc<StateCounter>,
        hooks: Arc<InactivityTracker>,
        stop: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
        config_dir: tempfile::TempDir,
    }

    fn start(allowed: &str) -> Running {
        let config_dir = tempfile::tempdir().unwrap();
        std::fs::write(config_dir.path().join(ALLOWED_HOSTS_FILE), allowed).unwrap();

        let timers = Arc::new(StateCounter::new());
        let hooks = Arc::new(InactivityTracker::new());
        let host = HostContext {
            directory: Arc::new(ChannelDirectory::new(Vec::new())),
            recordings: Arc::new(StateCounter::new()),
            timers: timers.clone(),
            hooks: hooks.clone(),
        };
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            config_dir: config_dir.path().to_path_buf(),
        };

        let server = Server::bind(config, host).unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(server.run(stop_rx));
        Running {
            addr,
            timers,
            hooks,
            stop,
            task,
            config_dir,
        }
    }

    #[tokio::test]
    async fn test_client_handshake_and_notification() {
        let server = start("127.0.0.1\n");
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        send(&mut client, &hello()).await;
        assert_eq!(
            recv(&mut client).await,
            ServerMessage::HelloAck {
                version: PROTOCOL_VERSION,
                session_id: 1,
                success: true
            }
        );

        server.timers.bump();
        let msg = tokio::time::timeout(Duration::from_secs(5), recv(&mut client))
            .await
            .unwrap();
        assert_eq!(msg, ServerMessage::TimersChanged);
        assert!(server.hooks.reset_count() > 0);

        send(&mut client, &ClientMessage::Ping).await;
        assert_eq!(recv(&mut client).await, ServerMessage::Pong);

        server.stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server.task)
            .await
            .unwrap()
            .unwrap();

        // Sessions are closed on shutdown
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_refused_peer_is_disconnected() {
        let server = start("10.0.0.0/8\n");
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        // A refused peer never counts as a session
        tokio::time::sleep(ACCEPT_TIMEOUT * 2).await;
        assert_eq!(server.hooks.reset_count(), 0);
    }

    #[tokio::test]
    async fn test_accepted_socket_options() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (socket, _) = listener.accept().await.unwrap();

        configure_socket(&socket).unwrap();

        let sock = SockRef::from(&socket);
        assert!(sock.nodelay().unwrap());
        assert!(sock.keepalive().unwrap());
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd"))]
        {
            assert_eq!(sock.keepalive_time().unwrap(), KEEPALIVE_IDLE);
            assert_eq!(sock.keepalive_interval().unwrap(), KEEPALIVE_INTERVAL);
            assert_eq!(sock.keepalive_retries().unwrap(), KEEPALIVE_RETRIES);
        }
    }

    #[tokio::test]
    async fn test_access_list_reread_per_connection() {
        let server = start("10.0.0.0/8\n");
        std::fs::write(server.config_dir.path().join(ALLOWED_HOSTS_FILE), "127.0.0.1\n").unwrap();

        let mut client = TcpStream::connect(server.addr).await.unwrap();
        send(&mut client, &hello()).await;
        let msg = tokio::time::timeout(Duration::from_secs(5), recv(&mut client))
            .await
            .unwrap();
        assert!(matches!(msg, ServerMessage::HelloAck { success: true, .. }));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ServerConfig {
            listen_addr: taken.local_addr().unwrap(),
            config_dir: PathBuf::from("."),
        };
        let host = HostContext {
            directory: Arc::new(ChannelDirectory::new(Vec::new())),
            recordings: Arc::new(StateCounter::new()),
            timers: Arc::new(StateCounter::new()),
            hooks: Arc::new(InactivityTracker::new()),
        };

        match Server::bind(config, host) {
            Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, taken.local_addr().unwrap()),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("bind should fail"),
        }
    }
}
