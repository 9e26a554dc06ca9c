//! Client session handling.
//!
//! Each accepted connection gets a [`Session`] handle, kept in the
//! registry, and a socket task that serves the handshake and writes the
//! change notifications queued through the handle.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use livecast_protocol::{
    decode_client_message, decode_header, encode_server_message, ClientMessage, ErrorCode,
    ServerMessage, HEADER_SIZE, PROTOCOL_VERSION,
};

use super::registry::ClientSession;

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Waiting for hello.
    Initial,
    /// Handshake complete, notifications are forwarded.
    Ready,
}

/// Registry-side handle of a connected client.
///
/// Dropping the handle aborts the socket task and closes the connection.
pub struct Session {
    id: u32,
    addr: SocketAddr,
    alive: Arc<AtomicBool>,
    notifications: mpsc::UnboundedSender<ServerMessage>,
    task: JoinHandle<()>,
}

impl Session {
    /// Start serving an accepted connection.
    pub fn spawn(id: u32, socket: TcpStream, addr: SocketAddr) -> Self {
        let alive = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();

        let connection = Connection {
            id,
            socket,
            read_buf: BytesMut::with_capacity(4096),
            notifications: rx,
            state: SessionState::Initial,
        };
        let task_alive = Arc::clone(&alive);
        let task = tokio::spawn(async move {
            spawn_hostname_lookup(id, addr.ip());
            connection.run().await;
            task_alive.store(false, Ordering::Release);
        });

        Self {
            id,
            addr,
            alive,
            notifications: tx,
            task,
        }
    }

    fn notify(&self, msg: ServerMessage) {
        if self.notifications.send(msg).is_err() {
            trace!("[Session {}] notification dropped, connection gone", self.id);
        }
    }
}

impl ClientSession for Session {
    fn id(&self) -> u32 {
        self.id
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.task.is_finished()
    }

    fn on_channel_list_changed(&self) {
        self.notify(ServerMessage::ChannelListChanged);
    }

    fn on_recordings_changed(&self) {
        self.notify(ServerMessage::RecordingsChanged);
    }

    fn on_timers_changed(&self) {
        self.notify(ServerMessage::TimersChanged);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.task.abort();
        debug!("[Session {}] closed ({})", self.id, self.addr);
    }
}

/// Log the peer's host name once the reverse lookup completes.
fn spawn_hostname_lookup(id: u32, ip: IpAddr) {
    tokio::spawn(async move {
        match tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip)).await {
            Ok(Ok(hostname)) => info!("[Session {}] Client {} is {}", id, ip, hostname),
            Ok(Err(e)) => debug!("[Session {}] Reverse lookup of {} failed: {}", id, ip, e),
            Err(e) => debug!("[Session {}] Reverse lookup task failed: {}", id, e),
        }
    });
}

enum Event {
    Notification(Option<ServerMessage>),
    Read(std::io::Result<usize>),
}

/// Socket side of a session.
struct Connection {
    id: u32,
    socket: TcpStream,
    read_buf: BytesMut,
    notifications: mpsc::UnboundedReceiver<ServerMessage>,
    state: SessionState,
}

impl Connection {
    async fn run(mut self) {
        match self.serve().await {
            Ok(()) => info!("[Session {}] Connection closed", self.id),
            Err(e) => warn!("[Session {}] Connection error: {}", self.id, e),
        }
    }

    async fn serve(&mut self) -> std::io::Result<()> {
        let mut tmp_buf = [0u8; 4096];
        loop {
            while let Some(msg) = self.try_decode_message()? {
                self.handle_message(msg).await?;
            }

            let event = tokio::select! {
                biased;
                msg = self.notifications.recv() => Event::Notification(msg),
                result = self.socket.read(&mut tmp_buf) => Event::Read(result),
            };

            match event {
                Event::Notification(Some(msg)) => {
                    if self.state == SessionState::Ready {
                        self.send_message(msg).await?;
                    } else {
                        trace!("[Session {}] {:?} before hello, not sent", self.id, msg);
                    }
                }
                // Handle dropped
                Event::Notification(None) => return Ok(()),
                Event::Read(result) => {
                    let n = result?;
                    if n == 0 {
                        return Ok(());
                    }
                    self.read_buf.extend_from_slice(&tmp_buf[..n]);
                }
            }
        }
    }

    /// Try to decode a complete message from the buffer.
    ///
    /// A frame with an undecodable payload is skipped; a bad header ends the
    /// session.
    fn try_decode_message(&mut self) -> std::io::Result<Option<ClientMessage>> {
        loop {
            let header = match decode_header(&self.read_buf) {
                Ok(Some(header)) => header,
                Ok(None) => return Ok(None),
                Err(e) => {
                    error!("[Session {}] Protocol error: {}", self.id, e);
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()));
                }
            };

            let total_len = HEADER_SIZE + header.payload_len as usize;
            if self.read_buf.len() < total_len {
                return Ok(None);
            }

            self.read_buf.advance(HEADER_SIZE);
            let payload = self.read_buf.split_to(header.payload_len as usize).freeze();
            match decode_client_message(header.message_type, payload) {
                Ok(msg) => {
                    trace!("[Session {}] Received: {:?}", self.id, msg);
                    return Ok(Some(msg));
                }
                Err(e) => error!("[Session {}] Failed to decode message: {}", self.id, e),
            }
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) -> std::io::Result<()> {
        match msg {
            ClientMessage::Hello {
                version,
                client_name,
            } => self.handle_hello(version, &client_name).await,
            ClientMessage::Ping => self.send_message(ServerMessage::Pong).await,
        }
    }

    async fn handle_hello(&mut self, version: u16, client_name: &str) -> std::io::Result<()> {
        info!(
            "[Session {}] Client hello from '{}', version {}",
            self.id, client_name, version
        );

        let success = version == PROTOCOL_VERSION;
        self.send_message(ServerMessage::HelloAck {
            version: PROTOCOL_VERSION,
            session_id: self.id,
            success,
        })
        .await?;

        if success {
            self.state = SessionState::Ready;
            Ok(())
        } else {
            warn!(
                "[Session {}] Unsupported protocol version {} (server {})",
                self.id, version, PROTOCOL_VERSION
            );
            self.send_message(ServerMessage::Error {
                error_code: ErrorCode::VersionMismatch.into(),
                message: format!("unsupported protocol version {}", version),
            })
            .await
        }
    }

    async fn send_message(&mut self, msg: ServerMessage) -> std::io::Result<()> {
        let frame = encode_server_message(&msg)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        self.socket.write_all(&frame).await
    }
}

/// Client-side helpers shared by the server tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use bytes::Bytes;

    pub async fn send(stream: &mut TcpStream, msg: &ClientMessage) {
        let frame = livecast_protocol::encode_client_message(msg).unwrap();
        stream.write_all(&frame).await.unwrap();
    }

    pub async fn recv(stream: &mut TcpStream) -> ServerMessage {
        let mut header = [0u8; HEADER_SIZE];
        stream.read_exact(&mut header).await.unwrap();
        let header = decode_header(&header).unwrap().unwrap();
        let mut payload = vec![0u8; header.payload_len as usize];
        stream.read_exact(&mut payload).await.unwrap();
        livecast_protocol::decode_server_message(header.message_type, Bytes::from(payload)).unwrap()
    }

    pub fn hello() -> ClientMessage {
        ClientMessage::Hello {
            version: PROTOCOL_VERSION,
            client_name: "test-client".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{hello, recv, send};
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, addr) = listener.accept().await.unwrap();
        (client, server, addr)
    }

    async fn wait_dead(session: &Session) -> bool {
        for _ in 0..100 {
            if !session.is_alive() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_hello_ping_and_notifications() {
        let (mut client, server, addr) = connected_pair().await;
        let session = Session::spawn(7, server, addr);
        assert_eq!(session.id(), 7);

        send(&mut client, &hello()).await;
        assert_eq!(
            recv(&mut client).await,
            ServerMessage::HelloAck {
                version: PROTOCOL_VERSION,
                session_id: 7,
                success: true
            }
        );

        send(&mut client, &ClientMessage::Ping).await;
        assert_eq!(recv(&mut client).await, ServerMessage::Pong);

        session.on_channel_list_changed();
        session.on_recordings_changed();
        session.on_timers_changed();
        assert_eq!(recv(&mut client).await, ServerMessage::ChannelListChanged);
        assert_eq!(recv(&mut client).await, ServerMessage::RecordingsChanged);
        assert_eq!(recv(&mut client).await, ServerMessage::TimersChanged);
        assert!(session.is_alive());
    }

    #[tokio::test]
    async fn test_frames_sharing_one_read() {
        let (mut client, server, addr) = connected_pair().await;
        let _session = Session::spawn(5, server, addr);

        let mut frames = livecast_protocol::encode_client_message(&hello()).unwrap().to_vec();
        frames.extend_from_slice(&livecast_protocol::encode_client_message(&ClientMessage::Ping).unwrap());
        client.write_all(&frames).await.unwrap();

        assert!(matches!(recv(&mut client).await, ServerMessage::HelloAck { success: true, .. }));
        assert_eq!(recv(&mut client).await, ServerMessage::Pong);
    }

    #[tokio::test]
    async fn test_notifications_wait_for_handshake() {
        let (mut client, server, addr) = connected_pair().await;
        let session = Session::spawn(1, server, addr);

        session.on_timers_changed();
        send(&mut client, &hello()).await;
        assert!(matches!(recv(&mut client).await, ServerMessage::HelloAck { success: true, .. }));

        // The pre-handshake notification was discarded
        send(&mut client, &ClientMessage::Ping).await;
        assert_eq!(recv(&mut client).await, ServerMessage::Pong);
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (mut client, server, addr) = connected_pair().await;
        let _session = Session::spawn(2, server, addr);

        send(
            &mut client,
            &ClientMessage::Hello {
                version: PROTOCOL_VERSION + 1,
                client_name: "future".to_string(),
            },
        )
        .await;
        assert!(matches!(recv(&mut client).await, ServerMessage::HelloAck { success: false, .. }));
        assert!(matches!(
            recv(&mut client).await,
            ServerMessage::Error { error_code, .. } if error_code == u16::from(ErrorCode::VersionMismatch)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_clears_liveness() {
        let (client, server, addr) = connected_pair().await;
        let session = Session::spawn(3, server, addr);
        drop(client);
        assert!(wait_dead(&session).await);
    }

    #[tokio::test]
    async fn test_bad_magic_closes_connection() {
        let (mut client, server, addr) = connected_pair().await;
        let session = Session::spawn(4, server, addr);
        client.write_all(b"HTTP/1.1 GET /").await.unwrap();
        assert!(wait_dead(&session).await);
    }
}
