//! The server dispatcher.
//!
//! The dispatcher owns the welcome socket on the well-known port. It only
//! ever accepts initial RRQ/WRQ datagrams: each accepted request is handed
//! to a freshly spawned [`Session`] task with its own ephemeral socket,
//! and all further traffic for that transfer bypasses the welcome socket
//! entirely.
//!
//! The active-session list lives on the dispatcher task alone. Sessions
//! share exactly one datum with it, the end-of-life flag, which is why an
//! `AtomicBool` suffices and no lock is needed.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::UdpSocket;

use crate::error::TftpError;
use crate::protocol::{ErrorCode, MAX_DATAGRAM_LEN, Packet};
use crate::session::{DEFAULT_SERVER_PORT, Role, Session, SessionConfig, send_error};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the welcome socket binds to.
    pub port: u16,
    /// Tunables inherited by every spawned session.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
            session: SessionConfig::default(),
        }
    }
}

/// One entry in the dispatcher's active-session list.
struct ActiveSession {
    /// The client's address and transfer id.
    peer: SocketAddr,
    /// Written once by the session task at end-of-life.
    active: Arc<AtomicBool>,
}

/// The TFTP server: a welcome socket plus the sessions spawned from it.
pub struct Server {
    socket: UdpSocket,
    cfg: ServerConfig,
    sessions: Vec<ActiveSession>,
}

impl Server {
    /// Bind the welcome socket. Binding is separate from serving so
    /// callers (and tests) can learn the bound address first.
    pub async fn bind(cfg: ServerConfig) -> Result<Self, TftpError> {
        let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, cfg.port).into();
        let socket = UdpSocket::bind(bind_addr).await?;
        tracing::info!("listening on port {}", socket.local_addr()?.port());
        Ok(Self {
            socket,
            cfg,
            sessions: Vec::new(),
        })
    }

    /// The address the welcome socket is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Accept initial requests forever.
    ///
    /// Peer-caused faults (malformed datagrams, wrong opcodes, transfer-id
    /// clashes) are answered with an ERROR and never terminate the loop.
    pub async fn serve(mut self) -> Result<(), TftpError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let (len, src) = self.socket.recv_from(&mut buf).await?;
            self.accept(&buf[..len], src).await;
        }
    }

    async fn accept(&mut self, datagram: &[u8], src: SocketAddr) {
        // Finished sessions drop out of the list before the clash check.
        self.sessions.retain(|session| session.active.load(Ordering::Acquire));

        if self.sessions.iter().any(|session| session.peer == src) {
            tracing::warn!("address-TID pair clashing request from '{src}'; replying with ERROR");
            send_error(&self.socket, src, ErrorCode::NotDefined, "").await;
            return;
        }

        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::warn!("undecodable datagram from {src}: {err}");
                send_error(&self.socket, src, ErrorCode::NotDefined, "").await;
                return;
            }
        };

        let (role, filename, mode) = match packet {
            Packet::ReadRequest { filename, mode } => (Role::ReadLocal, filename, mode),
            Packet::WriteRequest { filename, mode } => (Role::WriteLocal, filename, mode),
            other => {
                tracing::warn!("{} packet from {src} is not a request; replying with ERROR", other.opcode());
                send_error(&self.socket, src, ErrorCode::IllegalOperation, "illegal operation").await;
                return;
            }
        };

        tracing::info!("communicating with client at '{src}'");
        let session = Session::server(role, filename, mode, src, self.cfg.session.clone());
        let active = session.active_flag();
        tokio::spawn(session.run());
        self.sessions.push(ActiveSession { peer: src, active });
    }
}

/// Bind and serve with the given configuration.
pub async fn run_server(cfg: ServerConfig) -> Result<(), TftpError> {
    Server::bind(cfg).await?.serve().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 69);
        assert_eq!(cfg.session.max_attempts, 3);
    }

    #[tokio::test]
    async fn binds_to_an_ephemeral_port() {
        let server = Server::bind(ServerConfig {
            port: 0,
            session: SessionConfig::default(),
        })
        .await
        .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }
}
