//! The per-transfer session state machine.
//!
//! One session drives one file transfer end-to-end over its own ephemeral
//! socket: the lock-step DATA/ACK exchange, timeout-and-retransmit
//! recovery, duplicate detection, and transfer-id validation. The same
//! state machine serves all four flavours (client/server crossed with
//! read/write); the two sides differ only in how the session begins and in
//! whether the peer's transfer id is known up front.
//!
//! A session owns exactly two resources, its socket and its local file,
//! and releases both on every exit path. The only suspension point is the
//! timed receive; file I/O and translation are nonblocking with respect to
//! the protocol.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::block::BlockNumber;
use crate::error::TftpError;
use crate::file::{LocalReader, LocalWriter};
use crate::protocol::{ErrorCode, MAX_DATA_LEN, MAX_DATAGRAM_LEN, Packet, TransferMode};

/// Well-known port a TFTP server accepts initial requests on.
pub const DEFAULT_SERVER_PORT: u16 = 69;

/// Default receive timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default maximum number of attempts for a single operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Tunables shared by every session of a process.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Receive deadline; also the retransmission interval.
    pub timeout: Duration,
    /// Maximum attempts per operation. Both the timeout counter and the
    /// duplicate-triggered resend counter are bounded by this, counting
    /// n - 1 retries between n attempts.
    pub max_attempts: u32,
    /// Include error text in outgoing ERROR packets. Off by default so
    /// local failure details are not leaked to peers.
    pub error_message_delivery: bool,
    /// Silence the per-block send/acknowledge log lines.
    pub disable_block_messages: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            error_message_delivery: false,
            disable_block_messages: false,
        }
    }
}

/// Which side of the transfer this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Reads the local file and sends DATA packets (server answering an
    /// RRQ, or client performing a put).
    ReadLocal,
    /// Writes the local file from received DATA packets (server answering
    /// a WRQ, or client performing a get).
    WriteLocal,
}

/// Whether the session was started by a dispatcher or a client entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// A single transfer in progress.
pub struct Session {
    side: Side,
    role: Role,
    cfg: SessionConfig,

    /// The bound remote endpoint. For a server session this is the request
    /// source; for a client it starts as the server's well-known endpoint
    /// and is rebound to the server's ephemeral port on the first reply.
    peer: SocketAddr,
    peer_bound: bool,

    local_file: PathBuf,
    /// Filename named in the request packet. Equal to the local path on
    /// the server side.
    remote_file: String,
    /// Requested mode string; validated when the session begins so an
    /// unsupported mode is answered with an ERROR packet.
    mode: String,

    block: BlockNumber,
    last_sent: Vec<u8>,
    /// Size of the most recent block read from the local file; `None`
    /// marks the final terminator read.
    last_payload_len: Option<usize>,
    /// Ensures a zero-length file still yields one empty DATA block.
    has_read_once: bool,

    resend_count: u32,
    timeout_count: u32,

    reader: Option<LocalReader>,
    writer: Option<LocalWriter>,

    own_tid: u16,
    active: Arc<AtomicBool>,
}

impl Session {
    /// Build a server-side session for an accepted request.
    ///
    /// `role` derives from the request opcode (RRQ reads local, WRQ writes
    /// local); `source` is the client's address and transfer id, bound
    /// from the start.
    pub fn server(
        role: Role,
        filename: String,
        mode: String,
        source: SocketAddr,
        cfg: SessionConfig,
    ) -> Self {
        Self::new(Side::Server, role, PathBuf::from(&filename), filename, mode, source, true, cfg)
    }

    /// Build a client-side session targeting `server`.
    ///
    /// The peer transfer id is not yet known; it binds when the first
    /// reply arrives.
    pub fn client(
        server: SocketAddr,
        role: Role,
        local_file: PathBuf,
        remote_file: String,
        mode: TransferMode,
        cfg: SessionConfig,
    ) -> Self {
        Self::new(
            Side::Client,
            role,
            local_file,
            remote_file,
            mode.as_str().to_string(),
            server,
            false,
            cfg,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        side: Side,
        role: Role,
        local_file: PathBuf,
        remote_file: String,
        mode: String,
        peer: SocketAddr,
        peer_bound: bool,
        cfg: SessionConfig,
    ) -> Self {
        Self {
            side,
            role,
            cfg,
            peer,
            peer_bound,
            local_file,
            remote_file,
            mode,
            block: BlockNumber::default(),
            last_sent: Vec::new(),
            last_payload_len: None,
            has_read_once: false,
            resend_count: 0,
            timeout_count: 0,
            reader: None,
            writer: None,
            own_tid: 0,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Lifecycle flag read by the dispatcher to garbage-collect finished
    /// sessions. The session stores `false` exactly once, at end-of-life.
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn set_inactive(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Run the transfer to completion or bounded failure.
    ///
    /// Faults are handled at this level: an ERROR packet is built and sent
    /// best-effort, and every exit path releases the socket and file.
    pub async fn run(mut self) {
        match self.open_socket().await {
            Ok(socket) => {
                if let Err(err) = self.drive(&socket).await {
                    self.report_error(&socket, &err).await;
                }
                drop(socket);
                tracing::info!(tid = self.own_tid, "socket closed");
            }
            Err(err) => {
                tracing::error!("failed to open session socket: {err}");
            }
        }
        self.close_files();
        self.set_inactive();
        tracing::info!(tid = self.own_tid, "session ended");
    }

    /// Bind the session's own ephemeral socket; its port is this side's
    /// transfer id.
    async fn open_socket(&mut self) -> Result<UdpSocket, TftpError> {
        let bind_addr: SocketAddr = match self.peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        self.own_tid = socket.local_addr()?.port();
        tracing::info!(tid = self.own_tid, "local socket open on port {}", self.own_tid);
        Ok(socket)
    }

    async fn drive(&mut self, socket: &UdpSocket) -> Result<(), TftpError> {
        self.begin(socket).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        while self.is_active() {
            match timeout(self.cfg.timeout, socket.recv_from(&mut buf)).await {
                Err(_elapsed) => self.handle_timeout(socket).await?,
                Ok(received) => {
                    let (len, src) = received?;
                    if self.peer_bound && src != self.peer {
                        self.reject_stranger(socket, src).await;
                        continue;
                    }
                    if !self.peer_bound {
                        self.peer = src;
                        self.peer_bound = true;
                        tracing::info!(
                            tid = self.own_tid,
                            "switching to server transfer port {}",
                            src.port()
                        );
                    }
                    let packet = Packet::decode(&buf[..len])?;
                    self.dispatch(socket, packet).await?;
                    self.timeout_count = 0;
                }
            }
        }
        Ok(())
    }

    /// Open the local file and issue this side's opening packet.
    async fn begin(&mut self, socket: &UdpSocket) -> Result<(), TftpError> {
        let mode = TransferMode::from_str_opt(&self.mode)
            .ok_or_else(|| TftpError::UnsupportedMode(self.mode.clone()))?;

        match (self.side, self.role) {
            (Side::Server, Role::ReadLocal) => {
                tracing::info!(
                    tid = self.own_tid,
                    "client requested read from local file '{}' with mode '{mode}'",
                    self.local_file.display()
                );
                self.reader = Some(LocalReader::open(mode, &self.local_file)?);
                // Answer the RRQ immediately with the first data block.
                self.advance_read(socket).await
            }
            (Side::Server, Role::WriteLocal) => {
                tracing::info!(
                    tid = self.own_tid,
                    "client requested write to local file '{}' with mode '{mode}'",
                    self.local_file.display()
                );
                self.writer = Some(LocalWriter::create(mode, &self.local_file)?);
                // ACK with block 0 confirms the write request.
                if !self.cfg.disable_block_messages {
                    tracing::info!(tid = self.own_tid, "sending initial acknowledgement");
                }
                self.transmit(socket, &Packet::Acknowledgment { block: self.block }).await
            }
            (Side::Client, Role::WriteLocal) => {
                self.writer = Some(LocalWriter::create(mode, &self.local_file)?);
                let request = Packet::ReadRequest {
                    filename: self.remote_file.clone(),
                    mode: self.mode.clone(),
                };
                self.transmit(socket, &request).await?;
                tracing::info!(
                    tid = self.own_tid,
                    "requested read from remote file '{}' with mode '{mode}'",
                    self.remote_file
                );
                Ok(())
            }
            (Side::Client, Role::ReadLocal) => {
                self.reader = Some(LocalReader::open(mode, &self.local_file)?);
                let request = Packet::WriteRequest {
                    filename: self.remote_file.clone(),
                    mode: self.mode.clone(),
                };
                self.transmit(socket, &request).await?;
                tracing::info!(
                    tid = self.own_tid,
                    "requested write to remote file '{}' with mode '{mode}'",
                    self.remote_file
                );
                Ok(())
            }
        }
    }

    async fn dispatch(&mut self, socket: &UdpSocket, packet: Packet) -> Result<(), TftpError> {
        match packet {
            Packet::Data { block, payload } => {
                if self.role != Role::WriteLocal {
                    return Err(TftpError::UnexpectedData);
                }
                self.handle_data(socket, block, payload).await
            }
            Packet::Acknowledgment { block } => {
                if self.role != Role::ReadLocal {
                    return Err(TftpError::UnexpectedAck);
                }
                self.handle_ack(socket, block).await
            }
            Packet::Error { code, message } => {
                tracing::warn!(
                    tid = self.own_tid,
                    "peer error {}: '{message}'; terminating",
                    code.as_u16()
                );
                self.set_inactive();
                Ok(())
            }
            Packet::ReadRequest { .. } | Packet::WriteRequest { .. } => Err(TftpError::Malformed(
                "request packet inside an established session".to_string(),
            )),
        }
    }

    /// An ACK either advances the transfer (same block number), calls for
    /// a resend (previous block number), or is out of order.
    async fn handle_ack(&mut self, socket: &UdpSocket, block: BlockNumber) -> Result<(), TftpError> {
        if block.is_next(self.block) {
            // ACK for the previous block: the peer wants the current DATA
            // again.
            if self.budget_spent() {
                return Ok(());
            }
            if !self.cfg.disable_block_messages {
                tracing::info!(tid = self.own_tid, "resending block {}", self.block);
            }
            return self.resend(socket).await;
        }
        if block != self.block {
            return Err(TftpError::OutOfOrder);
        }
        self.resend_count = 0;
        self.advance_read(socket).await
    }

    /// Read the next block and send it, or complete the transfer when the
    /// file reports final exhaustion.
    async fn advance_read(&mut self, socket: &UdpSocket) -> Result<(), TftpError> {
        let payload = self.next_payload()?;
        self.block.increment();
        match payload {
            None => {
                self.set_inactive();
                tracing::info!(tid = self.own_tid, "read completed");
                Ok(())
            }
            Some(payload) => {
                if !self.cfg.disable_block_messages {
                    tracing::info!(
                        tid = self.own_tid,
                        "sending block {} ({}B)",
                        self.block,
                        payload.len()
                    );
                }
                self.transmit(socket, &Packet::Data { block: self.block, payload }).await
            }
        }
    }

    /// Fetch the next DATA payload from the local file.
    ///
    /// `None` means the transfer is complete. A file whose length is a
    /// multiple of the block size (including an empty file) yields one
    /// final empty payload before completion, so the last DATA on the wire
    /// is always shorter than a full block.
    fn next_payload(&mut self) -> Result<Option<Vec<u8>>, TftpError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| TftpError::Malformed("session has no open reader".to_string()))?;
        match reader.read_block(MAX_DATA_LEN)? {
            Some(payload) => {
                self.has_read_once = true;
                self.last_payload_len = Some(payload.len());
                Ok(Some(payload))
            }
            None => {
                if self.has_read_once && self.last_payload_len != Some(MAX_DATA_LEN) {
                    // The previous block was already short: nothing more
                    // to announce.
                    self.last_payload_len = None;
                    Ok(None)
                } else {
                    // Block-aligned file (or empty file): one empty DATA
                    // block marks the end.
                    self.has_read_once = true;
                    self.last_payload_len = Some(0);
                    Ok(Some(Vec::new()))
                }
            }
        }
    }

    /// A DATA packet either carries the next block (write it, ACK it), a
    /// duplicate of the current block (re-ACK without rewriting), or is
    /// out of order.
    async fn handle_data(
        &mut self,
        socket: &UdpSocket,
        block: BlockNumber,
        payload: Vec<u8>,
    ) -> Result<(), TftpError> {
        if block == self.block {
            // Already written; the ACK must have been lost.
            if self.budget_spent() {
                return Ok(());
            }
            self.send_ack(socket, payload.len()).await?;
            if payload.len() < MAX_DATA_LEN {
                self.complete_write();
            }
            return Ok(());
        }
        if !self.block.is_next(block) {
            return Err(TftpError::OutOfOrder);
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TftpError::Malformed("session has no open writer".to_string()))?;
        writer.write_block(&payload)?;
        self.block.increment();
        self.resend_count = 0;

        self.send_ack(socket, payload.len()).await?;

        // A short block ends the transfer; no dallying after the last ACK.
        if payload.len() < MAX_DATA_LEN {
            self.complete_write();
        }
        Ok(())
    }

    fn complete_write(&mut self) {
        self.set_inactive();
        tracing::info!(tid = self.own_tid, "write completed");
    }

    async fn send_ack(&mut self, socket: &UdpSocket, payload_len: usize) -> Result<(), TftpError> {
        if !self.cfg.disable_block_messages {
            tracing::info!(
                tid = self.own_tid,
                "acknowledging block {} ({payload_len}B)",
                self.block
            );
        }
        self.transmit(socket, &Packet::Acknowledgment { block: self.block }).await
    }

    /// Account one duplicate-triggered resend against the attempt budget.
    /// Returns true when the budget is exhausted and the session has been
    /// terminated.
    fn budget_spent(&mut self) -> bool {
        self.resend_count += 1;
        if self.resend_count > self.cfg.max_attempts.saturating_sub(1) {
            self.set_inactive();
            tracing::warn!(tid = self.own_tid, "maximum operation attempts reached; terminating");
            return true;
        }
        false
    }

    /// Receive deadline expired: resend the last outgoing datagram, or
    /// give up once the attempt budget is spent. No ERROR is sent; the
    /// peer is presumed gone.
    async fn handle_timeout(&mut self, socket: &UdpSocket) -> Result<(), TftpError> {
        self.timeout_count += 1;
        if self.timeout_count > self.cfg.max_attempts.saturating_sub(1) {
            self.set_inactive();
            tracing::warn!(tid = self.own_tid, "maximum operation attempts reached; terminating");
            return Ok(());
        }
        tracing::info!(tid = self.own_tid, "timeout; resending last outgoing packet");
        self.resend(socket).await
    }

    /// Encode, send, and remember a packet for retransmission.
    async fn transmit(&mut self, socket: &UdpSocket, packet: &Packet) -> Result<(), TftpError> {
        let bytes = packet.encode()?;
        socket.send_to(&bytes, self.peer).await?;
        self.last_sent = bytes;
        Ok(())
    }

    /// Resend the exact bytes of the last outgoing datagram.
    async fn resend(&self, socket: &UdpSocket) -> Result<(), TftpError> {
        socket.send_to(&self.last_sent, self.peer).await?;
        Ok(())
    }

    /// Datagram from an endpoint other than the bound peer: tell the
    /// stranger off with an ERROR and keep waiting. Session state, and in
    /// particular the retransmission buffer, is untouched.
    async fn reject_stranger(&self, socket: &UdpSocket, src: SocketAddr) {
        tracing::warn!(
            tid = self.own_tid,
            "datagram from unexpected endpoint {src}; replying with ERROR"
        );
        send_error(socket, src, ErrorCode::NotDefined, "").await;
    }

    /// Convert a session fault into an ERROR packet and deliver it
    /// best-effort. The full message is always logged locally; it goes on
    /// the wire only when error message delivery was enabled.
    async fn report_error(&mut self, socket: &UdpSocket, err: &TftpError) {
        tracing::error!(tid = self.own_tid, "{err}");
        let message = if self.cfg.error_message_delivery {
            err.to_string()
        } else {
            String::new()
        };
        let packet = Packet::Error {
            code: err.wire_code(),
            message,
        };
        match packet.encode() {
            Ok(bytes) => match socket.send_to(&bytes, self.peer).await {
                Ok(_) => tracing::info!(tid = self.own_tid, "ERROR packet sent"),
                Err(send_err) => {
                    tracing::error!(tid = self.own_tid, "ERROR packet not deliverable: {send_err}");
                }
            },
            Err(build_err) => {
                tracing::error!(tid = self.own_tid, "could not build ERROR packet: {build_err}");
            }
        }
    }

    /// Release the local file. The writer flush is best-effort: a failure
    /// here is logged, since the session is already terminating.
    fn close_files(&mut self) {
        if self.reader.take().is_some() {
            tracing::info!(
                tid = self.own_tid,
                "local read file '{}' closed",
                self.local_file.display()
            );
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.finish() {
                tracing::error!(
                    tid = self.own_tid,
                    "failed to flush local write file '{}': {err}",
                    self.local_file.display()
                );
            }
            tracing::info!(
                tid = self.own_tid,
                "local write file '{}' closed",
                self.local_file.display()
            );
        }
    }
}

/// Send an ERROR packet best-effort, outside any session state.
///
/// Used for transfer-id rejections, where the reply must not disturb the
/// ongoing transfer (or, on the dispatcher, where no session exists yet).
pub(crate) async fn send_error(socket: &UdpSocket, dest: SocketAddr, code: ErrorCode, message: &str) {
    let packet = Packet::Error {
        code,
        message: message.to_string(),
    };
    match packet.encode() {
        Ok(bytes) => {
            if let Err(err) = socket.send_to(&bytes, dest).await {
                tracing::error!("ERROR packet to {dest} not deliverable: {err}");
            }
        }
        Err(err) => tracing::error!("could not build ERROR packet: {err}"),
    }
}
