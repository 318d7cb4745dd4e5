//! An RFC 1350 TFTP client and concurrent server.
//!
//! The crate is organised around the session layer: a per-transfer state
//! machine ([`Session`]) drives the lock-step DATA/ACK protocol over UDP
//! with timeout-and-retransmit recovery, transfer-id validation, and
//! streaming netascii translation. A [`Server`] dispatches initial
//! requests into concurrent sessions; [`run_client`] performs a single
//! transfer.

pub mod block;
pub mod client;
pub mod error;
pub mod file;
pub mod netascii;
pub mod protocol;
pub mod server;
pub mod session;

pub use block::BlockNumber;
pub use client::{ClientConfig, Direction, run_client};
pub use error::TftpError;
pub use protocol::{ErrorCode, MAX_DATA_LEN, MAX_DATAGRAM_LEN, Opcode, Packet, TransferMode};
pub use server::{Server, ServerConfig, run_server};
pub use session::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_SERVER_PORT, DEFAULT_TIMEOUT_MS, Role, Session, SessionConfig,
};
