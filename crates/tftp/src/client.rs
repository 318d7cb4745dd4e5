//! The client entry point: one request, one session.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tokio::net::lookup_host;

use crate::error::TftpError;
use crate::protocol::TransferMode;
use crate::session::{Role, Session, SessionConfig};

/// Transfer direction from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read a remote file into a local one (RRQ).
    Get,
    /// Write a local file to a remote one (WRQ).
    Put,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "put" => Ok(Self::Put),
            _ => Err("invalid request type (should be either 'get' or 'put')".to_string()),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Put => write!(f, "put"),
        }
    }
}

/// Everything a single client transfer needs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server hostname or address.
    pub host: String,
    /// Server port the initial request is sent to.
    pub port: u16,
    pub direction: Direction,
    /// `get`: the remote file; `put`: the local file.
    pub source: String,
    /// `get`: the local file; `put`: the remote file.
    pub destination: String,
    pub mode: TransferMode,
    pub session: SessionConfig,
}

/// Validate local preconditions, then run one transfer session.
///
/// The file checks come first so a doomed request never opens a socket: a
/// `get` must not clobber an existing local file, and a `put` must have
/// something to send.
pub async fn run_client(cfg: ClientConfig) -> Result<(), TftpError> {
    let (local_file, remote_file, role) = match cfg.direction {
        Direction::Get => (cfg.destination.clone(), cfg.source.clone(), Role::WriteLocal),
        Direction::Put => (cfg.source.clone(), cfg.destination.clone(), Role::ReadLocal),
    };

    match cfg.direction {
        Direction::Get => {
            if Path::new(&local_file).exists() {
                return Err(TftpError::FileExists(local_file));
            }
        }
        Direction::Put => {
            if !Path::new(&local_file).exists() {
                return Err(TftpError::FileNotFound(local_file));
            }
        }
    }

    let server = lookup_host((cfg.host.as_str(), cfg.port))
        .await?
        .next()
        .ok_or_else(|| {
            TftpError::Io(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address found for host '{}'", cfg.host),
            ))
        })?;

    tracing::info!(
        "communicating with server at '{server}' with mode '{}'",
        cfg.mode
    );

    let session = Session::client(
        server,
        role,
        PathBuf::from(local_file),
        remote_file,
        cfg.mode,
        cfg.session,
    );
    session.run().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn config(direction: Direction, source: &str, destination: &str) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            direction,
            source: source.to_string(),
            destination: destination.to_string(),
            mode: TransferMode::Octet,
            session: SessionConfig::default(),
        }
    }

    #[test]
    fn direction_parsing() {
        assert_eq!("get".parse::<Direction>(), Ok(Direction::Get));
        assert_eq!("PUT".parse::<Direction>(), Ok(Direction::Put));
        assert!("fetch".parse::<Direction>().is_err());
    }

    #[tokio::test]
    async fn get_refuses_existing_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("already-there");
        std::fs::write(&dest, b"x").unwrap();

        let result = run_client(config(Direction::Get, "remote.txt", dest.to_str().unwrap())).await;
        match result {
            Err(TftpError::FileExists(_)) => {}
            other => panic!("expected FileExists, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn put_requires_existing_source() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nothing-here");

        let result = run_client(config(Direction::Put, missing.to_str().unwrap(), "remote.txt")).await;
        match result {
            Err(TftpError::FileNotFound(_)) => {}
            other => panic!("expected FileNotFound, got {other:?}"),
        }
    }
}
