//! Crate error type and its mapping onto wire error codes.

use std::error;
use std::fmt;
use std::io;

use crate::protocol::ErrorCode;

/// Errors raised while building packets, decoding datagrams, or driving a
/// transfer session.
#[derive(Debug)]
pub enum TftpError {
    /// Socket or file I/O failure.
    Io(io::Error),
    /// A received datagram could not be decoded.
    Malformed(String),
    /// An outgoing packet violated its shape or size limits.
    IllegalBuild(String),
    /// The requested transfer mode is not netascii or octet.
    UnsupportedMode(String),
    /// The local file a transfer would create already exists.
    FileExists(String),
    /// The local file a transfer would send does not exist.
    FileNotFound(String),
    /// A DATA or ACK block number was neither current nor in sequence.
    OutOfOrder,
    /// A DATA packet arrived at the side that sends data.
    UnexpectedData,
    /// An ACK packet arrived at the side that receives data.
    UnexpectedAck,
}

impl TftpError {
    /// The error code carried in the ERROR packet produced for this fault.
    ///
    /// Only the file-exists condition has a dedicated code; everything else
    /// is reported as "not defined" and described (optionally) by the
    /// message text.
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            TftpError::FileExists(_) => ErrorCode::FileAlreadyExists,
            _ => ErrorCode::NotDefined,
        }
    }
}

impl fmt::Display for TftpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TftpError::Io(err) => write!(f, "I/O error: {err}"),
            TftpError::Malformed(what) => write!(f, "packet malformed: {what}"),
            TftpError::IllegalBuild(what) => write!(f, "illegal packet build: {what}"),
            TftpError::UnsupportedMode(mode) => write!(f, "mode '{mode}' is not supported"),
            TftpError::FileExists(path) => write!(f, "file '{path}' already exists"),
            TftpError::FileNotFound(path) => write!(f, "file '{path}' not found"),
            TftpError::OutOfOrder => write!(f, "out-of-order block number"),
            TftpError::UnexpectedData => write!(f, "cannot accept DATA packets"),
            TftpError::UnexpectedAck => write!(f, "cannot accept ACK packets"),
        }
    }
}

impl error::Error for TftpError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            TftpError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TftpError {
    fn from(err: io::Error) -> Self {
        TftpError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_code_mapping() {
        assert_eq!(
            TftpError::FileExists("x".to_string()).wire_code(),
            ErrorCode::FileAlreadyExists
        );
        assert_eq!(TftpError::OutOfOrder.wire_code(), ErrorCode::NotDefined);
        assert_eq!(
            TftpError::Io(io::Error::other("boom")).wire_code(),
            ErrorCode::NotDefined
        );
    }
}
