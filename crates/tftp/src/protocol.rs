//! TFTP wire format (RFC 1350).
//!
//! Every datagram starts with a big-endian 16-bit opcode:
//!
//! - RRQ/WRQ: | Opcode | Filename | 0 | Mode | 0 |
//! - DATA:    | Opcode | Block# | 0..512 bytes payload |
//! - ACK:     | Opcode | Block# |
//! - ERROR:   | Opcode | ErrCode | ErrMsg | 0 |
//!
//! [`Packet`] carries one variant per opcode; [`Packet::encode`] validates
//! shape and size limits before producing bytes, and [`Packet::decode`]
//! parses a received datagram. The received length from the socket is
//! authoritative: decoding never pads contents to a buffer size.

use std::fmt;
use std::str::FromStr;

use crate::block::BlockNumber;
use crate::error::TftpError;

/// Maximum byte size of the payload of a DATA packet.
pub const MAX_DATA_LEN: usize = 512;

/// Maximum byte size of any datagram this implementation will build or
/// receive. Generous enough for long filenames and error messages.
pub const MAX_DATAGRAM_LEN: usize = 2048;

/// TFTP protocol opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Read request (RRQ) - opcode 1.
    ReadRequest = 1,
    /// Write request (WRQ) - opcode 2.
    WriteRequest = 2,
    /// File content block - opcode 3.
    Data = 3,
    /// Block acknowledgment - opcode 4.
    Acknowledgment = 4,
    /// Error report - opcode 5. Terminates the transfer, never retransmitted.
    Error = 5,
}

impl Opcode {
    /// Convert a u16 value to an opcode.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ReadRequest),
            2 => Some(Self::WriteRequest),
            3 => Some(Self::Data),
            4 => Some(Self::Acknowledgment),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    /// The u16 representation transmitted on the wire.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Short protocol name of the opcode.
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadRequest => "RRQ",
            Self::WriteRequest => "WRQ",
            Self::Data => "DATA",
            Self::Acknowledgment => "ACK",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// TFTP error codes as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Error code 0: not defined, see error message.
    NotDefined = 0,
    /// Error code 1: file not found.
    FileNotFound = 1,
    /// Error code 2: access violation.
    AccessViolation = 2,
    /// Error code 3: disk full or allocation exceeded.
    DiskFull = 3,
    /// Error code 4: illegal TFTP operation.
    IllegalOperation = 4,
    /// Error code 5: unknown transfer ID.
    UnknownTransferId = 5,
    /// Error code 6: file already exists.
    FileAlreadyExists = 6,
    /// Error code 7: no such user.
    NoSuchUser = 7,
}

impl ErrorCode {
    /// Convert a u16 value to an error code. Unassigned values collapse to
    /// [`ErrorCode::NotDefined`], since an unknown code still has to be
    /// reported to the user.
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::FileNotFound,
            2 => Self::AccessViolation,
            3 => Self::DiskFull,
            4 => Self::IllegalOperation,
            5 => Self::UnknownTransferId,
            6 => Self::FileAlreadyExists,
            7 => Self::NoSuchUser,
            _ => Self::NotDefined,
        }
    }

    /// The u16 representation transmitted on the wire.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// The conventional message for this error code.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::NotDefined => "Undefined error",
            Self::FileNotFound => "File not found",
            Self::AccessViolation => "Access violation",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::IllegalOperation => "Illegal TFTP operation",
            Self::UnknownTransferId => "Unknown transfer ID",
            Self::FileAlreadyExists => "File already exists",
            Self::NoSuchUser => "No such user",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.as_u16())
    }
}

/// TFTP transfer modes.
///
/// `mail` is part of RFC 1350 but deliberately unsupported; requests naming
/// it are rejected with an ERROR at session setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Binary mode: bytes pass through untranslated.
    Octet,
    /// Text mode: line endings are canonicalised to CR LF on the wire.
    NetAscii,
}

impl TransferMode {
    /// Parse a transfer mode from a string, case-insensitively.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "octet" => Some(Self::Octet),
            "netascii" => Some(Self::NetAscii),
            _ => None,
        }
    }

    /// The mode string transmitted in request packets.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Octet => "octet",
            Self::NetAscii => "netascii",
        }
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_opt(s).ok_or_else(|| format!("mode '{s}' is not supported"))
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded or to-be-encoded TFTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Read request: the sender wants to read `filename` from its peer.
    ReadRequest {
        filename: String,
        /// Transfer mode string, lowercased on decode. Kept as a string so
        /// an unsupported mode can be rejected with an ERROR rather than a
        /// decode failure.
        mode: String,
    },
    /// Write request: the sender wants to write `filename` to its peer.
    WriteRequest { filename: String, mode: String },
    /// One block of file content. A payload shorter than 512 bytes marks
    /// the final block.
    Data {
        block: BlockNumber,
        payload: Vec<u8>,
    },
    /// Acknowledges receipt of the DATA packet with the same block number.
    Acknowledgment { block: BlockNumber },
    /// Reports an error and terminates the transfer.
    Error { code: ErrorCode, message: String },
}

/// Find the next NUL byte at or after `start`.
fn find_zero(buf: &[u8], start: usize) -> Option<usize> {
    buf[start..].iter().position(|&b| b == 0).map(|pos| start + pos)
}

/// Decode an ASCII string field. Strings are US-ASCII on the wire.
fn decode_str(buf: &[u8], what: &str) -> Result<String, TftpError> {
    if !buf.is_ascii() {
        return Err(TftpError::Malformed(format!("{what} is not ASCII")));
    }
    Ok(String::from_utf8_lossy(buf).into_owned())
}

fn decode_request(buf: &[u8]) -> Result<(String, String), TftpError> {
    // Contents: filename, NUL, mode, NUL.
    let fname_end = find_zero(buf, 2)
        .ok_or_else(|| TftpError::Malformed("filename not terminated".to_string()))?;
    let filename = decode_str(&buf[2..fname_end], "filename")?;

    let mode_end = find_zero(buf, fname_end + 1)
        .ok_or_else(|| TftpError::Malformed("mode not terminated".to_string()))?;
    let mode = decode_str(&buf[fname_end + 1..mode_end], "mode")?.to_ascii_lowercase();

    Ok((filename, mode))
}

impl Packet {
    /// The opcode of this packet.
    pub fn opcode(&self) -> Opcode {
        match self {
            Packet::ReadRequest { .. } => Opcode::ReadRequest,
            Packet::WriteRequest { .. } => Opcode::WriteRequest,
            Packet::Data { .. } => Opcode::Data,
            Packet::Acknowledgment { .. } => Opcode::Acknowledgment,
            Packet::Error { .. } => Opcode::Error,
        }
    }

    /// Decode a received datagram.
    ///
    /// `buf` must be exactly the bytes received from the socket; trailing
    /// bytes after an ACK block number or after the NUL of an ERROR message
    /// are discarded, everything else must parse.
    pub fn decode(buf: &[u8]) -> Result<Packet, TftpError> {
        // Opcode plus at least two more bytes (block number, error code, or
        // the shortest possible filename and NUL).
        if buf.len() < 4 {
            return Err(TftpError::Malformed("packet too short".to_string()));
        }

        let raw_opcode = u16::from_be_bytes([buf[0], buf[1]]);
        let opcode = Opcode::from_u16(raw_opcode)
            .ok_or_else(|| TftpError::Malformed(format!("unknown opcode {raw_opcode}")))?;

        match opcode {
            Opcode::ReadRequest => {
                let (filename, mode) = decode_request(buf)?;
                Ok(Packet::ReadRequest { filename, mode })
            }
            Opcode::WriteRequest => {
                let (filename, mode) = decode_request(buf)?;
                Ok(Packet::WriteRequest { filename, mode })
            }
            Opcode::Data => Ok(Packet::Data {
                block: BlockNumber::new(u16::from_be_bytes([buf[2], buf[3]])),
                payload: buf[4..].to_vec(),
            }),
            Opcode::Acknowledgment => Ok(Packet::Acknowledgment {
                block: BlockNumber::new(u16::from_be_bytes([buf[2], buf[3]])),
            }),
            Opcode::Error => {
                let code = ErrorCode::from_u16(u16::from_be_bytes([buf[2], buf[3]]));
                let text = &buf[4..];
                let end = find_zero(text, 0).unwrap_or(text.len());
                let message = decode_str(&text[..end], "error message")?;
                Ok(Packet::Error { code, message })
            }
        }
    }

    /// Encode this packet into datagram bytes.
    ///
    /// Enforces the per-variant shape rules: strings must be US-ASCII, a
    /// DATA payload may not exceed 512 bytes, and the whole datagram may
    /// not exceed the internal 2048-byte cap.
    pub fn encode(&self) -> Result<Vec<u8>, TftpError> {
        let mut out = Vec::with_capacity(4 + MAX_DATA_LEN);
        out.extend_from_slice(&self.opcode().as_u16().to_be_bytes());

        match self {
            Packet::ReadRequest { filename, mode } | Packet::WriteRequest { filename, mode } => {
                encode_str(&mut out, filename, "filename")?;
                out.push(0);
                encode_str(&mut out, mode, "mode")?;
                out.push(0);
            }
            Packet::Data { block, payload } => {
                if payload.len() > MAX_DATA_LEN {
                    return Err(TftpError::IllegalBuild(format!(
                        "DATA payload of {} bytes exceeds the {MAX_DATA_LEN}-byte maximum",
                        payload.len()
                    )));
                }
                out.extend_from_slice(&block.value().to_be_bytes());
                out.extend_from_slice(payload);
            }
            Packet::Acknowledgment { block } => {
                out.extend_from_slice(&block.value().to_be_bytes());
            }
            Packet::Error { code, message } => {
                out.extend_from_slice(&code.as_u16().to_be_bytes());
                encode_str(&mut out, message, "error message")?;
                out.push(0);
            }
        }

        if out.len() > MAX_DATAGRAM_LEN {
            return Err(TftpError::IllegalBuild(format!(
                "datagram of {} bytes exceeds the {MAX_DATAGRAM_LEN}-byte maximum",
                out.len()
            )));
        }

        Ok(out)
    }
}

fn encode_str(out: &mut Vec<u8>, s: &str, what: &str) -> Result<(), TftpError> {
    if !s.is_ascii() {
        return Err(TftpError::IllegalBuild(format!("{what} is not ASCII")));
    }
    if s.as_bytes().contains(&0) {
        return Err(TftpError::IllegalBuild(format!("{what} contains a NUL byte")));
    }
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_conversion() {
        assert_eq!(Opcode::ReadRequest.as_u16(), 1);
        assert_eq!(Opcode::Error.as_u16(), 5);
        assert_eq!(Opcode::from_u16(3), Some(Opcode::Data));
        assert_eq!(Opcode::from_u16(99), None);
    }

    #[test]
    fn error_code_conversion() {
        assert_eq!(ErrorCode::FileAlreadyExists.as_u16(), 6);
        assert_eq!(ErrorCode::from_u16(1), ErrorCode::FileNotFound);
        // Unassigned codes collapse to NotDefined.
        assert_eq!(ErrorCode::from_u16(99), ErrorCode::NotDefined);
    }

    #[test]
    fn transfer_mode_parsing() {
        assert_eq!(TransferMode::from_str_opt("octet"), Some(TransferMode::Octet));
        assert_eq!(TransferMode::from_str_opt("NETASCII"), Some(TransferMode::NetAscii));
        assert_eq!(TransferMode::from_str_opt("mail"), None);
        assert!("mail".parse::<TransferMode>().is_err());
        assert_eq!("Octet".parse::<TransferMode>(), Ok(TransferMode::Octet));
    }

    #[test]
    fn decodes_read_request() {
        let mut buf = vec![0x00, 0x01];
        buf.extend_from_slice(b"dir/data.txt\0");
        buf.extend_from_slice(b"NetASCII\0");

        let packet = Packet::decode(&buf).unwrap();
        assert_eq!(
            packet,
            Packet::ReadRequest {
                filename: "dir/data.txt".to_string(),
                // Mode is lowercased on decode.
                mode: "netascii".to_string(),
            }
        );
    }

    #[test]
    fn decodes_write_request() {
        let mut buf = vec![0x00, 0x02];
        buf.extend_from_slice(b"out.bin\0octet\0");

        let packet = Packet::decode(&buf).unwrap();
        assert_eq!(
            packet,
            Packet::WriteRequest {
                filename: "out.bin".to_string(),
                mode: "octet".to_string(),
            }
        );
    }

    #[test]
    fn decodes_data_with_authoritative_length() {
        let buf = vec![0x00, 0x03, 0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF];
        let packet = Packet::decode(&buf).unwrap();
        assert_eq!(
            packet,
            Packet::Data {
                block: BlockNumber::new(0x1234),
                payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
            }
        );

        // An empty payload is a valid final block.
        let empty = Packet::decode(&[0x00, 0x03, 0x00, 0x01]).unwrap();
        assert_eq!(
            empty,
            Packet::Data {
                block: BlockNumber::new(1),
                payload: Vec::new(),
            }
        );
    }

    #[test]
    fn decodes_ack_and_ignores_trailing_bytes() {
        let packet = Packet::decode(&[0x00, 0x04, 0x10, 0x2F, 0xAA, 0xBB]).unwrap();
        assert_eq!(
            packet,
            Packet::Acknowledgment {
                block: BlockNumber::new(0x102F)
            }
        );
    }

    #[test]
    fn decodes_error_and_truncates_at_nul() {
        let mut buf = vec![0x00, 0x05, 0x00, 0x04];
        buf.extend_from_slice(b"Illegal!\0garbage after the terminator");

        let packet = Packet::decode(&buf).unwrap();
        assert_eq!(
            packet,
            Packet::Error {
                code: ErrorCode::IllegalOperation,
                message: "Illegal!".to_string(),
            }
        );

        // No NUL at all: the whole remainder is the message.
        let unterminated = Packet::decode(&[0x00, 0x05, 0x00, 0x00, b'h', b'i']).unwrap();
        assert_eq!(
            unterminated,
            Packet::Error {
                code: ErrorCode::NotDefined,
                message: "hi".to_string(),
            }
        );
    }

    #[test]
    fn rejects_malformed_datagrams() {
        // Too short.
        assert!(Packet::decode(&[]).is_err());
        assert!(Packet::decode(&[0x00, 0x04, 0x00]).is_err());
        // Unknown opcode.
        assert!(Packet::decode(&[0x00, 0x09, 0x00, 0x00]).is_err());
        // Request without a filename terminator.
        assert!(Packet::decode(&[0x00, 0x01, b'h', b'i']).is_err());
        // Request without a mode terminator.
        assert!(Packet::decode(&[0x00, 0x01, b'h', 0x00, b'o']).is_err());
    }

    #[test]
    fn encodes_request_with_nul_separators() {
        let packet = Packet::ReadRequest {
            filename: "boot.img".to_string(),
            mode: "octet".to_string(),
        };
        let bytes = packet.encode().unwrap();
        assert_eq!(&bytes[..2], &[0x00, 0x01]);
        assert_eq!(&bytes[2..], b"boot.img\0octet\0");
    }

    #[test]
    fn encodes_data_and_ack() {
        let data = Packet::Data {
            block: BlockNumber::new(7),
            payload: b"Hello".to_vec(),
        };
        assert_eq!(data.encode().unwrap(), b"\x00\x03\x00\x07Hello");

        let ack = Packet::Acknowledgment {
            block: BlockNumber::new(0xFFFF),
        };
        assert_eq!(ack.encode().unwrap(), vec![0x00, 0x04, 0xFF, 0xFF]);
    }

    #[test]
    fn encodes_error_with_terminator() {
        let packet = Packet::Error {
            code: ErrorCode::FileAlreadyExists,
            message: String::new(),
        };
        assert_eq!(packet.encode().unwrap(), vec![0x00, 0x05, 0x00, 0x06, 0x00]);
    }

    #[test]
    fn rejects_oversized_builds() {
        let too_big = Packet::Data {
            block: BlockNumber::new(1),
            payload: vec![0u8; MAX_DATA_LEN + 1],
        };
        assert!(too_big.encode().is_err());

        let at_limit = Packet::Data {
            block: BlockNumber::new(1),
            payload: vec![0u8; MAX_DATA_LEN],
        };
        assert_eq!(at_limit.encode().unwrap().len(), 4 + MAX_DATA_LEN);

        let huge_message = Packet::Error {
            code: ErrorCode::NotDefined,
            message: "x".repeat(MAX_DATAGRAM_LEN),
        };
        assert!(huge_message.encode().is_err());
    }

    #[test]
    fn rejects_non_ascii_strings() {
        let packet = Packet::ReadRequest {
            filename: "f\u{00E9}vrier.txt".to_string(),
            mode: "octet".to_string(),
        };
        assert!(packet.encode().is_err());
    }

    #[test]
    fn round_trips_every_variant() {
        let packets = [
            Packet::ReadRequest {
                filename: "a/b.txt".to_string(),
                mode: "netascii".to_string(),
            },
            Packet::WriteRequest {
                filename: "c.bin".to_string(),
                mode: "octet".to_string(),
            },
            Packet::Data {
                block: BlockNumber::new(0xFFFF),
                payload: vec![0, 1, 2, 255],
            },
            Packet::Acknowledgment {
                block: BlockNumber::new(0),
            },
            Packet::Error {
                code: ErrorCode::DiskFull,
                message: "out of space".to_string(),
            },
        ];
        for packet in packets {
            let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
            assert_eq!(decoded, packet);
        }
    }
}
