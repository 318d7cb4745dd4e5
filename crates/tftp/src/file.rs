//! Local file access for transfers.
//!
//! Sessions read and write local files through these wrappers so the
//! netascii translation is invisible to the state machine: octet mode
//! passes bytes through, netascii mode routes them via the streaming
//! translators. File I/O here is synchronous; a session only ever blocks
//! on its socket.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::TftpError;
use crate::netascii::{HOST_LINE_ENDING, NetasciiReader, NetasciiWriter};
use crate::protocol::TransferMode;

/// Reads a local file block-by-block in the session's transfer mode.
#[derive(Debug)]
pub struct LocalReader {
    inner: ReaderKind,
}

#[derive(Debug)]
enum ReaderKind {
    Octet(File),
    NetAscii(NetasciiReader<File>),
}

impl LocalReader {
    /// Open `path` for reading. A missing file surfaces as
    /// [`TftpError::FileNotFound`].
    pub fn open(mode: TransferMode, path: &Path) -> Result<Self, TftpError> {
        let file = File::open(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => TftpError::FileNotFound(path.display().to_string()),
            _ => TftpError::Io(err),
        })?;
        let inner = match mode {
            TransferMode::Octet => ReaderKind::Octet(file),
            TransferMode::NetAscii => ReaderKind::NetAscii(NetasciiReader::new(file)),
        };
        Ok(Self { inner })
    }

    /// Read the next block of at most `want` bytes.
    ///
    /// `None` means the file is exhausted and nothing is carried over; a
    /// block shorter than `want` means the next call will return `None`.
    pub fn read_block(&mut self, want: usize) -> io::Result<Option<Vec<u8>>> {
        match &mut self.inner {
            ReaderKind::Octet(file) => {
                let mut buf = vec![0u8; want];
                let mut filled = 0;
                // A single read may come back short of the block size
                // without being at EOF, so keep going until the block is
                // full or the file ends.
                while filled < want {
                    let n = file.read(&mut buf[filled..])?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                if filled == 0 {
                    return Ok(None);
                }
                buf.truncate(filled);
                Ok(Some(buf))
            }
            ReaderKind::NetAscii(reader) => reader.read_block(want),
        }
    }
}

/// Writes a local file block-by-block in the session's transfer mode.
#[derive(Debug)]
pub struct LocalWriter {
    inner: WriterKind,
}

#[derive(Debug)]
enum WriterKind {
    Octet(File),
    NetAscii(NetasciiWriter<File>),
}

impl LocalWriter {
    /// Create `path` for writing. Refuses to overwrite: an existing file
    /// surfaces as [`TftpError::FileExists`].
    pub fn create(mode: TransferMode, path: &Path) -> Result<Self, TftpError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| match err.kind() {
                io::ErrorKind::AlreadyExists => TftpError::FileExists(path.display().to_string()),
                _ => TftpError::Io(err),
            })?;
        let inner = match mode {
            TransferMode::Octet => WriterKind::Octet(file),
            TransferMode::NetAscii => WriterKind::NetAscii(NetasciiWriter::new(file, HOST_LINE_ENDING)),
        };
        Ok(Self { inner })
    }

    /// Write one received block.
    pub fn write_block(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.inner {
            WriterKind::Octet(file) => file.write_all(data),
            WriterKind::NetAscii(writer) => writer.write_block(data),
        }
    }

    /// Flush carried bytes and the underlying file.
    pub fn finish(&mut self) -> io::Result<()> {
        match &mut self.inner {
            WriterKind::Octet(file) => file.flush(),
            WriterKind::NetAscii(writer) => writer.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn octet_reader_blocks_and_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![0xAB; 700]).unwrap();

        let mut reader = LocalReader::open(TransferMode::Octet, &path).unwrap();
        assert_eq!(reader.read_block(512).unwrap().unwrap().len(), 512);
        assert_eq!(reader.read_block(512).unwrap().unwrap().len(), 188);
        assert_eq!(reader.read_block(512).unwrap(), None);
    }

    #[test]
    fn octet_reader_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let mut reader = LocalReader::open(TransferMode::Octet, &path).unwrap();
        assert_eq!(reader.read_block(512).unwrap(), None);
    }

    #[test]
    fn open_missing_file_is_typed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope");
        match LocalReader::open(TransferMode::Octet, &path) {
            Err(TftpError::FileNotFound(_)) => {}
            other => panic!("expected FileNotFound, got {other:?}"),
        }
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taken");
        std::fs::write(&path, b"already here").unwrap();

        match LocalWriter::create(TransferMode::Octet, &path) {
            Err(TftpError::FileExists(_)) => {}
            other => panic!("expected FileExists, got {other:?}"),
        }
        // The refused create must not have clobbered the file.
        assert_eq!(std::fs::read(&path).unwrap(), b"already here");
    }

    #[test]
    fn octet_writer_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut writer = LocalWriter::create(TransferMode::Octet, &path).unwrap();
        writer.write_block(&[1, 2, 3]).unwrap();
        writer.write_block(&[4, 5]).unwrap();
        writer.finish().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn netascii_writer_translates_to_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("text");
        let mut writer = LocalWriter::create(TransferMode::NetAscii, &path).unwrap();
        writer.write_block(b"one\r\ntwo\r\0three").unwrap();
        writer.finish().unwrap();

        let mut expected = b"one".to_vec();
        expected.extend_from_slice(HOST_LINE_ENDING);
        expected.extend_from_slice(b"two\rthree");
        assert_eq!(std::fs::read(&path).unwrap(), expected);
    }

    #[test]
    fn netascii_reader_translates_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("text");
        std::fs::write(&path, b"a\nb").unwrap();

        let mut reader = LocalReader::open(TransferMode::NetAscii, &path).unwrap();
        assert_eq!(reader.read_block(512).unwrap().unwrap(), b"a\r\nb");
        assert_eq!(reader.read_block(512).unwrap(), None);
    }
}
