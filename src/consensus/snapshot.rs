//! Local controller snapshot file
//!
//! The consensus layer writes the snapshot; the uploader only needs its
//! header (to learn which log offset it covers) and its raw bytes.
//!
//! ## Layout
//!
//! ```text
//! +--------+---------+-----+----------------------+------+----------+-------+---------+
//! | "CSNP" | version | pad | last_included_offset | term | reserved | crc32 | payload |
//! |   4    |    1    |  3  |      8 (i64 LE)      | 8 LE |    4     |  4 LE |   ...   |
//! +--------+---------+-----+----------------------+------+----------+-------+---------+
//! ```
//!
//! The CRC covers the first 28 header bytes.

use super::Term;
use crate::manifest::LogOffset;
use std::io::{Error as IoError, ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWriteExt};

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"CSNP";
pub const SNAPSHOT_FORMAT_VERSION: u8 = 1;
pub const SNAPSHOT_HEADER_SIZE: usize = 32;

/// Error type for reading the local snapshot header
#[derive(Debug)]
pub enum SnapshotError {
    InvalidMagic([u8; 4]),
    UnsupportedVersion(u8),
    ChecksumMismatch { expected: u32, actual: u32 },
    Io(IoError),
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::InvalidMagic(m) => write!(f, "Invalid snapshot magic: {:?}", m),
            SnapshotError::UnsupportedVersion(v) => {
                write!(f, "Unsupported snapshot format version: {}", v)
            }
            SnapshotError::ChecksumMismatch { expected, actual } => write!(
                f,
                "Snapshot header checksum mismatch: expected {:08x}, got {:08x}",
                expected, actual
            ),
            SnapshotError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<IoError> for SnapshotError {
    fn from(e: IoError) -> Self {
        SnapshotError::Io(e)
    }
}

/// Decoded snapshot header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// Highest log offset covered by the snapshot
    pub last_included_offset: LogOffset,
    /// Term of the entry at `last_included_offset`
    pub term: Term,
}

impl SnapshotHeader {
    pub fn new(last_included_offset: LogOffset, term: Term) -> Self {
        SnapshotHeader {
            last_included_offset,
            term,
        }
    }

    pub fn encode(&self) -> [u8; SNAPSHOT_HEADER_SIZE] {
        let mut buf = [0u8; SNAPSHOT_HEADER_SIZE];
        buf[0..4].copy_from_slice(&SNAPSHOT_MAGIC);
        buf[4] = SNAPSHOT_FORMAT_VERSION;
        // buf[5..8] is padding
        buf[8..16].copy_from_slice(&self.last_included_offset.0.to_le_bytes());
        buf[16..24].copy_from_slice(&self.term.0.to_le_bytes());
        // buf[24..28] is reserved
        let crc = crc32fast::hash(&buf[0..28]);
        buf[28..32].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode and validate a header
    ///
    /// The sentinel offset decodes successfully; rejecting it is the
    /// caller's job.
    pub fn decode(buf: &[u8; SNAPSHOT_HEADER_SIZE]) -> Result<Self, SnapshotError> {
        // All try_into() are safe: buf is a fixed 32-byte array
        let magic: [u8; 4] = buf[0..4]
            .try_into()
            .expect("buf is 32 bytes, indices 0..4 valid");
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic(magic));
        }
        if buf[4] != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(buf[4]));
        }
        let actual = u32::from_le_bytes(
            buf[28..32]
                .try_into()
                .expect("buf is 32 bytes, indices 28..32 valid"),
        );
        let expected = crc32fast::hash(&buf[0..28]);
        if actual != expected {
            return Err(SnapshotError::ChecksumMismatch { expected, actual });
        }

        let offset = i64::from_le_bytes(
            buf[8..16]
                .try_into()
                .expect("buf is 32 bytes, indices 8..16 valid"),
        );
        let term = u64::from_le_bytes(
            buf[16..24]
                .try_into()
                .expect("buf is 32 bytes, indices 16..24 valid"),
        );
        Ok(SnapshotHeader {
            last_included_offset: LogOffset(offset),
            term: Term(term),
        })
    }
}

/// Header followed by payload, as stored on disk
pub fn encode_snapshot(header: &SnapshotHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SNAPSHOT_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// Write a snapshot file atomically (temp file + rename)
pub async fn write_snapshot(
    path: &Path,
    header: &SnapshotHeader,
    payload: &[u8],
) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp).await?;
        file.write_all(&encode_snapshot(header, payload)).await?;
        file.sync_all().await?;
    }
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Seekable byte source backing a [`LocalSnapshot`]
pub trait SnapshotSource: AsyncRead + AsyncSeek + Unpin + Send {}

impl<T: AsyncRead + AsyncSeek + Unpin + Send> SnapshotSource for T {}

/// An open local snapshot
///
/// Owns its source; dropping the value closes the file on every path.
pub struct LocalSnapshot {
    path: PathBuf,
    header: SnapshotHeader,
    source: Box<dyn SnapshotSource>,
}

impl std::fmt::Debug for LocalSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSnapshot")
            .field("path", &self.path)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl LocalSnapshot {
    /// Open and validate the header; `Ok(None)` when no file exists
    pub async fn open(path: &Path) -> Result<Option<Self>, SnapshotError> {
        let file = match File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::from_source(path.to_path_buf(), Box::new(file)).await.map(Some)
    }

    /// Snapshot held in memory; `path` is only used for logging
    pub async fn from_bytes(path: PathBuf, bytes: Vec<u8>) -> Result<Self, SnapshotError> {
        Self::from_source(path, Box::new(std::io::Cursor::new(bytes))).await
    }

    async fn from_source(
        path: PathBuf,
        mut source: Box<dyn SnapshotSource>,
    ) -> Result<Self, SnapshotError> {
        let mut buf = [0u8; SNAPSHOT_HEADER_SIZE];
        source.read_exact(&mut buf).await?;
        let header = SnapshotHeader::decode(&buf)?;
        Ok(LocalSnapshot {
            path,
            header,
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    pub fn last_included_offset(&self) -> LogOffset {
        self.header.last_included_offset
    }

    /// Reader over the whole file, header included
    pub async fn reader(&mut self) -> Result<&mut (dyn AsyncRead + Unpin + Send), SnapshotError> {
        self.source.seek(SeekFrom::Start(0)).await?;
        Ok(&mut self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = SnapshotHeader::new(LogOffset(100), Term(5));
        let decoded = SnapshotHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut buf = SnapshotHeader::new(LogOffset(1), Term(1)).encode();
        buf[0] = b'X';
        assert!(matches!(
            SnapshotHeader::decode(&buf),
            Err(SnapshotError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_header_rejects_unknown_version() {
        let mut buf = SnapshotHeader::new(LogOffset(1), Term(1)).encode();
        buf[4] = 9;
        assert!(matches!(
            SnapshotHeader::decode(&buf),
            Err(SnapshotError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_header_detects_corruption() {
        let mut buf = SnapshotHeader::new(LogOffset(100), Term(5)).encode();
        buf[9] ^= 0xFF;
        assert!(matches!(
            SnapshotHeader::decode(&buf),
            Err(SnapshotError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_sentinel_offset_decodes() {
        let header = SnapshotHeader::new(LogOffset::NONE, Term(1));
        let decoded = SnapshotHeader::decode(&header.encode()).unwrap();
        assert!(!decoded.last_included_offset.is_set());
    }

    #[tokio::test]
    async fn test_open_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let opened = LocalSnapshot::open(&dir.path().join("controller.snapshot"))
            .await
            .unwrap();
        assert!(opened.is_none());
    }

    #[tokio::test]
    async fn test_write_open_and_read_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap").join("controller.snapshot");
        let header = SnapshotHeader::new(LogOffset(42), Term(3));
        write_snapshot(&path, &header, b"payload").await.unwrap();

        let mut snap = LocalSnapshot::open(&path).await.unwrap().unwrap();
        assert_eq!(snap.last_included_offset(), LogOffset(42));
        assert_eq!(snap.header().term, Term(3));

        let mut bytes = Vec::new();
        snap.reader().await.unwrap().read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes.len(), SNAPSHOT_HEADER_SIZE + 7);
        assert_eq!(&bytes[SNAPSHOT_HEADER_SIZE..], b"payload");
    }

    #[tokio::test]
    async fn test_from_bytes() {
        let header = SnapshotHeader::new(LogOffset(7), Term(2));
        let bytes = encode_snapshot(&header, b"abc");
        let mut snap = LocalSnapshot::from_bytes(PathBuf::from("mem"), bytes.clone())
            .await
            .unwrap();
        assert_eq!(snap.last_included_offset(), LogOffset(7));

        let mut read = Vec::new();
        snap.reader().await.unwrap().read_to_end(&mut read).await.unwrap();
        assert_eq!(read, bytes);
    }

    #[tokio::test]
    async fn test_open_truncated_header_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.snapshot");
        tokio::fs::write(&path, b"CSNP").await.unwrap();

        let err = LocalSnapshot::open(&path).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Io(_)));
    }
}
