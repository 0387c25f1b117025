//! Chunked access to upload payloads.
//!
//! A source either has a known total size (regular files via metadata,
//! in-memory buffers via their length, seekable streams via a seek probe)
//! or an unknown one (pipes, terminals, other non-regular files). Both
//! regimes expose the same `next_chunk` surface; the coordinator detects
//! the single-shot fast path by the first chunk already reporting `eof`.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

use crate::s3::Body;

/// One chunk of the payload.
#[derive(Debug)]
pub struct Chunk {
    pub body: Body,
    pub len: u64,
    /// Set when this chunk contains the final byte of the source.
    pub eof: bool,
}

enum SourceKind {
    /// Regular file: chunks are file regions read positionally, never
    /// buffered here.
    File { path: PathBuf, len: u64 },
    /// In-memory payload.
    Buffer { data: Bytes },
    /// Seekable stream with a probed length, read sequentially.
    Seekable { file: tokio::fs::File, len: u64 },
    /// Sequential stream of unknown length (stdin, pipes).
    Stream {
        reader: Box<dyn AsyncRead + Send + Unpin>,
    },
}

pub struct ChunkSource {
    kind: SourceKind,
    chunk_size: u64,
    cursor: u64,
}

impl ChunkSource {
    /// Open a local path. Regular files get positional chunking; anything
    /// else falls back to a seek probe, then to plain streaming.
    pub async fn from_path(path: &Path, chunk_size: u64) -> std::io::Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        if meta.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is a directory (missing --recursive?)", path.display()),
            ));
        }
        if meta.is_file() {
            return Ok(Self {
                kind: SourceKind::File {
                    path: path.to_path_buf(),
                    len: meta.len(),
                },
                chunk_size,
                cursor: 0,
            });
        }
        let mut file = tokio::fs::File::open(path).await?;
        match probe_len(&mut file).await {
            Ok(len) => Ok(Self {
                kind: SourceKind::Seekable { file, len },
                chunk_size,
                cursor: 0,
            }),
            Err(_) => Ok(Self {
                kind: SourceKind::Stream {
                    reader: Box::new(file),
                },
                chunk_size,
                cursor: 0,
            }),
        }
    }

    /// The process's standard input; size is always unknown.
    pub fn stdin(chunk_size: u64) -> Self {
        Self::from_reader(Box::new(tokio::io::stdin()), chunk_size)
    }

    pub fn from_reader(reader: Box<dyn AsyncRead + Send + Unpin>, chunk_size: u64) -> Self {
        Self {
            kind: SourceKind::Stream { reader },
            chunk_size,
            cursor: 0,
        }
    }

    pub fn from_bytes(data: impl Into<Bytes>, chunk_size: u64) -> Self {
        Self {
            kind: SourceKind::Buffer { data: data.into() },
            chunk_size,
            cursor: 0,
        }
    }

    /// Total size, when the source regime knows it.
    pub fn total_size(&self) -> Option<u64> {
        match &self.kind {
            SourceKind::File { len, .. } | SourceKind::Seekable { len, .. } => Some(*len),
            SourceKind::Buffer { data } => Some(data.len() as u64),
            SourceKind::Stream { .. } => None,
        }
    }

    /// Produce the next chunk of at most `chunk_size` bytes and advance the
    /// cursor. A zero-length chunk with `eof` set means the source is
    /// exhausted.
    pub async fn next_chunk(&mut self) -> std::io::Result<Chunk> {
        let chunk_size = self.chunk_size;
        match &mut self.kind {
            SourceKind::File { path, len } => {
                let remaining = len.saturating_sub(self.cursor);
                let n = remaining.min(chunk_size);
                let body = if n == 0 {
                    Body::empty()
                } else {
                    Body::FileRegion {
                        path: path.clone(),
                        offset: self.cursor,
                        length: n,
                    }
                };
                self.cursor += n;
                Ok(Chunk {
                    body,
                    len: n,
                    eof: self.cursor >= *len,
                })
            }
            SourceKind::Buffer { data } => {
                let remaining = (data.len() as u64).saturating_sub(self.cursor);
                let n = remaining.min(chunk_size);
                let start = self.cursor as usize;
                let body = Body::Bytes(data.slice(start..start + n as usize));
                self.cursor += n;
                Ok(Chunk {
                    body,
                    len: n,
                    eof: self.cursor >= data.len() as u64,
                })
            }
            SourceKind::Seekable { file, len } => {
                let remaining = len.saturating_sub(self.cursor);
                let n = remaining.min(chunk_size);
                let (buf, read) = read_up_to(file, n).await?;
                self.cursor += read;
                // a short read means the stream ended earlier than probed
                let eof = self.cursor >= *len || read < n;
                Ok(Chunk {
                    body: Body::Bytes(buf),
                    len: read,
                    eof,
                })
            }
            SourceKind::Stream { reader } => {
                let (buf, read) = read_up_to(reader, chunk_size).await?;
                self.cursor += read;
                Ok(Chunk {
                    body: Body::Bytes(buf),
                    len: read,
                    eof: read < chunk_size,
                })
            }
        }
    }
}

/// Probe a seekable handle's remaining length, restoring the position.
async fn probe_len(file: &mut tokio::fs::File) -> std::io::Result<u64> {
    let current = file.seek(SeekFrom::Current(0)).await?;
    let end = file.seek(SeekFrom::End(0)).await?;
    file.seek(SeekFrom::Start(current)).await?;
    Ok(end - current)
}

/// Read up to `limit` bytes, tolerating short reads. Returns the owned
/// buffer and the byte count; fewer than `limit` bytes means end of stream.
async fn read_up_to<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    limit: u64,
) -> std::io::Result<(Bytes, u64)> {
    let mut buf = BytesMut::with_capacity(limit as usize);
    while (buf.len() as u64) < limit {
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }
    }
    let read = buf.len() as u64;
    Ok((buf.freeze(), read))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const CHUNK: u64 = 8;

    #[tokio::test]
    async fn buffer_smaller_than_chunk_is_single_shot() {
        let mut src = ChunkSource::from_bytes(&b"hello"[..], CHUNK);
        assert_eq!(src.total_size(), Some(5));
        let chunk = src.next_chunk().await.unwrap();
        assert_eq!(chunk.len, 5);
        assert!(chunk.eof);
    }

    #[tokio::test]
    async fn buffer_exactly_chunk_sized_is_single_shot() {
        let mut src = ChunkSource::from_bytes(vec![7u8; CHUNK as usize], CHUNK);
        let chunk = src.next_chunk().await.unwrap();
        assert_eq!(chunk.len, CHUNK);
        assert!(chunk.eof);
    }

    #[tokio::test]
    async fn buffer_one_over_chunk_splits_in_two() {
        let mut src = ChunkSource::from_bytes(vec![7u8; CHUNK as usize + 1], CHUNK);
        let first = src.next_chunk().await.unwrap();
        assert_eq!(first.len, CHUNK);
        assert!(!first.eof);
        let second = src.next_chunk().await.unwrap();
        assert_eq!(second.len, 1);
        assert!(second.eof);
    }

    #[tokio::test]
    async fn empty_buffer_reports_eof_immediately() {
        let mut src = ChunkSource::from_bytes(Bytes::new(), CHUNK);
        let chunk = src.next_chunk().await.unwrap();
        assert_eq!(chunk.len, 0);
        assert!(chunk.eof);
    }

    #[tokio::test]
    async fn file_chunks_are_positional_regions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload");
        tokio::fs::write(&path, vec![1u8; CHUNK as usize + 3])
            .await
            .unwrap();

        let mut src = ChunkSource::from_path(&path, CHUNK).await.unwrap();
        assert_eq!(src.total_size(), Some(CHUNK + 3));

        let first = src.next_chunk().await.unwrap();
        assert!(matches!(
            first.body,
            Body::FileRegion { offset: 0, length, .. } if length == CHUNK
        ));
        assert!(!first.eof);

        let second = src.next_chunk().await.unwrap();
        assert_eq!(second.len, 3);
        assert!(second.eof);
        assert!(
            matches!(second.body, Body::FileRegion { offset, .. } if offset == CHUNK)
        );
    }

    #[tokio::test]
    async fn stream_detects_eof_on_short_read() {
        let reader = Cursor::new(b"temporary file's content".to_vec());
        let mut src = ChunkSource::from_reader(Box::new(reader), 64);
        assert_eq!(src.total_size(), None);
        let chunk = src.next_chunk().await.unwrap();
        assert_eq!(chunk.len, 24);
        assert!(chunk.eof);
    }

    #[tokio::test]
    async fn stream_of_exact_chunk_size_defers_eof() {
        let reader = Cursor::new(vec![0u8; CHUNK as usize]);
        let mut src = ChunkSource::from_reader(Box::new(reader), CHUNK);
        let first = src.next_chunk().await.unwrap();
        assert_eq!(first.len, CHUNK);
        assert!(!first.eof);
        let second = src.next_chunk().await.unwrap();
        assert_eq!(second.len, 0);
        assert!(second.eof);
    }
}
