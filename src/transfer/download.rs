//! The download pipeline: one object from the store to a local sink.
//!
//! File destinations are written by parallel ranged `GetObject` calls with
//! positional writes, so parts may land in any order. The standard-output
//! destination is sequential: ranges are fetched and written in object
//! order, keeping memory bounded without reordering the stream.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;

use crate::s3::{GetObjectInput, HeadObjectInput};

use super::{Engine, TransferError};

pub(crate) struct Downloader {
    engine: Arc<Engine>,
    bucket: String,
    key: String,
}

impl Downloader {
    pub(crate) fn new(engine: Arc<Engine>, bucket: String, key: String) -> Self {
        Self {
            engine,
            bucket,
            key,
        }
    }

    /// Source size, or `None` when the working context was cancelled.
    async fn size(&self) -> Result<Option<u64>, TransferError> {
        let head = HeadObjectInput {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
        };
        match self.engine.guard(self.engine.api.head_object(head)).await {
            None => Ok(None),
            Some(Ok(out)) => Ok(Some(out.content_length)),
            Some(Err(err)) => Err(err.into()),
        }
    }

    fn range_input(&self, pos: u64, last_byte: u64) -> GetObjectInput {
        GetObjectInput {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            range: Some(format!("bytes={pos}-{last_byte}")),
        }
    }

    /// Download to a file opened in create+truncate mode with 0644
    /// permissions, issuing ranged reads in parallel.
    pub(crate) async fn to_path(&self, path: &Path) -> Result<(), TransferError> {
        let Some(size) = self.size().await? else {
            return Ok(());
        };

        if self.engine.options.recursive {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = Arc::new(open_destination(path)?);
        if size == 0 {
            return Ok(());
        }

        let chunk = self.engine.options.part_size;
        let mut tasks = JoinSet::new();
        let mut pos: u64 = 0;
        while pos < size {
            let last_byte = (pos + chunk - 1).min(size - 1);
            let Some(permit) = self.engine.acquire().await else {
                break;
            };
            let engine = Arc::clone(&self.engine);
            let file = Arc::clone(&file);
            let input = self.range_input(pos, last_byte);
            tasks.spawn(async move {
                let _permit = permit;
                let body = match engine.guard(engine.api.get_object(input)).await {
                    None => return,
                    Some(Ok(out)) => out.body,
                    Some(Err(err)) => {
                        engine.set_error(err.into());
                        return;
                    }
                };
                let written =
                    tokio::task::spawn_blocking(move || write_all_at(&file, &body, pos)).await;
                match written {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => engine.set_error(err.into()),
                    Err(join_err) => engine.set_error(TransferError::Io(std::io::Error::other(
                        join_err,
                    ))),
                }
            });
            pos = last_byte + 1;
        }
        while tasks.join_next().await.is_some() {}
        Ok(())
    }

    /// Stream the object sequentially to a writer (the `-` destination).
    pub(crate) async fn to_writer<W>(&self, writer: &mut W) -> Result<(), TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(size) = self.size().await? else {
            return Ok(());
        };
        let chunk = self.engine.options.part_size;
        let mut pos: u64 = 0;
        while pos < size {
            let last_byte = (pos + chunk - 1).min(size - 1);
            let Some(_permit) = self.engine.acquire().await else {
                return Ok(());
            };
            let input = self.range_input(pos, last_byte);
            let body = match self.engine.guard(self.engine.api.get_object(input)).await {
                None => return Ok(()),
                Some(Ok(out)) => out.body,
                Some(Err(err)) => return Err(err.into()),
            };
            writer.write_all(&body).await?;
            pos = last_byte + 1;
        }
        writer.flush().await?;
        Ok(())
    }
}

/// Open the destination file for create+truncate with permission 0644.
fn open_destination(path: &Path) -> std::io::Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options.open(path)
}

#[cfg(unix)]
fn write_all_at(file: &std::fs::File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &std::fs::File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut buf = buf;
    let mut offset = offset;
    while !buf.is_empty() {
        let n = file.seek_write(buf, offset)?;
        buf = &buf[n..];
        offset += n as u64;
    }
    Ok(())
}
