//! The upload pipeline: one object from a local source to the store.
//!
//! The first chunk decides the protocol. A chunk that already carries the
//! end of the source becomes a single `PutObject`; anything longer starts
//! a multipart upload whose lifecycle is
//! create → N×part → complete | abort. Parts complete out of order and are
//! collected under a lock; the list is sorted once, at completion time.

use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;

use crate::mime;
use crate::s3::{
    CompletedPart, CreateMultipartUploadInput, ObjectMetadata, PutObjectInput, UploadPartInput,
};

use super::source::{Chunk, ChunkSource};
use super::{Engine, TransferError};

pub(crate) struct Uploader {
    engine: Arc<Engine>,
    bucket: String,
    key: String,
}

impl Uploader {
    pub(crate) fn new(engine: Arc<Engine>, bucket: String, key: String) -> Self {
        Self {
            engine,
            bucket,
            key,
        }
    }

    /// Object-level options, resolved against the destination key. Sent on
    /// `PutObject` and `CreateMultipartUpload` only; parts carry none.
    fn object_metadata(&self) -> ObjectMetadata {
        let opts = &self.engine.options;
        ObjectMetadata {
            acl: opts.acl,
            content_type: Some(mime::resolve(
                opts.content_type.as_deref(),
                opts.no_guess_mime_type,
                &self.key,
            )),
            cache_control: opts.cache_control.clone(),
            content_disposition: opts.content_disposition.clone(),
            content_encoding: opts.content_encoding.clone(),
            content_language: opts.content_language.clone(),
            expires: opts.expires,
        }
    }

    pub(crate) async fn run(&self, mut source: ChunkSource) -> Result<(), TransferError> {
        let first = source.next_chunk().await?;
        if first.eof {
            // the whole payload fits in one chunk, including the empty one
            return self.single_part(first).await;
        }
        self.multipart(first, source).await
    }

    async fn single_part(&self, chunk: Chunk) -> Result<(), TransferError> {
        let Some(_permit) = self.engine.acquire().await else {
            return Ok(());
        };
        let input = PutObjectInput {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            body: chunk.body,
            metadata: self.object_metadata(),
        };
        match self.engine.guard(self.engine.api.put_object(input)).await {
            None => Ok(()),
            Some(Ok(_)) => Ok(()),
            Some(Err(err)) => Err(err.into()),
        }
    }

    async fn multipart(
        &self,
        first: Chunk,
        mut source: ChunkSource,
    ) -> Result<(), TransferError> {
        let create = CreateMultipartUploadInput {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            metadata: self.object_metadata(),
        };
        let upload_id = match self
            .engine
            .guard(self.engine.api.create_multipart_upload(create))
            .await
        {
            None => return Ok(()),
            Some(Ok(out)) => out.upload_id,
            // no upload id exists yet, so there is nothing to abort
            Some(Err(err)) => return Err(err.into()),
        };
        tracing::debug!(
            key = %self.key,
            upload_id = %upload_id,
            "multipart upload started"
        );

        let parts: Arc<Mutex<Vec<CompletedPart>>> = Arc::default();
        let mut tasks = JoinSet::new();
        let mut chunk = first;
        let mut part_number: i32 = 1;
        loop {
            let Some(permit) = self.engine.acquire().await else {
                break;
            };
            let engine = Arc::clone(&self.engine);
            let collected = Arc::clone(&parts);
            let input = UploadPartInput {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                upload_id: upload_id.clone(),
                part_number,
                body: chunk.body,
            };
            let eof = chunk.eof;
            tasks.spawn(async move {
                let _permit = permit;
                let number = input.part_number;
                match engine.guard(engine.api.upload_part(input)).await {
                    None => {}
                    Some(Ok(out)) => collected.lock().unwrap().push(CompletedPart {
                        part_number: number,
                        etag: out.etag,
                    }),
                    Some(Err(err)) => engine.set_error(err.into()),
                }
            });
            if eof {
                break;
            }
            part_number += 1;
            match source.next_chunk().await {
                // never emit a zero-length part
                Ok(next) if next.len == 0 => break,
                Ok(next) => chunk = next,
                Err(err) => {
                    self.engine.set_error(err.into());
                    break;
                }
            }
        }

        // completion barrier: every dispatched part has finished or
        // observed cancellation before the upload is finalised
        while tasks.join_next().await.is_some() {}

        let collected = std::mem::take(&mut *parts.lock().unwrap());
        self.engine
            .finish_multipart(&self.bucket, &self.key, &upload_id, collected)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::s3::{MemoryStore, S3Api};
    use bytes::Bytes;

    const PART: u64 = 8;

    fn engine(store: Arc<MemoryStore>) -> Arc<Engine> {
        let options = EngineOptions {
            part_size: PART,
            ..EngineOptions::default()
        };
        Engine::new(store as Arc<dyn S3Api>, options)
    }

    async fn upload_bytes(data: &'static [u8]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(Arc::clone(&store));
        let uploader = Uploader::new(engine, "b".into(), "k".into());
        let source = ChunkSource::from_bytes(Bytes::from_static(data), PART);
        uploader.run(source).await.unwrap();
        store
    }

    #[tokio::test]
    async fn small_payload_is_a_single_put() {
        let store = upload_bytes(b"hello").await;
        assert_eq!(&store.object("b", "k").unwrap()[..], b"hello");
        assert!(store.in_progress_uploads().is_empty());
    }

    #[tokio::test]
    async fn empty_payload_still_creates_the_object() {
        let store = upload_bytes(b"").await;
        assert_eq!(store.object("b", "k").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn payload_over_one_chunk_goes_multipart() {
        let store = upload_bytes(b"0123456789abcdef+").await; // 2*PART + 1
        assert_eq!(&store.object("b", "k").unwrap()[..], b"0123456789abcdef+");
        assert!(store.in_progress_uploads().is_empty());
    }

    #[tokio::test]
    async fn streaming_source_uploads_a_short_trailing_part() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(Arc::clone(&store));
        let uploader = Uploader::new(engine, "b".into(), "k".into());
        let payload = b"0123456789abcdefxyz".to_vec(); // two full chunks plus three bytes
        let reader = std::io::Cursor::new(payload.clone());
        let source = ChunkSource::from_reader(Box::new(reader), PART);
        uploader.run(source).await.unwrap();
        assert_eq!(&store.object("b", "k").unwrap()[..], &payload[..]);
        assert!(store.in_progress_uploads().is_empty());
    }

    #[tokio::test]
    async fn content_type_follows_the_destination_key() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(Arc::clone(&store));
        let uploader = Uploader::new(engine, "b".into(), "page.html".into());
        let source = ChunkSource::from_bytes(Bytes::from_static(b"<html>"), PART);
        uploader.run(source).await.unwrap();
        assert_eq!(
            store.object_content_type("b", "page.html").unwrap(),
            "text/html; charset=utf-8"
        );
    }
}
