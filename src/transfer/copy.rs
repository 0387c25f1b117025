//! The server-side copy pipeline: one object copied between buckets
//! without the bytes passing through this process.
//!
//! The source size (from `HeadObject`) picks the protocol: a single
//! `CopyObject` up to the configured threshold, otherwise a multipart
//! copy whose parts are `UploadPartCopy` calls carrying byte ranges.
//! Part boundaries are computed deterministically up front.

use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;

use crate::s3::{
    CompletedPart, CopyObjectInput, CreateMultipartUploadInput, HeadObjectInput, ObjectMetadata,
    UploadPartCopyInput,
};

use super::{Engine, TransferError};

pub(crate) struct Copier {
    engine: Arc<Engine>,
    src_bucket: String,
    src_key: String,
    dest_bucket: String,
    dest_key: String,
}

impl Copier {
    pub(crate) fn new(
        engine: Arc<Engine>,
        src_bucket: String,
        src_key: String,
        dest_bucket: String,
        dest_key: String,
    ) -> Self {
        Self {
            engine,
            src_bucket,
            src_key,
            dest_bucket,
            dest_key,
        }
    }

    /// `<source_bucket>/<source_key>`, passed verbatim; escaping is the
    /// protocol client's concern.
    fn copy_source(&self) -> String {
        format!("{}/{}", self.src_bucket, self.src_key)
    }

    pub(crate) async fn run(&self) -> Result<(), TransferError> {
        let head = HeadObjectInput {
            bucket: self.src_bucket.clone(),
            key: self.src_key.clone(),
        };
        let size = match self.engine.guard(self.engine.api.head_object(head)).await {
            None => return Ok(()),
            Some(Ok(out)) => out.content_length,
            Some(Err(err)) => return Err(err.into()),
        };

        if size <= self.engine.options.max_copy_object_bytes {
            return self.single_part().await;
        }
        self.multipart(size).await
    }

    async fn single_part(&self) -> Result<(), TransferError> {
        let Some(_permit) = self.engine.acquire().await else {
            return Ok(());
        };
        let input = CopyObjectInput {
            bucket: self.dest_bucket.clone(),
            key: self.dest_key.clone(),
            copy_source: self.copy_source(),
        };
        match self.engine.guard(self.engine.api.copy_object(input)).await {
            None => Ok(()),
            Some(Ok(())) => Ok(()),
            Some(Err(err)) => Err(err.into()),
        }
    }

    async fn multipart(&self, size: u64) -> Result<(), TransferError> {
        let create = CreateMultipartUploadInput {
            bucket: self.dest_bucket.clone(),
            key: self.dest_key.clone(),
            metadata: ObjectMetadata::default(),
        };
        let upload_id = match self
            .engine
            .guard(self.engine.api.create_multipart_upload(create))
            .await
        {
            None => return Ok(()),
            Some(Ok(out)) => out.upload_id,
            Some(Err(err)) => return Err(err.into()),
        };
        tracing::debug!(
            key = %self.dest_key,
            upload_id = %upload_id,
            size,
            "multipart copy started"
        );

        let chunk = self.engine.options.part_size;
        let parts: Arc<Mutex<Vec<CompletedPart>>> = Arc::default();
        let mut tasks = JoinSet::new();
        let mut part_number: i32 = 1;
        let mut pos: u64 = 0;
        while pos < size {
            let last_byte = (pos + chunk - 1).min(size - 1);
            let Some(permit) = self.engine.acquire().await else {
                break;
            };
            let engine = Arc::clone(&self.engine);
            let collected = Arc::clone(&parts);
            let input = UploadPartCopyInput {
                bucket: self.dest_bucket.clone(),
                key: self.dest_key.clone(),
                upload_id: upload_id.clone(),
                part_number,
                copy_source: self.copy_source(),
                copy_source_range: format!("bytes={pos}-{last_byte}"),
            };
            tasks.spawn(async move {
                let _permit = permit;
                let number = input.part_number;
                match engine.guard(engine.api.upload_part_copy(input)).await {
                    None => {}
                    Some(Ok(out)) => collected.lock().unwrap().push(CompletedPart {
                        part_number: number,
                        etag: out.etag,
                    }),
                    Some(Err(err)) => engine.set_error(err.into()),
                }
            });
            part_number += 1;
            pos = last_byte + 1;
        }

        while tasks.join_next().await.is_some() {}

        let collected = std::mem::take(&mut *parts.lock().unwrap());
        self.engine
            .finish_multipart(&self.dest_bucket, &self.dest_key, &upload_id, collected)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::s3::{MemoryStore, S3Api};
    use bytes::Bytes;

    fn engine(store: Arc<MemoryStore>, max_copy: u64) -> Arc<Engine> {
        let options = EngineOptions {
            part_size: 8,
            max_copy_object_bytes: max_copy,
            ..EngineOptions::default()
        };
        Engine::new(store as Arc<dyn S3Api>, options)
    }

    #[tokio::test]
    async fn size_at_threshold_uses_a_single_copy() {
        let store = Arc::new(MemoryStore::new());
        store.insert_object("b", "src", Bytes::from(vec![3u8; 16]));
        let engine = engine(Arc::clone(&store), 16);
        Copier::new(engine, "b".into(), "src".into(), "b".into(), "dst".into())
            .run()
            .await
            .unwrap();
        assert_eq!(store.object("b", "dst").unwrap().len(), 16);
        assert!(store.in_progress_uploads().is_empty());
    }

    #[tokio::test]
    async fn size_over_threshold_copies_in_parts() {
        let store = Arc::new(MemoryStore::new());
        let payload: Vec<u8> = (0..17u8).collect();
        store.insert_object("b", "src", Bytes::from(payload.clone()));
        let engine = engine(Arc::clone(&store), 16);
        Copier::new(engine, "b".into(), "src".into(), "b".into(), "dst".into())
            .run()
            .await
            .unwrap();
        assert_eq!(&store.object("b", "dst").unwrap()[..], &payload[..]);
        assert!(store.in_progress_uploads().is_empty());
    }

    #[tokio::test]
    async fn missing_source_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(Arc::clone(&store), 16);
        let err = Copier::new(engine, "b".into(), "nope".into(), "b".into(), "dst".into())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::S3(_)));
    }
}
