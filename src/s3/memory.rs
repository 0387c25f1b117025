//! An in-memory store implementing the full protocol surface.
//!
//! Used by the test-suite in place of the real client. Beyond storing
//! bytes, it enforces the multipart contract the engine relies on: a
//! `CompleteMultipartUpload` must list exactly the uploaded parts, with
//! matching etags, strictly ascending and contiguous from part number 1.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use bytes::{Bytes, BytesMut};

use crate::config::CannedAcl;

use super::{
    AbortMultipartUploadInput, CompleteMultipartUploadInput, CopyObjectInput,
    CreateMultipartUploadInput, CreateMultipartUploadOutput, GetObjectInput, GetObjectOutput,
    HeadObjectInput, HeadObjectOutput, ListObjectsV2Input, ListObjectsV2Output, ObjectSummary,
    PutObjectInput, PutObjectOutput, S3Api, S3ApiError, UploadPartCopyInput, UploadPartCopyOutput,
    UploadPartInput, UploadPartOutput,
};

const DEFAULT_PAGE_SIZE: i32 = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    acl: Option<CannedAcl>,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    content_type: Option<String>,
    acl: Option<CannedAcl>,
    parts: BTreeMap<i32, (Bytes, String)>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(String, String), StoredObject>,
    uploads: HashMap<String, PendingUpload>,
}

/// In-memory [`S3Api`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing the protocol.
    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.into(),
                content_type: None,
                acl: None,
            },
        );
    }

    /// The stored bytes of an object, if present.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    pub fn object_content_type(&self, bucket: &str, key: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .and_then(|o| o.content_type.clone())
    }

    pub fn object_acl(&self, bucket: &str, key: &str) -> Option<CannedAcl> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .and_then(|o| o.acl)
    }

    /// All keys in a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Upload ids that were created but neither completed nor aborted.
    /// The no-orphan-parts invariant demands this is empty after any run.
    pub fn in_progress_uploads(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.uploads.keys().cloned().collect()
    }
}

fn new_etag() -> String {
    format!("\"{}\"", uuid::Uuid::new_v4())
}

/// Parse an inclusive `bytes=<first>-<last>` range header.
fn parse_range(range: &str) -> Option<(u64, u64)> {
    let window = range.strip_prefix("bytes=")?;
    let (first, last) = window.split_once('-')?;
    Some((first.parse().ok()?, last.parse().ok()?))
}

fn slice_range(data: &Bytes, range: Option<&str>) -> Result<Bytes, S3ApiError> {
    match range {
        None => Ok(data.clone()),
        Some(r) => {
            let (first, last) = parse_range(r).ok_or_else(|| {
                S3ApiError::request("GetObject", format!("unparsable range {r:?}"))
            })?;
            if first as usize >= data.len() && !data.is_empty() {
                return Err(S3ApiError::request(
                    "GetObject",
                    format!("range {r:?} out of bounds for {} bytes", data.len()),
                ));
            }
            let end = ((last + 1) as usize).min(data.len());
            Ok(data.slice(first as usize..end))
        }
    }
}

/// Split a `bucket/key` copy source.
fn parse_copy_source(source: &str) -> Result<(String, String), S3ApiError> {
    match source.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok((bucket.to_string(), key.to_string()))
        }
        _ => Err(S3ApiError::request(
            "CopyObject",
            format!("invalid copy source {source:?}"),
        )),
    }
}

#[async_trait::async_trait]
impl S3Api for MemoryStore {
    async fn put_object(&self, input: PutObjectInput) -> Result<PutObjectOutput, S3ApiError> {
        let data = input.body.into_bytes().await?;
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(
            (input.bucket, input.key),
            StoredObject {
                data,
                content_type: input.metadata.content_type,
                acl: input.metadata.acl,
            },
        );
        Ok(PutObjectOutput { etag: new_etag() })
    }

    async fn get_object(&self, input: GetObjectInput) -> Result<GetObjectOutput, S3ApiError> {
        let inner = self.inner.lock().unwrap();
        let object = inner
            .objects
            .get(&(input.bucket.clone(), input.key.clone()))
            .ok_or(S3ApiError::NoSuchKey {
                bucket: input.bucket.clone(),
                key: input.key.clone(),
            })?;
        Ok(GetObjectOutput {
            body: slice_range(&object.data, input.range.as_deref())?,
            content_type: object.content_type.clone(),
        })
    }

    async fn head_object(&self, input: HeadObjectInput) -> Result<HeadObjectOutput, S3ApiError> {
        let inner = self.inner.lock().unwrap();
        let object = inner
            .objects
            .get(&(input.bucket.clone(), input.key.clone()))
            .ok_or(S3ApiError::NoSuchKey {
                bucket: input.bucket,
                key: input.key,
            })?;
        Ok(HeadObjectOutput {
            content_length: object.data.len() as u64,
            content_type: object.content_type.clone(),
        })
    }

    async fn copy_object(&self, input: CopyObjectInput) -> Result<(), S3ApiError> {
        let (src_bucket, src_key) = parse_copy_source(&input.copy_source)?;
        let mut inner = self.inner.lock().unwrap();
        let source = inner
            .objects
            .get(&(src_bucket.clone(), src_key.clone()))
            .ok_or(S3ApiError::NoSuchKey {
                bucket: src_bucket,
                key: src_key,
            })?
            .clone();
        inner.objects.insert((input.bucket, input.key), source);
        Ok(())
    }

    async fn list_objects_v2(
        &self,
        input: ListObjectsV2Input,
    ) -> Result<ListObjectsV2Output, S3ApiError> {
        let page_size = input.max_keys.unwrap_or(DEFAULT_PAGE_SIZE).max(1) as usize;
        let inner = self.inner.lock().unwrap();
        let mut contents = Vec::new();
        let mut next_token = None;
        for ((bucket, key), object) in inner.objects.iter() {
            if bucket != &input.bucket || !key.starts_with(&input.prefix) {
                continue;
            }
            if let Some(after) = &input.continuation_token {
                if key <= after {
                    continue;
                }
            }
            if contents.len() == page_size {
                next_token = contents.last().map(|o: &ObjectSummary| o.key.clone());
                break;
            }
            contents.push(ObjectSummary {
                key: key.clone(),
                size: object.data.len() as u64,
            });
        }
        Ok(ListObjectsV2Output {
            contents,
            next_continuation_token: next_token,
        })
    }

    async fn create_multipart_upload(
        &self,
        input: CreateMultipartUploadInput,
    ) -> Result<CreateMultipartUploadOutput, S3ApiError> {
        let upload_id = uuid::Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().unwrap();
        inner.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: input.bucket,
                key: input.key,
                content_type: input.metadata.content_type,
                acl: input.metadata.acl,
                parts: BTreeMap::new(),
            },
        );
        Ok(CreateMultipartUploadOutput { upload_id })
    }

    async fn upload_part(&self, input: UploadPartInput) -> Result<UploadPartOutput, S3ApiError> {
        let data = input.body.into_bytes().await?;
        let etag = new_etag();
        let mut inner = self.inner.lock().unwrap();
        let upload =
            inner
                .uploads
                .get_mut(&input.upload_id)
                .ok_or(S3ApiError::NoSuchUpload {
                    upload_id: input.upload_id.clone(),
                })?;
        upload.parts.insert(input.part_number, (data, etag.clone()));
        Ok(UploadPartOutput { etag })
    }

    async fn upload_part_copy(
        &self,
        input: UploadPartCopyInput,
    ) -> Result<UploadPartCopyOutput, S3ApiError> {
        let (src_bucket, src_key) = parse_copy_source(&input.copy_source)?;
        let etag = new_etag();
        let mut inner = self.inner.lock().unwrap();
        let data = inner
            .objects
            .get(&(src_bucket.clone(), src_key.clone()))
            .ok_or(S3ApiError::NoSuchKey {
                bucket: src_bucket,
                key: src_key,
            })?
            .data
            .clone();
        let part = slice_range(&data, Some(&input.copy_source_range))?;
        let upload =
            inner
                .uploads
                .get_mut(&input.upload_id)
                .ok_or(S3ApiError::NoSuchUpload {
                    upload_id: input.upload_id.clone(),
                })?;
        upload.parts.insert(input.part_number, (part, etag.clone()));
        Ok(UploadPartCopyOutput { etag })
    }

    async fn complete_multipart_upload(
        &self,
        input: CompleteMultipartUploadInput,
    ) -> Result<(), S3ApiError> {
        let mut inner = self.inner.lock().unwrap();
        let upload = inner
            .uploads
            .get(&input.upload_id)
            .ok_or(S3ApiError::NoSuchUpload {
                upload_id: input.upload_id.clone(),
            })?;

        let invalid = |reason: String| S3ApiError::InvalidParts {
            upload_id: input.upload_id.clone(),
            reason,
        };
        if input.parts.is_empty() {
            return Err(invalid("empty part list".into()));
        }
        if input.parts.len() != upload.parts.len() {
            return Err(invalid(format!(
                "listed {} parts, uploaded {}",
                input.parts.len(),
                upload.parts.len()
            )));
        }
        for (idx, part) in input.parts.iter().enumerate() {
            let expected = idx as i32 + 1;
            if part.part_number != expected {
                return Err(invalid(format!(
                    "part number {} at position {} (want {})",
                    part.part_number, idx, expected
                )));
            }
            let (_, etag) = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| invalid(format!("part {} was never uploaded", part.part_number)))?;
            if etag != &part.etag {
                return Err(invalid(format!("etag mismatch on part {}", part.part_number)));
            }
        }

        let upload = inner
            .uploads
            .remove(&input.upload_id)
            .ok_or(S3ApiError::NoSuchUpload {
                upload_id: input.upload_id.clone(),
            })?;
        let mut data = BytesMut::new();
        for (_, (bytes, _)) in upload.parts.iter() {
            data.extend_from_slice(bytes);
        }
        inner.objects.insert(
            (upload.bucket, upload.key),
            StoredObject {
                data: data.freeze(),
                content_type: upload.content_type,
                acl: upload.acl,
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        input: AbortMultipartUploadInput,
    ) -> Result<(), S3ApiError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .uploads
            .remove(&input.upload_id)
            .ok_or(S3ApiError::NoSuchUpload {
                upload_id: input.upload_id,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::{Body, CompletedPart, ObjectMetadata};

    fn put_input(bucket: &str, key: &str, data: &'static [u8]) -> PutObjectInput {
        PutObjectInput {
            bucket: bucket.into(),
            key: key.into(),
            body: Body::Bytes(Bytes::from_static(data)),
            metadata: ObjectMetadata::default(),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        store.put_object(put_input("b", "k", b"hello")).await.unwrap();
        let out = store
            .get_object(GetObjectInput {
                bucket: "b".into(),
                key: "k".into(),
                range: None,
            })
            .await
            .unwrap();
        assert_eq!(&out.body[..], b"hello");
    }

    #[tokio::test]
    async fn ranged_get_is_inclusive() {
        let store = MemoryStore::new();
        store
            .put_object(put_input("b", "k", b"0123456789"))
            .await
            .unwrap();
        let out = store
            .get_object(GetObjectInput {
                bucket: "b".into(),
                key: "k".into(),
                range: Some("bytes=2-4".into()),
            })
            .await
            .unwrap();
        assert_eq!(&out.body[..], b"234");
        // tail clamp
        let out = store
            .get_object(GetObjectInput {
                bucket: "b".into(),
                key: "k".into(),
                range: Some("bytes=8-100".into()),
            })
            .await
            .unwrap();
        assert_eq!(&out.body[..], b"89");
    }

    #[tokio::test]
    async fn multipart_assembles_in_part_number_order() {
        let store = MemoryStore::new();
        let create = store
            .create_multipart_upload(CreateMultipartUploadInput {
                bucket: "b".into(),
                key: "k".into(),
                metadata: ObjectMetadata::default(),
            })
            .await
            .unwrap();
        // upload out of order
        let p2 = store
            .upload_part(UploadPartInput {
                bucket: "b".into(),
                key: "k".into(),
                upload_id: create.upload_id.clone(),
                part_number: 2,
                body: Body::Bytes(Bytes::from_static(b"world")),
            })
            .await
            .unwrap();
        let p1 = store
            .upload_part(UploadPartInput {
                bucket: "b".into(),
                key: "k".into(),
                upload_id: create.upload_id.clone(),
                part_number: 1,
                body: Body::Bytes(Bytes::from_static(b"hello ")),
            })
            .await
            .unwrap();
        store
            .complete_multipart_upload(CompleteMultipartUploadInput {
                bucket: "b".into(),
                key: "k".into(),
                upload_id: create.upload_id.clone(),
                parts: vec![
                    CompletedPart {
                        part_number: 1,
                        etag: p1.etag,
                    },
                    CompletedPart {
                        part_number: 2,
                        etag: p2.etag,
                    },
                ],
            })
            .await
            .unwrap();
        assert_eq!(&store.object("b", "k").unwrap()[..], b"hello world");
        assert!(store.in_progress_uploads().is_empty());
    }

    #[tokio::test]
    async fn complete_rejects_out_of_order_parts() {
        let store = MemoryStore::new();
        let create = store
            .create_multipart_upload(CreateMultipartUploadInput {
                bucket: "b".into(),
                key: "k".into(),
                metadata: ObjectMetadata::default(),
            })
            .await
            .unwrap();
        let mut etags = Vec::new();
        for n in 1..=2 {
            let out = store
                .upload_part(UploadPartInput {
                    bucket: "b".into(),
                    key: "k".into(),
                    upload_id: create.upload_id.clone(),
                    part_number: n,
                    body: Body::Bytes(Bytes::from_static(b"x")),
                })
                .await
                .unwrap();
            etags.push(out.etag);
        }
        let err = store
            .complete_multipart_upload(CompleteMultipartUploadInput {
                bucket: "b".into(),
                key: "k".into(),
                upload_id: create.upload_id.clone(),
                parts: vec![
                    CompletedPart {
                        part_number: 2,
                        etag: etags[1].clone(),
                    },
                    CompletedPart {
                        part_number: 1,
                        etag: etags[0].clone(),
                    },
                ],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, S3ApiError::InvalidParts { .. }));
    }

    #[tokio::test]
    async fn abort_discards_the_upload() {
        let store = MemoryStore::new();
        let create = store
            .create_multipart_upload(CreateMultipartUploadInput {
                bucket: "b".into(),
                key: "k".into(),
                metadata: ObjectMetadata::default(),
            })
            .await
            .unwrap();
        assert_eq!(store.in_progress_uploads().len(), 1);
        store
            .abort_multipart_upload(AbortMultipartUploadInput {
                bucket: "b".into(),
                key: "k".into(),
                upload_id: create.upload_id,
            })
            .await
            .unwrap();
        assert!(store.in_progress_uploads().is_empty());
        assert!(store.object("b", "k").is_none());
    }

    #[tokio::test]
    async fn listing_pages_through_continuation_tokens() {
        let store = MemoryStore::new();
        for key in ["p/a", "p/b", "p/c", "q/d"] {
            store.insert_object("b", key, Bytes::from_static(b"x"));
        }
        let mut keys = Vec::new();
        let mut token = None;
        loop {
            let page = store
                .list_objects_v2(ListObjectsV2Input {
                    bucket: "b".into(),
                    prefix: "p/".into(),
                    continuation_token: token.take(),
                    max_keys: Some(2),
                })
                .await
                .unwrap();
            keys.extend(page.contents.into_iter().map(|o| o.key));
            match page.next_continuation_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        assert_eq!(keys, vec!["p/a", "p/b", "p/c"]);
    }
}
