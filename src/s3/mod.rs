//! The object-store protocol surface.
//!
//! The engine talks to the store through the [`S3Api`] capability set: five
//! object operations (`PutObject`, `GetObject`, `HeadObject`, `CopyObject`,
//! `ListObjectsV2`) and five multipart operations (`CreateMultipartUpload`,
//! `UploadPart`, `UploadPartCopy`, `CompleteMultipartUpload`,
//! `AbortMultipartUpload`). Inputs and outputs are plain structs owned by
//! this crate, so the test-suite can substitute [`memory::MemoryStore`]
//! for the real client without touching SDK types.

use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::config::CannedAcl;

pub mod client;
pub mod memory;

pub use client::AwsS3;
pub use memory::MemoryStore;

/// Protocol-level errors.
#[derive(Error, Debug)]
pub enum S3ApiError {
    #[error("no such key: s3://{bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },

    #[error("no such upload: {upload_id}")]
    NoSuchUpload { upload_id: String },

    #[error("invalid part list for upload {upload_id}: {reason}")]
    InvalidParts { upload_id: String, reason: String },

    #[error("reading request body: {0}")]
    Body(#[from] std::io::Error),

    #[error("{operation} failed: {message}")]
    Request { operation: &'static str, message: String },
}

impl S3ApiError {
    pub fn request(operation: &'static str, message: impl ToString) -> Self {
        S3ApiError::Request {
            operation,
            message: message.to_string(),
        }
    }
}

/// A request payload: either owned bytes or a byte range of a file that the
/// client streams without buffering the whole region.
#[derive(Debug, Clone)]
pub enum Body {
    Bytes(Bytes),
    FileRegion {
        path: PathBuf,
        offset: u64,
        length: u64,
    },
}

impl Body {
    pub fn empty() -> Self {
        Body::Bytes(Bytes::new())
    }

    pub fn len(&self) -> u64 {
        match self {
            Body::Bytes(b) => b.len() as u64,
            Body::FileRegion { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialise the payload. File regions are read here; the real
    /// client streams them instead.
    pub async fn into_bytes(self) -> std::io::Result<Bytes> {
        match self {
            Body::Bytes(b) => Ok(b),
            Body::FileRegion {
                path,
                offset,
                length,
            } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(offset)).await?;
                let mut buf = vec![0u8; length as usize];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Bytes(b)
    }
}

/// Options bound to the object as a whole. Sent on `PutObject` and
/// `CreateMultipartUpload`; never on individual parts.
#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    pub acl: Option<CannedAcl>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub expires: Option<SystemTime>,
}

#[derive(Debug)]
pub struct PutObjectInput {
    pub bucket: String,
    pub key: String,
    pub body: Body,
    pub metadata: ObjectMetadata,
}

#[derive(Debug, Clone)]
pub struct PutObjectOutput {
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct GetObjectInput {
    pub bucket: String,
    pub key: String,
    /// Byte range in `bytes=<first>-<last>` form, or the whole object.
    pub range: Option<String>,
}

#[derive(Debug)]
pub struct GetObjectOutput {
    pub body: Bytes,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HeadObjectInput {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct HeadObjectOutput {
    pub content_length: u64,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CopyObjectInput {
    pub bucket: String,
    pub key: String,
    /// `<source_bucket>/<source_key>`, passed verbatim.
    pub copy_source: String,
}

#[derive(Debug, Clone)]
pub struct ListObjectsV2Input {
    pub bucket: String,
    pub prefix: String,
    pub continuation_token: Option<String>,
    pub max_keys: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ListObjectsV2Output {
    pub contents: Vec<ObjectSummary>,
    pub next_continuation_token: Option<String>,
}

#[derive(Debug)]
pub struct CreateMultipartUploadInput {
    pub bucket: String,
    pub key: String,
    pub metadata: ObjectMetadata,
}

#[derive(Debug, Clone)]
pub struct CreateMultipartUploadOutput {
    pub upload_id: String,
}

#[derive(Debug)]
pub struct UploadPartInput {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number: i32,
    pub body: Body,
}

#[derive(Debug, Clone)]
pub struct UploadPartOutput {
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct UploadPartCopyInput {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number: i32,
    pub copy_source: String,
    /// `bytes=<first>-<last>` over the source object.
    pub copy_source_range: String,
}

#[derive(Debug, Clone)]
pub struct UploadPartCopyOutput {
    pub etag: String,
}

/// One entry of the part list handed to `CompleteMultipartUpload`.
/// Part numbers are 1-based and must be strictly ascending at completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadInput {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Clone)]
pub struct AbortMultipartUploadInput {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

/// The wire-level contract the engine needs. Implementations must be
/// callable concurrently through an `Arc`.
#[async_trait::async_trait]
pub trait S3Api: Send + Sync {
    async fn put_object(&self, input: PutObjectInput) -> Result<PutObjectOutput, S3ApiError>;

    async fn get_object(&self, input: GetObjectInput) -> Result<GetObjectOutput, S3ApiError>;

    async fn head_object(&self, input: HeadObjectInput) -> Result<HeadObjectOutput, S3ApiError>;

    async fn copy_object(&self, input: CopyObjectInput) -> Result<(), S3ApiError>;

    async fn list_objects_v2(
        &self,
        input: ListObjectsV2Input,
    ) -> Result<ListObjectsV2Output, S3ApiError>;

    async fn create_multipart_upload(
        &self,
        input: CreateMultipartUploadInput,
    ) -> Result<CreateMultipartUploadOutput, S3ApiError>;

    async fn upload_part(&self, input: UploadPartInput) -> Result<UploadPartOutput, S3ApiError>;

    async fn upload_part_copy(
        &self,
        input: UploadPartCopyInput,
    ) -> Result<UploadPartCopyOutput, S3ApiError>;

    async fn complete_multipart_upload(
        &self,
        input: CompleteMultipartUploadInput,
    ) -> Result<(), S3ApiError>;

    async fn abort_multipart_upload(
        &self,
        input: AbortMultipartUploadInput,
    ) -> Result<(), S3ApiError>;
}
