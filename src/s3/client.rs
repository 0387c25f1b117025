//! The aws-sdk-s3 implementation of the protocol surface.
//!
//! All operations are instrumented with spans carrying `s3.bucket`,
//! `s3.key` and, for multipart calls, `s3.upload_id` attributes.

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as SdkCompletedPart, ObjectCannedAcl,
};
use aws_smithy_types::byte_stream::Length;

use super::{
    AbortMultipartUploadInput, Body, CompleteMultipartUploadInput, CopyObjectInput,
    CreateMultipartUploadInput, CreateMultipartUploadOutput, GetObjectInput, GetObjectOutput,
    HeadObjectInput, HeadObjectOutput, ListObjectsV2Input, ListObjectsV2Output, ObjectMetadata,
    ObjectSummary, PutObjectInput, PutObjectOutput, S3Api, S3ApiError, UploadPartCopyInput,
    UploadPartCopyOutput, UploadPartInput, UploadPartOutput,
};

/// The real store client.
pub struct AwsS3 {
    client: aws_sdk_s3::Client,
}

impl AwsS3 {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

async fn to_byte_stream(body: Body, operation: &'static str) -> Result<ByteStream, S3ApiError> {
    match body {
        Body::Bytes(b) => Ok(ByteStream::from(b)),
        Body::FileRegion {
            path,
            offset,
            length,
        } => ByteStream::read_from()
            .path(path)
            .offset(offset)
            .length(Length::Exact(length))
            .build()
            .await
            .map_err(|e| S3ApiError::request(operation, e)),
    }
}

fn acl_of(metadata: &ObjectMetadata) -> Option<ObjectCannedAcl> {
    metadata.acl.map(|a| ObjectCannedAcl::from(a.as_str()))
}

#[async_trait::async_trait]
impl S3Api for AwsS3 {
    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, input),
        fields(s3.bucket = %input.bucket, s3.key = %input.key, upload.bytes = input.body.len()),
        err
    )]
    async fn put_object(&self, input: PutObjectInput) -> Result<PutObjectOutput, S3ApiError> {
        let body = to_byte_stream(input.body, "PutObject").await?;
        let meta = input.metadata;
        let out = self
            .client
            .put_object()
            .bucket(input.bucket)
            .key(input.key)
            .body(body)
            .set_acl(acl_of(&meta))
            .set_content_type(meta.content_type)
            .set_cache_control(meta.cache_control)
            .set_content_disposition(meta.content_disposition)
            .set_content_encoding(meta.content_encoding)
            .set_content_language(meta.content_language)
            .set_expires(meta.expires.map(DateTime::from))
            .send()
            .await
            .map_err(|e| S3ApiError::request("PutObject", DisplayErrorContext(&e)))?;
        Ok(PutObjectOutput {
            etag: out.e_tag().unwrap_or_default().to_string(),
        })
    }

    #[tracing::instrument(
        name = "s3.get_object",
        skip(self, input),
        fields(s3.bucket = %input.bucket, s3.key = %input.key, s3.range = ?input.range),
        err
    )]
    async fn get_object(&self, input: GetObjectInput) -> Result<GetObjectOutput, S3ApiError> {
        let resp = self
            .client
            .get_object()
            .bucket(&input.bucket)
            .key(&input.key)
            .set_range(input.range)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    S3ApiError::NoSuchKey {
                        bucket: input.bucket.clone(),
                        key: input.key.clone(),
                    }
                } else {
                    S3ApiError::request("GetObject", DisplayErrorContext(&service))
                }
            })?;
        let content_type = resp.content_type().map(str::to_string);
        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| S3ApiError::request("GetObject", e))?
            .into_bytes();
        Ok(GetObjectOutput { body, content_type })
    }

    #[tracing::instrument(
        name = "s3.head_object",
        skip(self, input),
        fields(s3.bucket = %input.bucket, s3.key = %input.key),
        err
    )]
    async fn head_object(&self, input: HeadObjectInput) -> Result<HeadObjectOutput, S3ApiError> {
        let out = self
            .client
            .head_object()
            .bucket(&input.bucket)
            .key(&input.key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_not_found() {
                    S3ApiError::NoSuchKey {
                        bucket: input.bucket.clone(),
                        key: input.key.clone(),
                    }
                } else {
                    S3ApiError::request("HeadObject", DisplayErrorContext(&service))
                }
            })?;
        Ok(HeadObjectOutput {
            content_length: out.content_length().unwrap_or(0).max(0) as u64,
            content_type: out.content_type().map(str::to_string),
        })
    }

    #[tracing::instrument(
        name = "s3.copy_object",
        skip(self, input),
        fields(s3.bucket = %input.bucket, s3.key = %input.key, s3.copy_source = %input.copy_source),
        err
    )]
    async fn copy_object(&self, input: CopyObjectInput) -> Result<(), S3ApiError> {
        self.client
            .copy_object()
            .bucket(input.bucket)
            .key(input.key)
            .copy_source(input.copy_source)
            .send()
            .await
            .map_err(|e| S3ApiError::request("CopyObject", DisplayErrorContext(&e)))?;
        Ok(())
    }

    #[tracing::instrument(
        name = "s3.list_objects_v2",
        skip(self, input),
        fields(s3.bucket = %input.bucket, s3.prefix = %input.prefix),
        err
    )]
    async fn list_objects_v2(
        &self,
        input: ListObjectsV2Input,
    ) -> Result<ListObjectsV2Output, S3ApiError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(input.bucket)
            .prefix(input.prefix)
            .set_continuation_token(input.continuation_token)
            .set_max_keys(input.max_keys)
            .send()
            .await
            .map_err(|e| S3ApiError::request("ListObjectsV2", DisplayErrorContext(&e)))?;
        let contents = resp
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(ObjectSummary {
                    key: obj.key()?.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();
        let next = if resp.is_truncated().unwrap_or(false) {
            resp.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok(ListObjectsV2Output {
            contents,
            next_continuation_token: next,
        })
    }

    #[tracing::instrument(
        name = "s3.create_multipart_upload",
        skip(self, input),
        fields(s3.bucket = %input.bucket, s3.key = %input.key),
        err
    )]
    async fn create_multipart_upload(
        &self,
        input: CreateMultipartUploadInput,
    ) -> Result<CreateMultipartUploadOutput, S3ApiError> {
        let meta = input.metadata;
        let out = self
            .client
            .create_multipart_upload()
            .bucket(input.bucket)
            .key(input.key)
            .set_acl(acl_of(&meta))
            .set_content_type(meta.content_type)
            .set_cache_control(meta.cache_control)
            .set_content_disposition(meta.content_disposition)
            .set_content_encoding(meta.content_encoding)
            .set_content_language(meta.content_language)
            .set_expires(meta.expires.map(DateTime::from))
            .send()
            .await
            .map_err(|e| S3ApiError::request("CreateMultipartUpload", DisplayErrorContext(&e)))?;
        Ok(CreateMultipartUploadOutput {
            upload_id: out.upload_id().unwrap_or_default().to_string(),
        })
    }

    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, input),
        fields(
            s3.bucket = %input.bucket,
            s3.upload_id = %input.upload_id,
            s3.part_number = input.part_number,
            upload.bytes = input.body.len()
        ),
        err
    )]
    async fn upload_part(&self, input: UploadPartInput) -> Result<UploadPartOutput, S3ApiError> {
        let body = to_byte_stream(input.body, "UploadPart").await?;
        let out = self
            .client
            .upload_part()
            .bucket(input.bucket)
            .key(input.key)
            .upload_id(input.upload_id)
            .part_number(input.part_number)
            .body(body)
            .send()
            .await
            .map_err(|e| S3ApiError::request("UploadPart", DisplayErrorContext(&e)))?;
        Ok(UploadPartOutput {
            etag: out.e_tag().unwrap_or_default().to_string(),
        })
    }

    #[tracing::instrument(
        name = "s3.upload_part_copy",
        skip(self, input),
        fields(
            s3.bucket = %input.bucket,
            s3.upload_id = %input.upload_id,
            s3.part_number = input.part_number,
            s3.range = %input.copy_source_range
        ),
        err
    )]
    async fn upload_part_copy(
        &self,
        input: UploadPartCopyInput,
    ) -> Result<UploadPartCopyOutput, S3ApiError> {
        let out = self
            .client
            .upload_part_copy()
            .bucket(input.bucket)
            .key(input.key)
            .upload_id(input.upload_id)
            .part_number(input.part_number)
            .copy_source(input.copy_source)
            .copy_source_range(input.copy_source_range)
            .send()
            .await
            .map_err(|e| S3ApiError::request("UploadPartCopy", DisplayErrorContext(&e)))?;
        let etag = out
            .copy_part_result()
            .and_then(|r| r.e_tag())
            .unwrap_or_default()
            .to_string();
        Ok(UploadPartCopyOutput { etag })
    }

    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, input),
        fields(
            s3.bucket = %input.bucket,
            s3.upload_id = %input.upload_id,
            parts_count = input.parts.len()
        ),
        err
    )]
    async fn complete_multipart_upload(
        &self,
        input: CompleteMultipartUploadInput,
    ) -> Result<(), S3ApiError> {
        let parts: Vec<SdkCompletedPart> = input
            .parts
            .into_iter()
            .map(|p| {
                SdkCompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.etag)
                    .build()
            })
            .collect();
        self.client
            .complete_multipart_upload()
            .bucket(input.bucket)
            .key(input.key)
            .upload_id(input.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| S3ApiError::request("CompleteMultipartUpload", DisplayErrorContext(&e)))?;
        Ok(())
    }

    #[tracing::instrument(
        name = "s3.abort_multipart_upload",
        skip(self, input),
        fields(s3.bucket = %input.bucket, s3.upload_id = %input.upload_id),
        err
    )]
    async fn abort_multipart_upload(
        &self,
        input: AbortMultipartUploadInput,
    ) -> Result<(), S3ApiError> {
        self.client
            .abort_multipart_upload()
            .bucket(input.bucket)
            .key(input.key)
            .upload_id(input.upload_id)
            .send()
            .await
            .map_err(|e| S3ApiError::request("AbortMultipartUpload", DisplayErrorContext(&e)))?;
        Ok(())
    }
}
