//! Engine configuration.
//!
//! All knobs are carried in an explicit [`EngineOptions`] value threaded
//! from the command-line parser into the engine; there is no process-wide
//! flag state. Validation of closed-set and timestamp flags happens here,
//! before any network call.

use std::str::FromStr;
use std::time::SystemTime;

use aws_sdk_s3::config::Region;
use thiserror::Error;

/// Default part size for multipart transfers: the protocol minimum of
/// 5 MiB (smaller is rejected for every part but the last).
pub const DEFAULT_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Largest object a single `CopyObject` call may move: 5 GiB.
pub const DEFAULT_MAX_COPY_OBJECT_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Default worker-pool width.
pub const DEFAULT_PARALLEL: usize = 4;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid canned ACL: {0:?}")]
    InvalidAcl(String),

    #[error("invalid --expires timestamp (want RFC 3339): {0:?}")]
    InvalidExpires(String),
}

/// Canned ACLs accepted by the store. Anything else is a validation error
/// detected before the first request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CannedAcl {
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    AwsExecRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

impl CannedAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            CannedAcl::Private => "private",
            CannedAcl::PublicRead => "public-read",
            CannedAcl::PublicReadWrite => "public-read-write",
            CannedAcl::AuthenticatedRead => "authenticated-read",
            CannedAcl::AwsExecRead => "aws-exec-read",
            CannedAcl::BucketOwnerRead => "bucket-owner-read",
            CannedAcl::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }
}

impl FromStr for CannedAcl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(CannedAcl::Private),
            "public-read" => Ok(CannedAcl::PublicRead),
            "public-read-write" => Ok(CannedAcl::PublicReadWrite),
            "authenticated-read" => Ok(CannedAcl::AuthenticatedRead),
            "aws-exec-read" => Ok(CannedAcl::AwsExecRead),
            "bucket-owner-read" => Ok(CannedAcl::BucketOwnerRead),
            "bucket-owner-full-control" => Ok(CannedAcl::BucketOwnerFullControl),
            _ => Err(ConfigError::InvalidAcl(s.to_string())),
        }
    }
}

/// Parse an `--expires` value as an RFC 3339 timestamp.
pub fn parse_expires(s: &str) -> Result<SystemTime, ConfigError> {
    let dt = chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|_| ConfigError::InvalidExpires(s.to_string()))?;
    Ok(dt.into())
}

/// Per-run engine options.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Worker-pool width; also the bound on in-flight protocol calls and
    /// the job-channel capacity.
    pub parallel: usize,
    /// Print operations without performing mutating calls.
    pub dryrun: bool,
    /// Treat the source as a directory or key prefix.
    pub recursive: bool,
    /// Traverse symlinked directories during local tree walks.
    pub follow_symlinks: bool,
    /// Accepted for CLI compatibility; not applied.
    pub include: Vec<String>,
    /// Accepted for CLI compatibility; not applied.
    pub exclude: Vec<String>,
    pub acl: Option<CannedAcl>,
    /// Explicit content-type override; wins over guessing.
    pub content_type: Option<String>,
    /// Disable extension-based MIME lookup.
    pub no_guess_mime_type: bool,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub expires: Option<SystemTime>,
    /// Chunk size for multipart transfers. Overridable in tests.
    pub part_size: u64,
    /// Threshold above which a server-side copy switches to multipart.
    /// Overridable in tests.
    pub max_copy_object_bytes: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            parallel: DEFAULT_PARALLEL,
            dryrun: false,
            recursive: false,
            follow_symlinks: true,
            include: Vec::new(),
            exclude: Vec::new(),
            acl: None,
            content_type: None,
            no_guess_mime_type: false,
            cache_control: None,
            content_disposition: None,
            content_encoding: None,
            content_language: None,
            expires: None,
            part_size: DEFAULT_PART_SIZE,
            max_copy_object_bytes: DEFAULT_MAX_COPY_OBJECT_BYTES,
        }
    }
}

impl EngineOptions {
    /// Worker-pool width, with non-positive values clamped to the default.
    pub fn effective_parallel(&self) -> usize {
        if self.parallel == 0 {
            DEFAULT_PARALLEL
        } else {
            self.parallel
        }
    }
}

/// How to reach the store.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Region override; otherwise the default provider chain decides.
    pub region: Option<String>,
    /// Custom endpoint (minio and friends). Forces path-style addressing.
    pub endpoint_url: Option<String>,
}

/// Build the SDK client from the default provider chain plus overrides.
pub async fn make_client(cfg: &ClientConfig) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = &cfg.region {
        loader = loader.region(Region::new(region.clone()));
    }
    let sdk_config = loader.load().await;

    let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
    if let Some(endpoint) = &cfg.endpoint_url {
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }
    aws_sdk_s3::Client::from_conf(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acl_round_trips() {
        for s in [
            "private",
            "public-read",
            "public-read-write",
            "authenticated-read",
            "aws-exec-read",
            "bucket-owner-read",
            "bucket-owner-full-control",
        ] {
            assert_eq!(CannedAcl::from_str(s).unwrap().as_str(), s);
        }
    }

    #[test]
    fn acl_rejects_unknown() {
        assert!(matches!(
            CannedAcl::from_str("public"),
            Err(ConfigError::InvalidAcl(_))
        ));
    }

    #[test]
    fn expires_parses_rfc3339() {
        assert!(parse_expires("2026-01-02T15:04:05Z").is_ok());
        assert!(parse_expires("2026-01-02T15:04:05+09:00").is_ok());
        assert!(matches!(
            parse_expires("tomorrow"),
            Err(ConfigError::InvalidExpires(_))
        ));
    }

    #[test]
    fn parallel_clamps_to_default() {
        let opts = EngineOptions {
            parallel: 0,
            ..EngineOptions::default()
        };
        assert_eq!(opts.effective_parallel(), DEFAULT_PARALLEL);
        let opts = EngineOptions::default();
        assert_eq!(opts.effective_parallel(), DEFAULT_PARALLEL);
    }
}
