//! s3cp library
//!
//! A parallel `cp` for S3-compatible object stores: upload, download and
//! server-side copy, single objects or whole trees/prefixes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use s3cp::config::{ClientConfig, EngineOptions};
//! use s3cp::s3::AwsS3;
//! use s3cp::transfer::Engine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = s3cp::config::make_client(&ClientConfig::default()).await;
//!     let engine = Engine::new(Arc::new(AwsS3::new(client)), EngineOptions::default());
//!     engine.run("./report.pdf", "s3://bucket/reports/").await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod mime;
pub mod s3;
pub mod transfer;
pub mod uri;

// Re-export commonly used types
pub use config::EngineOptions;
pub use transfer::Engine;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
