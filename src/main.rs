//! s3cp - parallel cp for S3-compatible object stores.

use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use s3cp::config::{self, CannedAcl, ClientConfig, ConfigError, EngineOptions};
use s3cp::s3::AwsS3;
use s3cp::transfer::{Engine, TransferError};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Copy files and objects between the local filesystem and S3.
///
/// Each of SOURCE and DESTINATION is a local path, `-` for the standard
/// stream, or an `s3://bucket[/key]` URI.
#[derive(Parser, Debug)]
#[command(name = "s3cp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Transfer source
    source: String,

    /// Transfer destination
    destination: String,

    /// Display the operations that would be performed without running them
    #[arg(long)]
    dryrun: bool,

    /// Transfer every file or object under the source directory or prefix
    #[arg(long)]
    recursive: bool,

    /// Number of parallel transfers (values below 1 fall back to the default)
    #[arg(long, default_value_t = config::DEFAULT_PARALLEL as i64)]
    parallel: i64,

    /// Don't exclude files or objects that match the given pattern
    #[arg(long, value_name = "PATTERN")]
    include: Vec<String>,

    /// Exclude files or objects that match the given pattern
    #[arg(long, value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Canned ACL applied to uploaded objects
    #[arg(long)]
    acl: Option<String>,

    /// Follow symbolic links when uploading a local directory tree (default)
    #[arg(long, overrides_with = "no_follow_symlinks")]
    follow_symlinks: bool,

    /// Never follow symbolic links
    #[arg(long)]
    no_follow_symlinks: bool,

    /// Don't guess the MIME type of uploaded files from their extension
    #[arg(long)]
    no_guess_mime_type: bool,

    /// Explicit content type for uploaded objects
    #[arg(long, value_name = "MIME")]
    content_type: Option<String>,

    /// Cache-Control header stored with uploaded objects
    #[arg(long, value_name = "VALUE")]
    cache_control: Option<String>,

    /// Content-Disposition header stored with uploaded objects
    #[arg(long, value_name = "VALUE")]
    content_disposition: Option<String>,

    /// Content-Encoding header stored with uploaded objects
    #[arg(long, value_name = "VALUE")]
    content_encoding: Option<String>,

    /// Content-Language header stored with uploaded objects
    #[arg(long, value_name = "VALUE")]
    content_language: Option<String>,

    /// Expiry timestamp (RFC 3339) stored with uploaded objects
    #[arg(long, value_name = "TIMESTAMP")]
    expires: Option<String>,

    /// The region to use, overriding config/env settings
    #[arg(long)]
    region: Option<String>,

    /// Custom endpoint URL (implies path-style addressing)
    #[arg(long)]
    endpoint_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn build_options(args: &Args) -> Result<EngineOptions, ConfigError> {
    let acl = args
        .acl
        .as_deref()
        .map(CannedAcl::from_str)
        .transpose()?;
    let expires = args
        .expires
        .as_deref()
        .map(config::parse_expires)
        .transpose()?;
    Ok(EngineOptions {
        parallel: args.parallel.max(0) as usize,
        dryrun: args.dryrun,
        recursive: args.recursive,
        follow_symlinks: args.follow_symlinks || !args.no_follow_symlinks,
        include: args.include.clone(),
        exclude: args.exclude.clone(),
        acl,
        content_type: args.content_type.clone(),
        no_guess_mime_type: args.no_guess_mime_type,
        cache_control: args.cache_control.clone(),
        content_disposition: args.content_disposition.clone(),
        content_encoding: args.content_encoding.clone(),
        content_language: args.content_language.clone(),
        expires,
        ..EngineOptions::default()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };

    // Initialize logging; diagnostics share stderr with progress lines.
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = match build_options(&args) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    let client_config = ClientConfig {
        region: args.region.clone(),
        endpoint_url: args.endpoint_url.clone(),
    };
    let client = config::make_client(&client_config).await;
    let engine = Engine::new(Arc::new(AwsS3::new(client)), options);

    if let Err(err) = engine.run(&args.source, &args.destination).await {
        // job errors were already reported when first observed
        if matches!(err, TransferError::Validation(_)) {
            eprintln!("Error: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}
