//! The parallel transfer engine.
//!
//! A run classifies its `(source, destination)` pair into one of the
//! upload / download / copy pipelines (recursive or single-object),
//! launches an enumerator that feeds a bounded job channel, and drains the
//! channel with a pool of worker tasks. One semaphore of width `parallel`
//! bounds every in-flight protocol call across all objects.
//!
//! Two independent cancellation tokens drive shutdown:
//!
//! - the **working** token gates all forward progress; it is cancelled by
//!   the first fatal job error or the first signal;
//! - the **cleanup** token gates `CompleteMultipartUpload` and
//!   `AbortMultipartUpload` only, so server-side state can still be
//!   finalised after the working token fires. A second signal cancels it
//!   and abandons cleanup.
//!
//! Cancellation is a normal exit: the run's outcome is an error only if
//! some job failed before the engine unwound.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::EngineOptions;
use crate::s3::{
    AbortMultipartUploadInput, CompleteMultipartUploadInput, CompletedPart, S3Api, S3ApiError,
};
use crate::uri::{derive_key, key_basename, Endpoint};

pub mod copy;
pub mod download;
pub mod source;
pub mod upload;
pub mod walk;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    S3(#[from] S3ApiError),
}

/// Where an upload reads from.
#[derive(Debug, Clone)]
pub(crate) enum UploadSource {
    Path(PathBuf),
    Stdin,
}

/// Where a download writes to.
#[derive(Debug, Clone)]
pub(crate) enum DownloadTarget {
    Path(PathBuf),
    Stdout,
}

/// One object transfer, produced by an enumerator or synthesised for a
/// single-object run.
#[derive(Debug, Clone)]
pub(crate) enum Job {
    Upload {
        source: UploadSource,
        bucket: String,
        key: String,
    },
    Download {
        bucket: String,
        key: String,
        target: DownloadTarget,
    },
    Copy {
        src_bucket: String,
        src_key: String,
        dest_bucket: String,
        dest_key: String,
    },
}

impl Job {
    /// The one-line progress message for this job.
    fn describe(&self) -> String {
        match self {
            Job::Upload {
                source,
                bucket,
                key,
            } => {
                let from = match source {
                    UploadSource::Path(p) => p.display().to_string(),
                    UploadSource::Stdin => "-".to_string(),
                };
                format!("upload: {from} to s3://{bucket}/{key}")
            }
            Job::Download {
                bucket,
                key,
                target,
            } => {
                let to = match target {
                    DownloadTarget::Path(p) => p.display().to_string(),
                    DownloadTarget::Stdout => "-".to_string(),
                };
                format!("download: s3://{bucket}/{key} to {to}")
            }
            Job::Copy {
                src_bucket,
                src_key,
                dest_bucket,
                dest_key,
            } => {
                format!("copy: s3://{src_bucket}/{src_key} to s3://{dest_bucket}/{dest_key}")
            }
        }
    }
}

/// The transfer engine. Shared across worker and part tasks via `Arc`.
pub struct Engine {
    pub(crate) api: Arc<dyn S3Api>,
    pub(crate) options: EngineOptions,
    semaphore: Arc<Semaphore>,
    work_token: CancellationToken,
    cleanup_token: CancellationToken,
    error: Mutex<Option<TransferError>>,
}

impl Engine {
    pub fn new(api: Arc<dyn S3Api>, options: EngineOptions) -> Arc<Self> {
        let parallel = options.effective_parallel();
        Arc::new(Self {
            api,
            options,
            semaphore: Arc::new(Semaphore::new(parallel)),
            work_token: CancellationToken::new(),
            cleanup_token: CancellationToken::new(),
            error: Mutex::new(None),
        })
    }

    /// Take a pool slot, or `None` if the working context was cancelled
    /// first. The slot is returned by dropping the permit.
    pub(crate) async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            _ = self.work_token.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        }
    }

    /// Run a forward-progress operation under the working context.
    /// `None` means the context was cancelled before the operation finished.
    pub(crate) async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            _ = self.work_token.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Run a finalisation operation under the cleanup context, which
    /// survives the first cancellation.
    pub(crate) async fn guard_cleanup<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            _ = self.cleanup_token.cancelled() => None,
            out = fut => Some(out),
        }
    }

    pub(crate) fn work_cancelled(&self) -> bool {
        self.work_token.is_cancelled()
    }

    /// Record a fatal job error and cancel the working context. The first
    /// error becomes the run's outcome; errors observed while unwinding
    /// are logged and dropped.
    pub(crate) fn set_error(&self, err: TransferError) {
        if self.work_token.is_cancelled() {
            tracing::debug!(error = %err, "error during unwind suppressed");
            return;
        }
        {
            let mut slot = self.error.lock().unwrap();
            if slot.is_none() {
                eprintln!("Error: {err}");
                *slot = Some(err);
            } else {
                tracing::debug!(error = %err, "duplicate error suppressed");
            }
        }
        self.work_token.cancel();
    }

    /// Finalise a multipart upload after its completion barrier: abort if
    /// the working context was cancelled, otherwise sort the collected
    /// parts and complete. Both finalisers run on the cleanup context, and
    /// a failed complete is still followed by a best-effort abort so no
    /// in-progress upload outlives the run.
    pub(crate) async fn finish_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), TransferError> {
        if self.work_cancelled() {
            self.abort_multipart(bucket, key, upload_id).await;
            return Ok(());
        }
        let mut parts = parts;
        parts.sort_by_key(|p| p.part_number);
        let input = CompleteMultipartUploadInput {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            parts,
        };
        match self
            .guard_cleanup(self.api.complete_multipart_upload(input))
            .await
        {
            None => Ok(()),
            Some(Ok(())) => Ok(()),
            Some(Err(err)) => {
                self.abort_multipart(bucket, key, upload_id).await;
                Err(err.into())
            }
        }
    }

    /// Best-effort abort on the cleanup context. Failures never affect the
    /// run's outcome; they are reported on the error stream only.
    pub(crate) async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) {
        let input = AbortMultipartUploadInput {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        };
        match self
            .guard_cleanup(self.api.abort_multipart_upload(input))
            .await
        {
            None => {
                tracing::warn!(upload_id, "abort abandoned, cleanup context cancelled");
            }
            Some(Err(err)) => {
                eprintln!("failed to abort multipart upload: {err}");
            }
            Some(Ok(())) => {}
        }
    }

    /// Run a `cp` invocation. Returns the first job error, or `Ok` when
    /// every job succeeded or the run was cancelled before any error.
    pub async fn run(self: Arc<Self>, src: &str, dest: &str) -> Result<(), TransferError> {
        let source = Endpoint::parse(src);
        let dest = Endpoint::parse(dest);
        self.spawn_signal_watcher();

        let parallel = self.options.effective_parallel();
        let (tx, rx) = mpsc::channel::<Job>(parallel);
        let producer = Arc::clone(&self).spawn_producer(source, dest, tx)?;

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut workers = JoinSet::new();
        for _ in 0..parallel {
            let engine = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            workers.spawn(async move { engine.worker(rx).await });
        }
        while workers.join_next().await.is_some() {}
        let _ = producer.await;

        match self.error.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Launch the enumerator (or synthesise the single job) feeding the
    /// worker pool. Mode validation happens here, before any network call.
    fn spawn_producer(
        self: Arc<Self>,
        source: Endpoint,
        dest: Endpoint,
        tx: mpsc::Sender<Job>,
    ) -> Result<tokio::task::JoinHandle<()>, TransferError> {
        let recursive = self.options.recursive;
        let engine = self;
        match (source, dest) {
            (Endpoint::Local(path), Endpoint::Remote { bucket, key }) => {
                if recursive {
                    Ok(tokio::spawn(async move {
                        walk::tree_jobs(engine, path, bucket, key, tx).await;
                    }))
                } else {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .ok_or_else(|| {
                            TransferError::Validation(format!(
                                "cannot derive an object key from {}",
                                path.display()
                            ))
                        })?;
                    let job = Job::Upload {
                        source: UploadSource::Path(path),
                        bucket,
                        key: derive_key(&key, &name),
                    };
                    Ok(tokio::spawn(async move {
                        walk::send_job(&engine, &tx, job).await;
                    }))
                }
            }
            (Endpoint::Stdio, Endpoint::Remote { bucket, key }) => {
                if recursive {
                    return Err(TransferError::Validation(
                        "--recursive cannot be combined with a standard-input source".into(),
                    ));
                }
                if key.is_empty() || key.ends_with('/') {
                    return Err(TransferError::Validation(
                        "a full object key is required when uploading from standard input".into(),
                    ));
                }
                let job = Job::Upload {
                    source: UploadSource::Stdin,
                    bucket,
                    key,
                };
                Ok(tokio::spawn(async move {
                    walk::send_job(&engine, &tx, job).await;
                }))
            }
            (Endpoint::Remote { bucket, key }, Endpoint::Local(path)) => {
                if recursive {
                    Ok(tokio::spawn(async move {
                        walk::prefix_download_jobs(engine, bucket, key, path, tx).await;
                    }))
                } else {
                    Ok(tokio::spawn(async move {
                        let target = match tokio::fs::metadata(&path).await {
                            Ok(meta) if meta.is_dir() => path.join(key_basename(&key)),
                            _ => path,
                        };
                        let job = Job::Download {
                            bucket,
                            key,
                            target: DownloadTarget::Path(target),
                        };
                        walk::send_job(&engine, &tx, job).await;
                    }))
                }
            }
            (Endpoint::Remote { bucket, key }, Endpoint::Stdio) => {
                if recursive {
                    return Err(TransferError::Validation(
                        "--recursive cannot be combined with a standard-output destination".into(),
                    ));
                }
                let job = Job::Download {
                    bucket,
                    key,
                    target: DownloadTarget::Stdout,
                };
                Ok(tokio::spawn(async move {
                    walk::send_job(&engine, &tx, job).await;
                }))
            }
            (
                Endpoint::Remote {
                    bucket: src_bucket,
                    key: src_key,
                },
                Endpoint::Remote {
                    bucket: dest_bucket,
                    key: dest_key,
                },
            ) => {
                if recursive {
                    Ok(tokio::spawn(async move {
                        walk::prefix_copy_jobs(
                            engine,
                            src_bucket,
                            src_key,
                            dest_bucket,
                            dest_key,
                            tx,
                        )
                        .await;
                    }))
                } else {
                    let job = Job::Copy {
                        dest_key: derive_key(&dest_key, key_basename(&src_key)),
                        src_bucket,
                        src_key,
                        dest_bucket,
                    };
                    Ok(tokio::spawn(async move {
                        walk::send_job(&engine, &tx, job).await;
                    }))
                }
            }
            _ => Err(TransferError::Validation(
                "either the source or the destination must be an s3:// URI".into(),
            )),
        }
    }

    async fn worker(self: Arc<Self>, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>) {
        loop {
            let job = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    _ = self.work_token.cancelled() => return,
                    job = rx.recv() => match job {
                        Some(job) => job,
                        None => return,
                    },
                }
            };
            Arc::clone(&self).process(job).await;
        }
    }

    async fn process(self: Arc<Self>, job: Job) {
        let line = job.describe();
        if self.options.dryrun {
            eprintln!("(dryrun) {line}");
            return;
        }
        eprintln!("{line}");

        let result = match job {
            Job::Upload {
                source,
                bucket,
                key,
            } => {
                let chunk_size = self.options.part_size;
                let src = match source {
                    UploadSource::Path(path) => {
                        source::ChunkSource::from_path(&path, chunk_size).await
                    }
                    UploadSource::Stdin => Ok(source::ChunkSource::stdin(chunk_size)),
                };
                match src {
                    Ok(src) => upload::Uploader::new(Arc::clone(&self), bucket, key).run(src).await,
                    Err(err) => Err(err.into()),
                }
            }
            Job::Download {
                bucket,
                key,
                target,
            } => {
                let downloader = download::Downloader::new(Arc::clone(&self), bucket, key);
                match target {
                    DownloadTarget::Path(path) => downloader.to_path(&path).await,
                    DownloadTarget::Stdout => {
                        let mut stdout = tokio::io::stdout();
                        downloader.to_writer(&mut stdout).await
                    }
                }
            }
            Job::Copy {
                src_bucket,
                src_key,
                dest_bucket,
                dest_key,
            } => {
                copy::Copier::new(Arc::clone(&self), src_bucket, src_key, dest_bucket, dest_key)
                    .run()
                    .await
            }
        };
        if let Err(err) = result {
            self.set_error(err);
        }
    }

    /// Install signal handling with escalation: the first interrupt,
    /// hangup or terminate cancels the working context; a second cancels
    /// the cleanup context and abandons in-flight aborts.
    fn spawn_signal_watcher(&self) {
        let work = self.work_token.clone();
        let cleanup = self.cleanup_token.clone();
        tokio::spawn(async move {
            if wait_for_signal().await.is_err() {
                return;
            }
            tracing::warn!("signal received, cancelling transfers");
            work.cancel();
            if wait_for_signal().await.is_err() {
                return;
            }
            tracing::warn!("second signal received, abandoning cleanup");
            cleanup.cancel();
        });
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = hangup.recv() => {}
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_descriptions() {
        let job = Job::Upload {
            source: UploadSource::Stdin,
            bucket: "b".into(),
            key: "k".into(),
        };
        assert_eq!(job.describe(), "upload: - to s3://b/k");

        let job = Job::Copy {
            src_bucket: "a".into(),
            src_key: "x".into(),
            dest_bucket: "b".into(),
            dest_key: "y".into(),
        };
        assert_eq!(job.describe(), "copy: s3://a/x to s3://b/y");
    }
}
