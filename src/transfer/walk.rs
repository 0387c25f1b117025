//! Enumerators: lazy producers of transfer jobs.
//!
//! The tree enumerator walks a local directory; the prefix enumerator
//! pages through `ListObjectsV2`. Both push into the bounded job channel,
//! so read-ahead is capped at one job per worker, and both stop as soon as
//! the working context is cancelled.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::s3::{ListObjectsV2Input, ObjectSummary};
use crate::uri::{join_key, key_to_path, relative_key};

use super::{DownloadTarget, Engine, Job, UploadSource};

/// Send one job, giving up when the working context is cancelled.
/// Returns `false` when the enumerator should stop.
pub(crate) async fn send_job(engine: &Engine, tx: &mpsc::Sender<Job>, job: Job) -> bool {
    matches!(engine.guard(tx.send(job)).await, Some(Ok(())))
}

/// Emit one upload job per file under `root`. Symlinked directories are
/// traversed only when follow-symlinks is enabled; symlinks to files are
/// uploaded like files.
pub(crate) async fn tree_jobs(
    engine: std::sync::Arc<Engine>,
    root: PathBuf,
    bucket: String,
    prefix: String,
    tx: mpsc::Sender<Job>,
) {
    if let Err(err) = walk_dir(&engine, &root, root.clone(), &bucket, &prefix, &tx).await {
        engine.set_error(err.into());
    }
}

fn walk_dir<'a>(
    engine: &'a Engine,
    root: &'a Path,
    dir: PathBuf,
    bucket: &'a str,
    prefix: &'a str,
    tx: &'a mpsc::Sender<Job>,
) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if engine.work_cancelled() {
                return Ok(());
            }
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                walk_dir(engine, root, path, bucket, prefix, tx).await?;
                continue;
            }
            if file_type.is_symlink() {
                // resolve the target to decide between traversal and upload
                let meta = tokio::fs::metadata(&path).await?;
                if meta.is_dir() {
                    if engine.options.follow_symlinks {
                        walk_dir(engine, root, path, bucket, prefix, tx).await?;
                    }
                    continue;
                }
            }
            let Some(rel) = relative_key(root, &path) else {
                continue;
            };
            let job = Job::Upload {
                source: UploadSource::Path(path),
                bucket: bucket.to_string(),
                key: join_key(prefix, &rel),
            };
            if !send_job(engine, tx, job).await {
                return Ok(());
            }
        }
        Ok(())
    })
}

/// A source prefix gets a trailing `/` appended (unless empty), so that
/// `foo` matches `foo/bar` but not `foo.zip`.
fn normalize_prefix(key: &str) -> String {
    if !key.is_empty() && !key.ends_with('/') {
        format!("{key}/")
    } else {
        key.to_string()
    }
}

async fn list_prefix(
    engine: &Engine,
    bucket: &str,
    prefix: &str,
    tx: &mpsc::Sender<Job>,
    mut make_job: impl FnMut(&ObjectSummary) -> Job,
) {
    let mut token: Option<String> = None;
    loop {
        let input = ListObjectsV2Input {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            continuation_token: token.take(),
            max_keys: None,
        };
        let page = match engine.guard(engine.api.list_objects_v2(input)).await {
            None => return,
            Some(Ok(page)) => page,
            Some(Err(err)) => {
                engine.set_error(err.into());
                return;
            }
        };
        for obj in &page.contents {
            if !send_job(engine, tx, make_job(obj)).await {
                return;
            }
        }
        match page.next_continuation_token {
            Some(next) => token = Some(next),
            None => return,
        }
    }
}

/// Emit one download job per object under the prefix, reconstructing the
/// local path from the key suffix.
pub(crate) async fn prefix_download_jobs(
    engine: std::sync::Arc<Engine>,
    bucket: String,
    key: String,
    dest_root: PathBuf,
    tx: mpsc::Sender<Job>,
) {
    let prefix = normalize_prefix(&key);
    list_prefix(&engine, &bucket, &prefix, &tx, |obj| {
        let rel = obj.key.strip_prefix(&prefix).unwrap_or(&obj.key);
        Job::Download {
            bucket: bucket.clone(),
            key: obj.key.clone(),
            target: DownloadTarget::Path(key_to_path(&dest_root, rel)),
        }
    })
    .await;
}

/// Emit one server-side copy job per object under the source prefix.
pub(crate) async fn prefix_copy_jobs(
    engine: std::sync::Arc<Engine>,
    src_bucket: String,
    src_key: String,
    dest_bucket: String,
    dest_prefix: String,
    tx: mpsc::Sender<Job>,
) {
    let prefix = normalize_prefix(&src_key);
    list_prefix(&engine, &src_bucket, &prefix, &tx, |obj| {
        let rel = obj.key.strip_prefix(&prefix).unwrap_or(&obj.key);
        Job::Copy {
            src_bucket: src_bucket.clone(),
            src_key: obj.key.clone(),
            dest_bucket: dest_bucket.clone(),
            dest_key: join_key(&dest_prefix, rel),
        }
    })
    .await;
}
