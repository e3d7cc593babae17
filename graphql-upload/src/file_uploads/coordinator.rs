//! Concurrent storage of the uploaded files of one request.
//!
//! Every pending file task runs as its own tokio task, at most `max_concurrency` of them at
//! a time. The operations are only touched once all tasks have finished: each task returns the
//! descriptor of its file and the descriptors are written at the locations that were resolved
//! before the first task started.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;

use super::Result as UploadResult;
use super::config::FileUploadsConfig;
use super::error::FileUploadError;
use super::multipart_request::MultipartRequest;
use super::persist::persist;
use super::substitute::PendingFileTask;
use crate::upload::Upload;

type TaskOutput = (usize, UploadResult<Upload>);

/// Stores every pending file and writes its descriptor into `operations`.
///
/// Returns the stored files, keyed by the multipart field they came from, in task order. If
/// any task failed, the first failure is returned once every task has finished, the files
/// stored by the other tasks are removed and `operations` is left untouched.
pub(crate) async fn run(
    operations: &mut Value,
    tasks: Vec<PendingFileTask>,
    request: Arc<MultipartRequest>,
    config: &FileUploadsConfig,
) -> UploadResult<Vec<(String, Upload)>> {
    let storage = Arc::new(config.storage.clone());
    run_units(operations, tasks, config.max_concurrency, move |task| {
        let request = request.clone();
        let storage = storage.clone();
        let field = task.field.clone();
        async move { persist(&request, &field, &storage).await }
    })
    .await
}

async fn run_units<F, Fut>(
    operations: &mut Value,
    tasks: Vec<PendingFileTask>,
    max_concurrency: usize,
    store: F,
) -> UploadResult<Vec<(String, Upload)>>
where
    F: Fn(&PendingFileTask) -> Fut,
    Fut: Future<Output = UploadResult<Upload>> + Send + 'static,
{
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    let max_concurrency = max_concurrency.max(1);
    let mut join_set: JoinSet<TaskOutput> = JoinSet::new();
    let mut outputs = Vec::with_capacity(tasks.len());
    let mut failures = Vec::new();

    for (index, task) in tasks.iter().enumerate() {
        while join_set.len() >= max_concurrency {
            if let Some(joined) = join_set.join_next().await {
                collect(joined, &mut outputs, &mut failures);
            }
        }

        tracing::debug!(field = %task.field, location = %task.location, "storing uploaded file");
        let stored = store(task);
        join_set.spawn(async move { (index, stored.await) });
    }

    // Nothing is written before every task is done.
    while let Some(joined) = join_set.join_next().await {
        collect(joined, &mut outputs, &mut failures);
    }

    if let Some(failure) = failures.into_iter().next() {
        discard(outputs.into_iter().map(|(_, upload)| upload)).await;
        return Err(failure);
    }

    outputs.sort_by_key(|(index, _)| *index);
    let spliced = outputs.iter().try_for_each(|(index, upload)| {
        let descriptor = serde_json::to_value(upload).map_err(FileUploadError::Serialization)?;
        tasks[*index].location.assign(operations, descriptor)
    });
    if let Err(error) = spliced {
        discard(outputs.into_iter().map(|(_, upload)| upload)).await;
        return Err(error);
    }

    Ok(outputs
        .into_iter()
        .map(|(index, upload)| (tasks[index].field.clone(), upload))
        .collect())
}

fn collect(
    joined: Result<TaskOutput, tokio::task::JoinError>,
    outputs: &mut Vec<(usize, Upload)>,
    failures: &mut Vec<FileUploadError>,
) {
    match joined {
        Ok((index, Ok(upload))) => outputs.push((index, upload)),
        Ok((index, Err(error))) => {
            tracing::error!(task = index, %error, "failed to store uploaded file");
            failures.push(error);
        }
        Err(error) => {
            tracing::error!(%error, "file upload task did not complete");
            failures.push(error.into());
        }
    }
}

/// Removes stored files that will never reach a downstream service.
pub(crate) async fn discard(uploads: impl IntoIterator<Item = Upload>) {
    for upload in uploads {
        match tokio::fs::remove_file(upload.filepath()).await {
            Ok(()) => tracing::debug!(path = %upload.filepath().display(), "removed stored file"),
            Err(error) => tracing::warn!(
                path = %upload.filepath().display(),
                %error,
                "could not remove stored file"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::body;
    use crate::file_uploads::config::ArrayIndexing;
    use crate::file_uploads::config::StorageConfig;
    use crate::file_uploads::multipart_request::test_support::MultipartBody;
    use crate::file_uploads::path::resolve;

    async fn request(body: MultipartBody) -> Arc<MultipartRequest> {
        Arc::new(
            MultipartRequest::read(
                body::full(body.finish()),
                MultipartBody::BOUNDARY.to_string(),
                Default::default(),
            )
            .await
            .unwrap(),
        )
    }

    fn config(directory: &Path, max_concurrency: usize) -> FileUploadsConfig {
        FileUploadsConfig {
            max_concurrency,
            storage: StorageConfig {
                directory: Some(directory.to_path_buf()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn task(operations: &Value, field: &str, path: &str) -> PendingFileTask {
        PendingFileTask {
            field: field.to_string(),
            location: resolve(operations, path, ArrayIndexing::Explicit).unwrap(),
        }
    }

    #[tokio::test]
    async fn it_stores_disjoint_files() {
        let dir = tempfile::tempdir().unwrap();
        let request = request(
            MultipartBody::new()
                .file("a", "a.txt", "text/plain", b"content of a")
                .file("b", "b.png", "image/png", b"content of b"),
        )
        .await;
        let mut operations = json!({ "variables": { "fileA": null, "fileB": null } });
        let tasks = vec![
            task(&operations, "a", "variables.fileA"),
            task(&operations, "b", "variables.fileB"),
        ];

        let uploads = run(&mut operations, tasks, request, &config(dir.path(), 4))
            .await
            .unwrap();

        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].0, "a");
        assert_eq!(uploads[1].0, "b");
        let file_a = Upload::from_graphql_input(&operations["variables"]["fileA"]).unwrap();
        let file_b = Upload::from_graphql_input(&operations["variables"]["fileB"]).unwrap();
        assert_eq!(file_a.filename(), "a.txt");
        assert_eq!(file_b.mimetype(), "image/png");
        assert_eq!(std::fs::read(file_a.filepath()).unwrap(), b"content of a");
        assert_eq!(std::fs::read(file_b.filepath()).unwrap(), b"content of b");
    }

    #[tokio::test]
    async fn it_stores_with_a_single_worker() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = MultipartBody::new();
        let mut operations = json!({ "variables": { "files": [] } });
        for index in 0..5 {
            body = body.file(
                &format!("{index}"),
                &format!("{index}.txt"),
                "text/plain",
                format!("file {index}").as_bytes(),
            );
            operations["variables"]["files"]
                .as_array_mut()
                .unwrap()
                .push(Value::Null);
        }
        let request = request(body).await;
        let tasks = (0..5)
            .map(|index| {
                task(
                    &operations,
                    &format!("{index}"),
                    &format!("variables.files.{index}"),
                )
            })
            .collect();

        let uploads = run(&mut operations, tasks, request, &config(dir.path(), 1))
            .await
            .unwrap();

        assert_eq!(uploads.len(), 5);
        for index in 0..5 {
            let upload =
                Upload::from_graphql_input(&operations["variables"]["files"][index]).unwrap();
            assert_eq!(upload.filename(), format!("{index}.txt"));
            assert_eq!(
                std::fs::read(upload.filepath()).unwrap(),
                format!("file {index}").as_bytes()
            );
        }
    }

    #[tokio::test]
    async fn it_removes_stored_files_when_a_task_fails() {
        let dir = tempfile::tempdir().unwrap();
        let request = request(MultipartBody::new().file("a", "a.txt", "text/plain", b"a")).await;
        let mut operations = json!({ "variables": { "fileA": null, "missing": null } });
        let tasks = vec![
            task(&operations, "a", "variables.fileA"),
            task(&operations, "missing", "variables.missing"),
        ];

        let error = run(&mut operations, tasks, request, &config(dir.path(), 4))
            .await
            .unwrap_err();

        assert!(matches!(error, FileUploadError::FileAccess { field, .. } if field == "missing"));
        assert_eq!(
            operations,
            json!({ "variables": { "fileA": null, "missing": null } })
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn it_never_exceeds_max_concurrency() {
        let count = 10;
        let mut operations = json!({ "variables": { "files": vec![Value::Null; count] } });
        let tasks = (0..count)
            .map(|index| {
                task(
                    &operations,
                    &index.to_string(),
                    &format!("variables.files.{index}"),
                )
            })
            .collect();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let uploads = run_units(&mut operations, tasks, 3, |task| {
            let running = running.clone();
            let peak = peak.clone();
            let field = task.field.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(Upload::new(
                    format!("{field}.txt"),
                    "text/plain".to_string(),
                    PathBuf::from(format!("/uploads/{field}.txt")),
                ))
            }
        })
        .await
        .unwrap();

        assert_eq!(uploads.len(), count);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        for index in 0..count {
            let upload =
                Upload::from_graphql_input(&operations["variables"]["files"][index]).unwrap();
            assert_eq!(upload.filename(), format!("{index}.txt"));
        }
    }

    #[tokio::test]
    async fn it_waits_for_slow_tasks_before_failing() {
        let dir = tempfile::tempdir().unwrap();
        let stored = dir.path().join("slow.txt");
        std::fs::write(&stored, b"slow").unwrap();
        let mut operations = json!({ "variables": { "slow": null, "broken": null } });
        let tasks = vec![
            task(&operations, "slow", "variables.slow"),
            task(&operations, "broken", "variables.broken"),
        ];

        let error = run_units(&mut operations, tasks, 2, |task| {
            let field = task.field.clone();
            let stored = stored.clone();
            async move {
                if field == "broken" {
                    return Err(FileUploadError::FileAccess {
                        field,
                        reason: "gone".to_string(),
                    });
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Upload::new(
                    "slow.txt".to_string(),
                    "text/plain".to_string(),
                    stored,
                ))
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(error, FileUploadError::FileAccess { field, .. } if field == "broken"));
        // The slow task finished and its file was removed along with the failed request.
        assert!(!stored.exists());
        assert_eq!(operations["variables"]["slow"], Value::Null);
    }
}
