use crate::catalog::{CatalogClient, ProductHandle};
use crate::metrics;
use crate::models::RecordId;
use std::{path::PathBuf, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Image waiting to be attached to a freshly created product.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub stock_id: RecordId,
    pub path: PathBuf,
    pub product: ProductHandle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadFailure {
    pub stock_id: RecordId,
    pub detail: String,
}

/// Joined result of every upload submitted to a pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: Vec<UploadFailure>,
}

impl UploadReport {
    fn merge(&mut self, other: UploadReport) {
        self.uploaded += other.uploaded;
        self.failed.extend(other.failed);
    }
}

/// Fixed set of workers draining one bounded queue of uploads.
pub struct UploadPool {
    tx: mpsc::Sender<UploadJob>,
    workers: Vec<JoinHandle<UploadReport>>,
}

impl UploadPool {
    pub fn spawn(catalog: Arc<dyn CatalogClient>, workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<UploadJob>(workers * 4);
        let rx = Arc::new(Mutex::new(rx));
        let handles = (0..workers)
            .map(|worker| {
                let rx = rx.clone();
                let catalog = catalog.clone();
                tokio::spawn(async move {
                    let mut report = UploadReport::default();
                    loop {
                        let next = { rx.lock().await.recv().await };
                        let Some(job) = next else { break };
                        match catalog.upload_image(&job.path, &job.product).await {
                            Ok(()) => {
                                debug!(
                                    target = "catalog_sync.uploads",
                                    worker,
                                    stock_id = job.stock_id,
                                    path = %job.path.display(),
                                    "image_uploaded"
                                );
                                metrics::action_recorded("image", "ok");
                                report.uploaded += 1;
                            }
                            Err(err) => {
                                warn!(
                                    target = "catalog_sync.uploads",
                                    worker,
                                    stock_id = job.stock_id,
                                    error = %err,
                                    "image_upload_failed"
                                );
                                metrics::action_recorded("image", "error");
                                report.failed.push(UploadFailure {
                                    stock_id: job.stock_id,
                                    detail: err.to_string(),
                                });
                            }
                        }
                    }
                    report
                })
            })
            .collect();
        Self {
            tx,
            workers: handles,
        }
    }

    /// Queues an upload, waiting while the queue is full. Hands the job back
    /// if every worker is gone.
    pub async fn submit(&self, job: UploadJob) -> Result<(), UploadJob> {
        self.tx.send(job).await.map_err(|err| err.0)
    }

    /// Closes the queue and waits for every queued upload to finish.
    pub async fn finish(self) -> UploadReport {
        let Self { tx, workers } = self;
        drop(tx);
        let mut report = UploadReport::default();
        for handle in workers {
            match handle.await {
                Ok(partial) => report.merge(partial),
                Err(err) => warn!(
                    target = "catalog_sync.uploads",
                    error = %err,
                    "upload_worker_crashed"
                ),
            }
        }
        report
    }
}
