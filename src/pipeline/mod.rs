//! The ingestion pipeline: four independently sized worker stages wired
//! together with bounded channels.
//!
//! Stages: Data (fetch + screen) → Persistence (durable write) → Status
//! (outcome triage + conflict repair) → Image (fetch + write to disk). Data
//! flows strictly downstream except the Status→Persistence repair edge,
//! which re-injects shrunk jobs into the job channel.
//!
//! Shutdown drains stage by stage: the orchestrator drops the request
//! sender, joins the data workers, waits for the in-flight job gauge to
//! reach zero, closes the feedback sender (which closes the job channel),
//! then joins each remaining stage in dependency order. The gauge counts
//! every job entering the job channel and counts it down only on terminal
//! resolution, so the job channel is never closed while a repair
//! re-submission can still occur.

pub mod screen;
mod stages;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::model::{Product, ProductLine, Set};
use crate::source::search::SearchParams;
use crate::source::CatalogSource;
use crate::store::{CatalogStore, StoreError};

/// Everything the Data Stage needs to fetch one set's products.
#[derive(Debug)]
pub struct FetchRequest {
    pub params: SearchParams,
    pub set: Set,
    pub product_line: ProductLine,
}

/// The unit of persistence work: one set and its screened product list.
#[derive(Debug)]
pub struct FetchJob {
    pub product_line: ProductLine,
    pub set: Set,
    pub products: Vec<Product>,
}

/// Result of one persistence attempt, as consumed by the Status Stage.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: FetchJob,
    pub result: Result<(), StoreError>,
    pub worker: usize,
}

pub(crate) type SharedRx<T> = Arc<Mutex<mpsc::Receiver<T>>>;

fn shared<T>(rx: mpsc::Receiver<T>) -> SharedRx<T> {
    Arc::new(Mutex::new(rx))
}

/// Counts jobs that have entered the job channel and not yet been resolved
/// terminally by the Status Stage. Conflict re-submissions keep the count.
#[derive(Default)]
pub(crate) struct InflightGauge {
    count: AtomicUsize,
    idle: Notify,
}

impl InflightGauge {
    pub fn add(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Resolve once the count reaches zero. Callers must ensure no further
    /// `add` can race this (the orchestrator waits only after the Data
    /// Stage has been joined).
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.as_mut().await;
        }
    }
}

/// The repair edge back into the job channel. Holding the sender in a
/// closable slot lets the orchestrator end the feedback path explicitly
/// once no in-flight repairs remain, instead of relying on a bare drop.
#[derive(Clone)]
pub(crate) struct FeedbackSender(Arc<Mutex<Option<mpsc::Sender<FetchJob>>>>);

impl FeedbackSender {
    fn new(tx: mpsc::Sender<FetchJob>) -> Self {
        Self(Arc::new(Mutex::new(Some(tx))))
    }

    /// Re-submit a repaired job. Returns false if the feedback path has
    /// already been closed or the job channel has no receivers left.
    pub async fn send(&self, job: FetchJob) -> bool {
        let tx = { self.0.lock().await.clone() };
        match tx {
            Some(tx) => tx.send(job).await.is_ok(),
            None => false,
        }
    }

    async fn close(&self) {
        self.0.lock().await.take();
    }
}

/// Worker-pool sizes and channel geometry for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_workers: usize,
    pub persist_workers: usize,
    pub status_workers: usize,
    pub image_workers: usize,
    pub image_dir: PathBuf,
}

impl PipelineConfig {
    /// One third of available parallelism per stage, minimum one worker.
    pub fn sized_for_host(image_dir: PathBuf) -> Self {
        let pool = std::thread::available_parallelism()
            .map(|n| n.get() / 3)
            .unwrap_or(1)
            .max(1);
        Self {
            data_workers: pool,
            persist_workers: pool,
            status_workers: pool,
            image_workers: pool,
            image_dir,
        }
    }
}

/// Launch all stages, seed one request per set, and drain to completion.
///
/// Per-item failures are contained inside the stages; only source-fetch
/// failures surface here, after the drain finishes, as the run's error.
pub async fn run(
    config: PipelineConfig,
    source: Arc<dyn CatalogSource>,
    store: Arc<dyn CatalogStore>,
    requests: Vec<FetchRequest>,
) -> Result<()> {
    tokio::fs::create_dir_all(&config.image_dir)
        .await
        .with_context(|| format!("creating image dir {}", config.image_dir.display()))?;

    // The job and outcome capacities bound how many simultaneous conflict
    // repairs the feedback edge can absorb: if every status worker blocks on
    // a repair send while every persistence worker blocks on an outcome
    // send, both channels full, the cycle deadlocks. The 3x-pool caps keep
    // that horizon well past anything a per-set job stream produces; revisit
    // them before shrinking either channel or batching conflicts.
    let (request_tx, request_rx) = mpsc::channel::<FetchRequest>(config.data_workers * 10);
    let (job_tx, job_rx) = mpsc::channel::<FetchJob>(config.persist_workers * 3);
    let (outcome_tx, outcome_rx) = mpsc::channel::<JobOutcome>(config.status_workers * 3);
    let (image_tx, image_rx) = mpsc::channel::<Vec<Product>>(config.image_workers * 3);

    let request_rx = shared(request_rx);
    let job_rx = shared(job_rx);
    let outcome_rx = shared(outcome_rx);
    let image_rx = shared(image_rx);

    let gauge = Arc::new(InflightGauge::default());
    let feedback = FeedbackSender::new(job_tx.clone());

    let mut data_handles: Vec<JoinHandle<Result<()>>> =
        Vec::with_capacity(config.data_workers);
    for id in 0..config.data_workers {
        data_handles.push(tokio::spawn(stages::data_worker(
            id,
            request_rx.clone(),
            job_tx.clone(),
            source.clone(),
            gauge.clone(),
        )));
    }
    // From here the job channel stays open through the data workers' sender
    // clones and the feedback slot.
    drop(job_tx);

    let mut persist_handles: Vec<JoinHandle<()>> = Vec::with_capacity(config.persist_workers);
    for id in 0..config.persist_workers {
        persist_handles.push(tokio::spawn(stages::persist_worker(
            id,
            job_rx.clone(),
            outcome_tx.clone(),
            store.clone(),
        )));
    }
    drop(outcome_tx);

    let mut status_handles: Vec<JoinHandle<()>> = Vec::with_capacity(config.status_workers);
    for id in 0..config.status_workers {
        status_handles.push(tokio::spawn(stages::status_worker(
            id,
            outcome_rx.clone(),
            feedback.clone(),
            image_tx.clone(),
            gauge.clone(),
        )));
    }
    drop(image_tx);

    let mut image_handles: Vec<JoinHandle<()>> = Vec::with_capacity(config.image_workers);
    for id in 0..config.image_workers {
        image_handles.push(tokio::spawn(stages::image_worker(
            id,
            image_rx.clone(),
            source.clone(),
            store.clone(),
            config.image_dir.clone(),
        )));
    }

    let seeded = requests.len();
    for request in requests {
        if request_tx.send(request).await.is_err() {
            break;
        }
    }
    drop(request_tx);
    info!(requests = seeded, "seeded fetch requests; draining pipeline");

    // Stage-by-stage drain in dependency order.
    let mut first_error: Option<anyhow::Error> = None;
    for (id, joined) in join_all(data_handles).await.into_iter().enumerate() {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(worker = id, error = %err, "data worker failed");
                first_error.get_or_insert(err);
            }
            Err(err) => {
                error!(worker = id, error = %err, "data worker panicked");
                first_error.get_or_insert(anyhow!(err));
            }
        }
    }

    // All producers into the job channel are done once no job is awaiting a
    // terminal outcome; only then may the feedback path close.
    gauge.wait_idle().await;
    feedback.close().await;

    for (id, joined) in join_all(persist_handles).await.into_iter().enumerate() {
        if let Err(err) = joined {
            error!(worker = id, error = %err, "persistence worker panicked");
            first_error.get_or_insert(anyhow!(err));
        }
    }
    for (id, joined) in join_all(status_handles).await.into_iter().enumerate() {
        if let Err(err) = joined {
            error!(worker = id, error = %err, "status worker panicked");
            first_error.get_or_insert(anyhow!(err));
        }
    }
    for (id, joined) in join_all(image_handles).await.into_iter().enumerate() {
        if let Err(err) = joined {
            error!(worker = id, error = %err, "image worker panicked");
            first_error.get_or_insert(anyhow!(err));
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => {
            info!("pipeline drained");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gauge_waits_until_all_jobs_resolve() {
        let gauge = Arc::new(InflightGauge::default());
        gauge.add();
        gauge.add();

        let waiter = {
            let gauge = gauge.clone();
            tokio::spawn(async move {
                gauge.wait_idle().await;
            })
        };
        gauge.done();
        assert!(!waiter.is_finished());
        gauge.done();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn gauge_is_idle_when_nothing_was_added() {
        let gauge = InflightGauge::default();
        gauge.wait_idle().await;
    }

    #[tokio::test]
    async fn feedback_send_fails_after_close() {
        let (tx, mut rx) = mpsc::channel::<FetchJob>(1);
        let feedback = FeedbackSender::new(tx);
        let job = FetchJob {
            product_line: ProductLine::default(),
            set: Set::default(),
            products: Vec::new(),
        };
        assert!(feedback.send(job).await);
        assert!(rx.recv().await.is_some());

        feedback.close().await;
        let job = FetchJob {
            product_line: ProductLine::default(),
            set: Set::default(),
            products: Vec::new(),
        };
        assert!(!feedback.send(job).await);
    }

    #[test]
    fn sized_for_host_never_yields_empty_pools() {
        let config = PipelineConfig::sized_for_host(PathBuf::from("/tmp/images"));
        assert!(config.data_workers >= 1);
        assert!(config.persist_workers >= 1);
        assert!(config.status_workers >= 1);
        assert!(config.image_workers >= 1);
    }
}
