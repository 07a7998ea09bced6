//! The four stage workers. Each consumes one shared channel until it is
//! closed and drained, and owns whatever message it is currently holding.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::screen::{duplicate_key_from_detail, remove_product_by_number, screen_products};
use super::{FeedbackSender, FetchJob, FetchRequest, InflightGauge, JobOutcome, SharedRx};
use crate::model::Product;
use crate::source::{CatalogSource, IMAGE_FORMAT_SUFFIX};
use crate::store::{CatalogStore, StoreError};

async fn next<T>(rx: &SharedRx<T>) -> Option<T> {
    rx.lock().await.recv().await
}

/// Data Stage: fetch one set's products per request, screen them, and emit
/// a job. A source fetch failure is fatal to the run and ends this worker;
/// an empty result set is not an error and just skips the set.
pub(super) async fn data_worker(
    id: usize,
    requests: SharedRx<FetchRequest>,
    jobs: mpsc::Sender<FetchJob>,
    source: Arc<dyn CatalogSource>,
    gauge: Arc<InflightGauge>,
) -> Result<()> {
    while let Some(mut request) = next(&requests).await {
        let products = source.fetch_products_in_parts(&request.params).await?;
        if products.is_empty() {
            info!(worker = id, set = %request.set.name, "no products returned; skipping set");
            continue;
        }
        let mut products = screen_products(products);
        request.set.count = products.len() as i64;
        for product in &mut products {
            product.set_id = request.set.id;
            product.product_line_id = request.product_line.id;
        }
        let job = FetchJob {
            product_line: request.product_line,
            set: request.set,
            products,
        };
        gauge.add();
        if jobs.send(job).await.is_err() {
            gauge.done();
            break;
        }
    }
    debug!(worker = id, "request channel drained; data worker exiting");
    Ok(())
}

/// Persistence Stage: one durable write attempt per job, one outcome per
/// job. The error, if any, is passed along uninterpreted.
pub(super) async fn persist_worker(
    id: usize,
    jobs: SharedRx<FetchJob>,
    outcomes: mpsc::Sender<JobOutcome>,
    store: Arc<dyn CatalogStore>,
) {
    while let Some(job) = next(&jobs).await {
        let result = store.add_products(&job.products).await;
        let outcome = JobOutcome {
            job,
            result,
            worker: id,
        };
        if outcomes.send(outcome).await.is_err() {
            break;
        }
    }
    debug!(worker = id, "job channel drained; persistence worker exiting");
}

/// Status Stage: triage each outcome.
///
/// Success forwards the product list to the Image Stage. A unique-constraint
/// conflict is repaired by removing exactly the offending product and
/// re-submitting the shrunk job through the feedback edge. Anything else is
/// terminal for that job. Every job reaches exactly one terminal resolution,
/// at which point the in-flight gauge counts it down.
pub(super) async fn status_worker(
    id: usize,
    outcomes: SharedRx<JobOutcome>,
    feedback: FeedbackSender,
    images: mpsc::Sender<Vec<Product>>,
    gauge: Arc<InflightGauge>,
) {
    while let Some(outcome) = next(&outcomes).await {
        let JobOutcome {
            mut job,
            result,
            worker,
        } = outcome;
        match result {
            Ok(()) => {
                info!(
                    set_id = job.set.id,
                    set = %job.set.name,
                    count = job.set.count,
                    worker,
                    "set persisted"
                );
                if !job.products.is_empty() && images.send(job.products).await.is_err() {
                    warn!(worker = id, "image channel closed; skipping image batch");
                }
                gauge.done();
            }
            Err(StoreError::Conflict { detail }) => match duplicate_key_from_detail(&detail) {
                Some(number) => {
                    // Repair must shrink the job; re-submitting it unchanged
                    // would hit the same conflict forever.
                    if remove_product_by_number(&mut job.products, &number) {
                        warn!(
                            set = %job.set.name,
                            product_number = %number,
                            "duplicate product; repairing job and re-submitting"
                        );
                        job.set.count = job.products.len() as i64;
                        if !feedback.send(job).await {
                            error!(worker = id, "feedback path closed; repaired job lost");
                            gauge.done();
                        }
                    } else {
                        error!(
                            set = %job.set.name,
                            product_number = %number,
                            detail = %detail,
                            "conflict names a product not in the job; dropping job"
                        );
                        gauge.done();
                    }
                }
                None => {
                    error!(
                        set = %job.set.name,
                        detail = %detail,
                        "conflict detail names no product number; dropping job"
                    );
                    gauge.done();
                }
            },
            Err(err) => {
                error!(
                    set = %job.set.name,
                    product = job.products.first().map(|p| p.name.as_str()).unwrap_or(""),
                    error = %err,
                    "unrecoverable persistence failure; dropping job"
                );
                gauge.done();
            }
        }
    }
    debug!(worker = id, "outcome channel drained; status worker exiting");
}

/// Image Stage: for each successfully persisted product list, re-resolve
/// store-assigned identifiers, fetch every product's image by its source
/// identifier and write it under the store identifier. Per-item failures
/// are logged and skipped.
pub(super) async fn image_worker(
    id: usize,
    batches: SharedRx<Vec<Product>>,
    source: Arc<dyn CatalogSource>,
    store: Arc<dyn CatalogStore>,
    image_dir: PathBuf,
) {
    while let Some(products) = next(&batches).await {
        let Some(first) = products.first() else {
            continue;
        };
        let set_name = first.set_name.clone();
        let stored = match store.get_products_by_set_name(&set_name).await {
            Ok(rows) => rows,
            Err(err) => {
                error!(set = %set_name, error = %err, "failed to resolve persisted products; skipping image batch");
                continue;
            }
        };
        let store_ids: HashMap<&str, i64> =
            stored.iter().map(|p| (p.name.as_str(), p.id)).collect();

        for product in &products {
            let Some(&store_id) = store_ids.get(product.name.as_str()) else {
                warn!(set = %set_name, product = %product.name, "no persisted row for product; skipping image");
                continue;
            };
            let bytes = match source.fetch_product_image(product.id).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(set = %set_name, product = %product.name, error = %err, "image fetch failed; skipping");
                    continue;
                }
            };
            let path = image_dir.join(format!("{store_id}_in_{IMAGE_FORMAT_SUFFIX}"));
            if let Err(err) = tokio::fs::write(&path, &bytes).await {
                warn!(set = %set_name, path = %path.display(), error = %err, "image write failed; skipping");
            }
        }
    }
    debug!(worker = id, "image channel drained; image worker exiting");
}
