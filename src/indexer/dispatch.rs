//! Thread dispatcher: index many exposures in parallel.
//!
//! Exposures are dealt round-robin into one bucket per worker. Each worker
//! indexes its bucket sequentially into its own result buffer, so no
//! exposure is ever touched by two threads. Buffers are merged after the
//! join and returned in input order.

use rayon::prelude::*;
use tracing::{info, warn};

use super::driver::index_exposure;
use super::{Exposure, ExposureReport, Indexer};

/// Number of workers for a configured thread count (0 = available parallelism).
pub fn worker_count(threads: usize) -> usize {
    if threads > 0 {
        threads
    } else {
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }
}

/// Deal items round-robin into `workers` buckets, keeping their input index.
pub fn partition_round_robin<T>(items: Vec<T>, workers: usize) -> Vec<Vec<(usize, T)>> {
    let workers = workers.max(1);
    let mut buckets: Vec<Vec<(usize, T)>> = (0..workers).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        buckets[i % workers].push((i, item));
    }
    buckets
}

fn index_bucket(indexer: &Indexer, bucket: Vec<(usize, Exposure)>) -> Vec<(usize, ExposureReport)> {
    bucket
        .into_iter()
        .map(|(i, exposure)| (i, index_exposure(indexer, exposure)))
        .collect()
}

/// Index every exposure, one sequential worker per configured thread.
pub fn index_exposures(indexer: &Indexer, exposures: Vec<Exposure>) -> Vec<ExposureReport> {
    let workers = worker_count(indexer.config().threads).min(exposures.len().max(1));
    let total = exposures.len();
    let buckets = partition_round_robin(exposures, workers);
    info!("Indexing {} exposures on {} workers", total, workers);

    let buffers: Vec<Vec<(usize, ExposureReport)>> =
        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(|| {
                buckets
                    .into_par_iter()
                    .map(|bucket| index_bucket(indexer, bucket))
                    .collect()
            }),
            Err(e) => {
                warn!("Could not start worker pool ({}); indexing sequentially", e);
                buckets
                    .into_iter()
                    .map(|bucket| index_bucket(indexer, bucket))
                    .collect()
            }
        };

    let mut merged: Vec<(usize, ExposureReport)> = buffers.into_iter().flatten().collect();
    merged.sort_by_key(|(i, _)| *i);
    let reports: Vec<ExposureReport> = merged.into_iter().map(|(_, r)| r).collect();
    let crystals: usize = reports.iter().map(|r| r.lattices.len()).sum();
    info!("Indexed {} exposures: {} crystals found", reports.len(), crystals);
    reports
}
