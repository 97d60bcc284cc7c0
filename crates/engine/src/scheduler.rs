//! Warmup scheduler
//!
//! Fans out one task per object, bounded by a per-category semaphore (objects
//! in flight) and a global semaphore (requests in flight). Every derivative of
//! an object is requested concurrently inside the pool. Sealed results travel
//! over a channel to a single collector task, the only writer of the shared
//! aggregate, which also triggers periodic checkpoints.

use crate::concurrency::ConcurrencyPlan;
use crate::config::WarmupConfig;
use crate::metrics::{AggregateStats, SharedStats};
use crate::inventory::MediaObject;
use crate::request::{build_derivative_url, ProcessingAttempt, RequestExecutor, RequestOptions, DEFAULT_DERIVATIVE};
use crate::size_class::SizeCategory;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// All attempts for one object, sealed once every derivative finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectResult {
    pub path: String,
    pub size_bytes: u64,
    pub category: SizeCategory,
    /// Derivative name to terminal attempt
    pub attempts: BTreeMap<String, ProcessingAttempt>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ObjectResult {
    pub fn failed_derivatives(&self) -> impl Iterator<Item = (&String, &ProcessingAttempt)> {
        self.attempts.iter().filter(|(_, attempt)| !attempt.is_success())
    }

    pub fn has_failures(&self) -> bool {
        self.failed_derivatives().next().is_some()
    }
}

/// Receives partial results every `checkpoint_interval` sealed objects
pub trait CheckpointSink: Send + Sync {
    fn write_checkpoint(&self, stats: &AggregateStats, results: &[ObjectResult]) -> Result<(), String>;
}

/// What to request for each object
#[derive(Debug, Clone)]
pub struct WarmupSettings {
    pub base_url: String,
    pub derivative_param: String,
    /// Empty means a single `default` request per object
    pub derivatives: Vec<String>,
    pub request: RequestOptions,
    /// Sealed objects between checkpoints (0 disables)
    pub checkpoint_interval: u32,
}

impl WarmupSettings {
    pub fn from_config(cfg: &WarmupConfig) -> Self {
        Self {
            base_url: cfg.base_url.clone(),
            derivative_param: cfg.derivative_param.clone(),
            derivatives: cfg.derivatives.clone(),
            request: RequestOptions::from_config(cfg),
            checkpoint_interval: cfg.checkpoint_interval,
        }
    }

    /// Configured derivatives, or the single pseudo-derivative.
    pub fn effective_derivatives(&self) -> Vec<String> {
        let names: Vec<String> = self
            .derivatives
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if names.is_empty() {
            vec![DEFAULT_DERIVATIVE.to_string()]
        } else {
            names
        }
    }
}

/// Output of one warmup run
#[derive(Debug, Clone)]
pub struct WarmupOutcome {
    pub stats: AggregateStats,
    pub results: Vec<ObjectResult>,
    /// Admission stopped early because of an interrupt
    pub cancelled: bool,
}

pub struct WarmupScheduler {
    executor: RequestExecutor,
    plan: ConcurrencyPlan,
    settings: WarmupSettings,
    stats: SharedStats,
    checkpoint: Option<Arc<dyn CheckpointSink>>,
    cancel: CancellationToken,
}

impl WarmupScheduler {
    pub fn new(
        executor: RequestExecutor,
        plan: ConcurrencyPlan,
        settings: WarmupSettings,
        stats: SharedStats,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            plan,
            settings,
            stats,
            checkpoint: None,
            cancel,
        }
    }

    pub fn with_checkpoint(mut self, sink: Arc<dyn CheckpointSink>) -> Self {
        self.checkpoint = Some(sink);
        self
    }

    /// Warm every object and return once all admitted units have completed.
    ///
    /// Cancellation only stops admission; objects already admitted run to
    /// completion (or exhaust their own retries and timeouts).
    pub async fn run(&self, objects: Vec<MediaObject>) -> WarmupOutcome {
        let derivatives = Arc::new(self.settings.effective_derivatives());
        let pool = Arc::new(Semaphore::new(self.plan.pool_size.max(1) as usize));

        info!(
            objects = objects.len(),
            derivatives = derivatives.len(),
            pool = self.plan.pool_size,
            small = self.plan.small_workers,
            medium = self.plan.medium_workers,
            large = self.plan.large_workers,
            "Starting warmup"
        );

        let (tx, rx) = mpsc::channel::<ObjectResult>(self.plan.pool_size.max(1) as usize * 2);
        let collector = tokio::spawn(collect(
            rx,
            self.stats.clone(),
            self.checkpoint.clone(),
            self.settings.checkpoint_interval,
        ));

        let mut queues: BTreeMap<SizeCategory, Vec<MediaObject>> = BTreeMap::new();
        for object in objects {
            queues.entry(object.size_category).or_default().push(object);
        }
        // lanes admit independently; a saturated lane never blocks the others
        let admissions = queues
            .into_iter()
            .map(|(category, queue)| self.admit_lane(category, queue, &pool, &derivatives, &tx));
        let cancelled = join_all(admissions).await.into_iter().any(|stopped| stopped);
        drop(tx);

        let results = match collector.await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "Collector task failed");
                Vec::new()
            }
        };
        let stats = self.stats.read().await.clone();

        info!(
            processed = stats.total_processed,
            requests = stats.total_requests,
            errors = stats.error_count,
            cancelled,
            "Warmup finished"
        );

        WarmupOutcome {
            stats,
            results,
            cancelled,
        }
    }

    /// Admit one category's objects in order under its lane semaphore.
    /// Returns true when admission stopped because of cancellation.
    async fn admit_lane(
        &self,
        category: SizeCategory,
        queue: Vec<MediaObject>,
        pool: &Arc<Semaphore>,
        derivatives: &Arc<Vec<String>>,
        tx: &mpsc::Sender<ObjectResult>,
    ) -> bool {
        let lane = Arc::new(Semaphore::new(self.plan.workers_for(category).max(1) as usize));

        for object in queue {
            let lane_permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = lane.clone().acquire_owned() => permit.ok(),
            };
            let Some(lane_permit) = lane_permit else {
                warn!(category = %category, "Interrupted, no further objects will be admitted");
                return true;
            };

            let tx = tx.clone();
            let executor = self.executor.clone();
            let pool = pool.clone();
            let derivatives = derivatives.clone();
            let base_url = self.settings.base_url.clone();
            let param = self.settings.derivative_param.clone();
            let opts = self.settings.request;

            tokio::spawn(async move {
                let _lane_permit = lane_permit;
                let result = warm_object(&executor, &pool, &object, &derivatives, &base_url, &param, &opts).await;
                if tx.send(result).await.is_err() {
                    error!(path = %object.path, "Collector gone, result dropped");
                }
            });
        }
        false
    }
}

async fn warm_object(
    executor: &RequestExecutor,
    pool: &Arc<Semaphore>,
    object: &MediaObject,
    derivatives: &[String],
    base_url: &str,
    param: &str,
    opts: &RequestOptions,
) -> ObjectResult {
    let started_at = Utc::now();

    let units = derivatives.iter().map(|derivative| async move {
        // held for the whole unit, retries included
        let _permit = pool.clone().acquire_owned().await.ok();
        let attempt = match build_derivative_url(base_url, &object.path, param, Some(derivative)) {
            Ok(url) => executor.execute(url.as_str(), object.size_bytes, opts).await,
            Err(e) => ProcessingAttempt::rejected(
                &format!("{}/{}", base_url.trim_end_matches('/'), object.path),
                object.size_bytes,
                format!("invalid URL: {}", e),
            ),
        };
        (derivative.clone(), attempt)
    });
    let attempts: BTreeMap<String, ProcessingAttempt> = join_all(units).await.into_iter().collect();

    ObjectResult {
        path: object.path.clone(),
        size_bytes: object.size_bytes,
        category: object.size_category,
        attempts,
        started_at,
        finished_at: Utc::now(),
    }
}

/// Sealed results shared with checkpoint writers without copying.
///
/// A snapshot is a cheap handle; the next push only copies the list if a
/// snapshot is still alive.
#[derive(Debug, Default)]
struct SealedResults {
    inner: Arc<Vec<ObjectResult>>,
}

impl SealedResults {
    fn push(&mut self, result: ObjectResult) {
        Arc::make_mut(&mut self.inner).push(result);
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn snapshot(&self) -> Arc<Vec<ObjectResult>> {
        Arc::clone(&self.inner)
    }

    fn into_inner(self) -> Vec<ObjectResult> {
        Arc::try_unwrap(self.inner).unwrap_or_else(|shared| (*shared).clone())
    }
}

/// Single writer: folds sealed objects into the aggregate and checkpoints.
async fn collect(
    mut rx: mpsc::Receiver<ObjectResult>,
    stats: SharedStats,
    checkpoint: Option<Arc<dyn CheckpointSink>>,
    interval: u32,
) -> Vec<ObjectResult> {
    let mut results = SealedResults::default();
    let mut since_checkpoint = 0u32;

    while let Some(result) = rx.recv().await {
        for (derivative, attempt) in result.failed_derivatives() {
            error!(path = %result.path, derivative = %derivative, error = %attempt, "Warming failed");
        }
        debug!(path = %result.path, category = %result.category, "Object sealed");

        stats.write().await.fold(&result);
        results.push(result);
        since_checkpoint += 1;

        if let Some(sink) = checkpoint.as_ref().filter(|_| interval > 0 && since_checkpoint >= interval) {
            since_checkpoint = 0;
            let snapshot = stats.read().await.clone();
            let partial = results.snapshot();
            let sink = sink.clone();
            let written = tokio::task::spawn_blocking(move || sink.write_checkpoint(&snapshot, &partial)).await;
            match written {
                Ok(Ok(())) => debug!(objects = results.len(), "Checkpoint written"),
                Ok(Err(e)) => warn!(error = %e, "Checkpoint write failed"),
                Err(e) => warn!(error = %e, "Checkpoint task failed"),
            }
        }
    }

    results.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::metrics::new_shared_stats;
    use crate::retry::RetryPolicy;
    use crate::size_class::SizeThresholds;
    use crate::test_support::spawn_server;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    const MIB: u64 = 1024 * 1024;

    fn plan(pool_size: u32, large_workers: u32) -> ConcurrencyPlan {
        ConcurrencyPlan {
            total_cores: 4,
            pool_size,
            small_workers: pool_size,
            medium_workers: pool_size,
            large_workers,
            transcode_jobs: 1,
            validation_workers: 2,
        }
    }

    fn settings(base_url: String, derivatives: &[&str], checkpoint_interval: u32) -> WarmupSettings {
        WarmupSettings {
            base_url,
            derivative_param: "derivative".to_string(),
            derivatives: derivatives.iter().map(|d| d.to_string()).collect(),
            request: RequestOptions {
                timeout: Duration::from_secs(5),
                retry: RetryPolicy::no_retries(),
                post_success_delay: Duration::ZERO,
                prefer_head: false,
            },
            checkpoint_interval,
        }
    }

    fn objects(sizes: &[u64]) -> Vec<MediaObject> {
        let thresholds = SizeThresholds::default();
        sizes
            .iter()
            .enumerate()
            .map(|(i, size)| MediaObject::new(format!("videos/clip-{}.mp4", i), *size, &thresholds))
            .collect()
    }

    fn scheduler(plan: ConcurrencyPlan, settings: WarmupSettings, expected: u64) -> WarmupScheduler {
        WarmupScheduler::new(
            RequestExecutor::new().unwrap(),
            plan,
            settings,
            new_shared_stats(expected),
            CancellationToken::new(),
        )
    }

    #[derive(Default)]
    struct CountingSink {
        calls: Mutex<Vec<usize>>,
    }

    impl CheckpointSink for CountingSink {
        fn write_checkpoint(&self, stats: &AggregateStats, results: &[ObjectResult]) -> Result<(), String> {
            assert_eq!(stats.total_processed as usize, results.len());
            self.calls.lock().unwrap().push(results.len());
            Ok(())
        }
    }

    #[test]
    fn test_effective_derivatives_default() {
        let s = settings("http://x".to_string(), &[], 0);
        assert_eq!(s.effective_derivatives(), vec![DEFAULT_DERIVATIVE.to_string()]);
        let s = settings("http://x".to_string(), &["desktop", " ", "mobile"], 0);
        assert_eq!(s.effective_derivatives(), vec!["desktop", "mobile"]);
    }

    #[tokio::test]
    async fn test_three_objects_one_per_category() {
        let base = spawn_server(Router::new().route("/*path", get(|| async { vec![0u8; 2048] }))).await;
        let objects = objects(&[10 * MIB, 80 * MIB, 300 * MIB]);
        assert_eq!(objects[0].size_category, SizeCategory::Small);
        assert_eq!(objects[1].size_category, SizeCategory::Medium);
        assert_eq!(objects[2].size_category, SizeCategory::Large);

        let outcome = scheduler(plan(4, 1), settings(base, &["desktop"], 0), 3)
            .run(objects)
            .await;

        assert!(!outcome.cancelled);
        assert_eq!(outcome.stats.total_processed, 3);
        assert_eq!(outcome.stats.success_count, 3);
        assert_eq!(outcome.results.len(), 3);
        for category in SizeCategory::ALL {
            assert_eq!(outcome.stats.by_category[&category].objects, 1);
        }
        assert_eq!(outcome.stats.by_derivative["desktop"].response_bytes, 3 * 2048);
        assert!(outcome.results.iter().all(|r| r.attempts["desktop"].url.contains("derivative=desktop")));
    }

    #[tokio::test]
    async fn test_failures_are_recorded_not_fatal() {
        let router = Router::new().route(
            "/*path",
            get(|axum::extract::Path(path): axum::extract::Path<String>| async move {
                if path.ends_with("clip-1.mp4") {
                    (StatusCode::NOT_FOUND, Vec::new())
                } else {
                    (StatusCode::OK, vec![1u8; 16])
                }
            }),
        );
        let base = spawn_server(router).await;

        let outcome = scheduler(plan(4, 1), settings(base, &["a", "b"], 0), 3)
            .run(objects(&[MIB, MIB, MIB]))
            .await;

        assert_eq!(outcome.stats.total_processed, 3);
        assert_eq!(outcome.stats.total_requests, 6);
        assert_eq!(outcome.stats.error_count, 2);
        assert_eq!(outcome.stats.error_counts[&ErrorKind::Http4xx], 2);
        assert_eq!(outcome.stats.errors.len(), 2);
        let failed: Vec<_> = outcome.results.iter().filter(|r| r.has_failures()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].path, "videos/clip-1.mp4");
    }

    #[tokio::test]
    async fn test_large_lane_caps_objects_in_flight() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (current, max) = (in_flight.clone(), peak.clone());
        let router = Router::new().route(
            "/*path",
            get(move || {
                let (current, max) = (current.clone(), max.clone());
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    max.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        );
        let base = spawn_server(router).await;

        let outcome = scheduler(plan(8, 1), settings(base, &[], 0), 4)
            .run(objects(&[300 * MIB, 400 * MIB, 500 * MIB, 600 * MIB]))
            .await;

        assert_eq!(outcome.stats.total_processed, 4);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(outcome.results.iter().all(|r| r.attempts.contains_key(DEFAULT_DERIVATIVE)));
    }

    #[tokio::test]
    async fn test_small_and_medium_flow_while_large_lane_is_full() {
        let started = Instant::now();
        let first_seen: Arc<Mutex<BTreeMap<String, Duration>>> = Arc::default();
        let seen = first_seen.clone();
        let router = Router::new().route(
            "/*path",
            get(move |axum::extract::Path(path): axum::extract::Path<String>| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().entry(path.clone()).or_insert_with(|| started.elapsed());
                    if ["clip-0", "clip-1", "clip-2"].iter().any(|c| path.contains(c)) {
                        tokio::time::sleep(Duration::from_millis(600)).await;
                    }
                    "ok"
                }
            }),
        );
        let base = spawn_server(router).await;

        let objects = objects(&[300 * MIB, 400 * MIB, 500 * MIB, 10 * MIB, 80 * MIB]);
        assert_eq!(objects[3].size_category, SizeCategory::Small);
        assert_eq!(objects[4].size_category, SizeCategory::Medium);

        let outcome = scheduler(plan(8, 1), settings(base, &[], 0), 5).run(objects).await;
        assert_eq!(outcome.stats.total_processed, 5);

        let seen = first_seen.lock().unwrap();
        let first = |name: &str| {
            seen.iter()
                .find(|(path, _)| path.contains(name))
                .map(|(_, at)| *at)
                .unwrap()
        };
        assert!(first("clip-3") < Duration::from_millis(400), "small waited {:?}", first("clip-3"));
        assert!(first("clip-4") < Duration::from_millis(400), "medium waited {:?}", first("clip-4"));
        // large lane still admits one at a time
        assert!(first("clip-1") >= Duration::from_millis(550));
        assert!(first("clip-2") >= first("clip-1") + Duration::from_millis(550));
    }

    #[test]
    fn test_sealed_results_share_until_written() {
        let sample = objects(&[MIB, 2 * MIB]);
        let sealed = |object: &MediaObject| ObjectResult {
            path: object.path.clone(),
            size_bytes: object.size_bytes,
            category: object.size_category,
            attempts: BTreeMap::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let mut results = SealedResults::default();
        results.push(sealed(&sample[0]));
        let snapshot = results.snapshot();
        assert!(Arc::ptr_eq(&snapshot, &results.snapshot()));

        // a live snapshot keeps its view; the log copies on the next push
        results.push(sealed(&sample[1]));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(results.len(), 2);
        drop(snapshot);

        let snapshot = results.snapshot();
        assert_eq!(Arc::strong_count(&snapshot), 2);
        drop(snapshot);
        let all = results.into_inner();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].path, "videos/clip-1.mp4");
    }

    #[tokio::test]
    async fn test_checkpoints_every_interval() {
        let base = spawn_server(Router::new().route("/*path", get(|| async { "ok" }))).await;
        let sink = Arc::new(CountingSink::default());

        let outcome = scheduler(plan(4, 1), settings(base, &[], 2), 5)
            .with_checkpoint(sink.clone())
            .run(objects(&[MIB; 5]))
            .await;

        assert_eq!(outcome.stats.total_processed, 5);
        assert_eq!(*sink.calls.lock().unwrap(), vec![2, 4]);
    }

    #[tokio::test]
    async fn test_cancelled_run_admits_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scheduler = WarmupScheduler::new(
            RequestExecutor::new().unwrap(),
            plan(4, 1),
            settings("http://127.0.0.1:1".to_string(), &[], 0),
            new_shared_stats(3),
            cancel,
        );

        let outcome = scheduler.run(objects(&[MIB, MIB, MIB])).await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.stats.total_processed, 0);
        assert_eq!(outcome.stats.expected_objects, 3);
        assert!(outcome.stats.percent_complete() < 1.0);
    }
}
