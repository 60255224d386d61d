//! Pipeline orchestrator: fetch → normalize → archive → load.
//!
//! ## Ordering
//!
//! The archive object is written before the warehouse append. The two sinks
//! are not transactional together: a load failure after a successful archive
//! leaves the object in place and the table unchanged. A later run re-archives
//! (same object name, overwritten) and appends again.
//!
//! The append is not deduplicated. A retry that overlaps an earlier partial
//! success can append the same dates twice.
//!
//! `run` itself never retries. `run_with_retry` is the scheduler-style wrapper
//! the binary uses: it rebuilds the pipeline and re-runs it from the start.

use crate::archive::{artifact_name, object_key, render_csv, LocalObjectStore, ObjectStore};
use crate::config::AppConfig;
use crate::error::EtlError;
use crate::fetcher::{observation_window, FredClient, ObservationSource};
use crate::models::RunResult;
use crate::normalizer::{normalize, Normalized};
use crate::warehouse::{DuckDbWarehouse, TableRef, Warehouse};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{info, warn};

pub struct Pipeline {
    config: AppConfig,
    table: TableRef,
    source: Box<dyn ObservationSource>,
    store: Box<dyn ObjectStore>,
    warehouse: Box<dyn Warehouse>,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        source: Box<dyn ObservationSource>,
        store: Box<dyn ObjectStore>,
        warehouse: Box<dyn Warehouse>,
    ) -> Result<Self> {
        config.validate_window()?;
        let table = TableRef::from_config(&config.warehouse)?;
        Ok(Self { config, table, source, store, warehouse })
    }

    /// Wire the production adapters from configuration.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let source = FredClient::new(&config.source).context("Failed to build FRED client")?;
        let store = LocalObjectStore::new(&config.archive.root);
        let warehouse = DuckDbWarehouse::open(&config.warehouse.db_path)
            .context("Failed to open warehouse")?;
        Self::new(config, Box::new(source), Box::new(store), Box::new(warehouse))
    }

    /// One complete run for the given "now". Stages run strictly in order and
    /// every failure is returned unchanged; nothing here retries.
    pub async fn run(&self, now: NaiveDateTime) -> Result<RunResult, EtlError> {
        let run_date = now.date();
        let src = &self.config.source;

        // ── 1. Fetch ──────────────────────────────────────────────────────────
        let window = observation_window(&src.series_id, now, src.window_days, src.limit);
        let raw = self.source.fetch(&window).await.map_err(EtlError::Fetch)?;
        info!("Fetched {} observations for {}", raw.len(), window);

        // ── 2. Normalize ──────────────────────────────────────────────────────
        let rows = match normalize(&raw)? {
            Normalized::Rows(rows) => rows,
            Normalized::EmptyUpstream => {
                warn!("{}: no observations in window", window.series_id);
                return Ok(RunResult::EmptyUpstream);
            }
            Normalized::EmptyAfterCleaning => {
                warn!("{}: all {} observations were missing or non-numeric", window.series_id, raw.len());
                return Ok(RunResult::EmptyAfterCleaning);
            }
        };
        info!("{} rows after cleaning ({} dropped)", rows.len(), raw.len() - rows.len());

        // ── 3. Archive ────────────────────────────────────────────────────────
        let arc = &self.config.archive;
        let key = object_key(&arc.prefix, &artifact_name(&arc.file_stem, run_date));
        let body = render_csv(&rows, &self.config.warehouse.value_column).map_err(EtlError::Archive)?;
        self.store
            .put(&arc.bucket, &key, body)
            .await
            .with_context(|| format!("upload {}/{}", arc.bucket, key))
            .map_err(EtlError::Archive)?;
        info!("Archived to {}/{}", arc.bucket, key);

        // ── 4. Load ───────────────────────────────────────────────────────────
        let loaded = self
            .warehouse
            .append(&self.table, &self.config.warehouse.value_column, &rows)
            .await
            .with_context(|| format!("append to {}", self.table))
            .map_err(EtlError::Load)?;

        Ok(RunResult::Loaded(loaded))
    }
}

/// Run up to `1 + retries` times, `delay` apart. Each attempt gets a fresh
/// pipeline from `make`, so no client outlives the attempt that built it.
pub async fn run_with_retry<F>(
    mut make: F,
    now: NaiveDateTime,
    retries: usize,
    delay: Duration,
) -> Result<RunResult>
where
    F: FnMut() -> Result<Pipeline>,
{
    let mut attempt = 0usize;
    Retry::spawn(FixedInterval::new(delay).take(retries), || {
        attempt += 1;
        let n = attempt;
        let pipeline = make();
        async move {
            if n > 1 {
                warn!("Retry attempt {} of {} after {:?}", n - 1, retries, delay);
            }
            let result = pipeline?.run(now).await.map_err(|e| {
                warn!("Run failed at {} stage: {}", e.stage(), e);
                anyhow::Error::from(e)
            })?;
            Ok::<_, anyhow::Error>(result)
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKey;
    use crate::models::{CanonicalRow, Observation, ObservationWindow};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    // ── Stubs ─────────────────────────────────────────────────────────────────

    struct StubSource {
        result: std::result::Result<Vec<Observation>, String>,
        seen: Arc<Mutex<Vec<ObservationWindow>>>,
    }

    #[async_trait]
    impl ObservationSource for StubSource {
        async fn fetch(&self, window: &ObservationWindow) -> Result<Vec<Observation>> {
            self.seen.lock().unwrap().push(window.clone());
            self.result.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        puts: Arc<Mutex<Vec<(String, String, Vec<u8>)>>>,
        fail: bool,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
            if self.fail {
                anyhow::bail!("permission denied");
            }
            self.puts.lock().unwrap().push((bucket.into(), key.into(), body));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingWarehouse {
        appends: Arc<Mutex<Vec<(String, Vec<CanonicalRow>)>>>,
        fail: bool,
    }

    #[async_trait]
    impl Warehouse for RecordingWarehouse {
        async fn append(&self, table: &TableRef, _col: &str, rows: &[CanonicalRow]) -> Result<usize> {
            if self.fail {
                anyhow::bail!("quota exceeded");
            }
            self.appends.lock().unwrap().push((table.to_string(), rows.to_vec()));
            Ok(rows.len())
        }
    }

    struct Harness {
        pipeline: Pipeline,
        windows: Arc<Mutex<Vec<ObservationWindow>>>,
        puts: Arc<Mutex<Vec<(String, String, Vec<u8>)>>>,
        appends: Arc<Mutex<Vec<(String, Vec<CanonicalRow>)>>>,
    }

    fn harness(
        result: std::result::Result<Vec<Observation>, String>,
        store_fails: bool,
        warehouse_fails: bool,
    ) -> Harness {
        let mut config = AppConfig::default();
        config.source.api_key = ApiKey::new("test");

        let windows = Arc::new(Mutex::new(Vec::new()));
        let store = RecordingStore { fail: store_fails, ..Default::default() };
        let warehouse = RecordingWarehouse { fail: warehouse_fails, ..Default::default() };
        let puts = Arc::clone(&store.puts);
        let appends = Arc::clone(&warehouse.appends);

        let source = StubSource { result, seen: Arc::clone(&windows) };
        let pipeline =
            Pipeline::new(config, Box::new(source), Box::new(store), Box::new(warehouse)).unwrap();

        Harness { pipeline, windows, puts, appends }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap()
    }

    fn example() -> Vec<Observation> {
        vec![
            Observation::new("2026-03-02", "5137.21"),
            Observation::new("2026-03-01", "."),
        ]
    }

    // ── Tests ─────────────────────────────────────────────────────────────────

    #[test]
    fn end_to_end_example() {
        let h = harness(Ok(example()), false, false);
        let result = tokio_test::block_on(h.pipeline.run(now())).unwrap();
        assert_eq!(result, RunResult::Loaded(1));
        assert_eq!(result.to_string(), "success 1 rows");

        let windows = h.windows.lock().unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].end_date, now().date());
        assert_eq!(windows[0].start_date, NaiveDate::from_ymd_opt(2026, 2, 23).unwrap());

        let puts = h.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].0, "fred-data-backup");
        assert_eq!(puts[0].1, "daily/sp500_2026-03-02.csv");
        assert_eq!(puts[0].2, b"date,sp500\n2026-03-02,5137.21\n");

        let appends = h.appends.lock().unwrap();
        assert_eq!(appends.len(), 1);
        assert_eq!(appends[0].0, "fred-etl.fred_data.sp500_daily");
        assert_eq!(
            appends[0].1,
            vec![CanonicalRow {
                date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                metric_value: 5137.21
            }]
        );
    }

    #[test]
    fn empty_upstream_skips_both_sinks() {
        let h = harness(Ok(vec![]), false, false);
        let result = tokio_test::block_on(h.pipeline.run(now())).unwrap();
        assert_eq!(result, RunResult::EmptyUpstream);
        assert!(h.puts.lock().unwrap().is_empty());
        assert!(h.appends.lock().unwrap().is_empty());
    }

    #[test]
    fn all_missing_skips_both_sinks() {
        let raw = (1..=5)
            .map(|i| Observation::new(format!("2026-02-2{}", i), "."))
            .collect();
        let h = harness(Ok(raw), false, false);
        let result = tokio_test::block_on(h.pipeline.run(now())).unwrap();
        assert_eq!(result, RunResult::EmptyAfterCleaning);
        assert!(h.puts.lock().unwrap().is_empty());
        assert!(h.appends.lock().unwrap().is_empty());
    }

    #[test]
    fn fetch_failure_has_no_side_effects() {
        let h = harness(Err("HTTP error 500".into()), false, false);
        let err = tokio_test::block_on(h.pipeline.run(now())).unwrap_err();
        assert!(matches!(err, EtlError::Fetch(_)));
        assert_eq!(err.stage(), "fetch");
        assert!(h.puts.lock().unwrap().is_empty());
        assert!(h.appends.lock().unwrap().is_empty());
    }

    #[test]
    fn bad_date_fails_before_sinks() {
        let h = harness(Ok(vec![Observation::new("not-a-date", "1.0")]), false, false);
        let err = tokio_test::block_on(h.pipeline.run(now())).unwrap_err();
        assert!(matches!(err, EtlError::Normalize(_)));
        assert!(err.to_string().contains("not-a-date"), "{}", err);
        assert!(h.puts.lock().unwrap().is_empty());
        assert!(h.appends.lock().unwrap().is_empty());
    }

    #[test]
    fn archive_failure_skips_load() {
        let h = harness(Ok(example()), true, false);
        let err = tokio_test::block_on(h.pipeline.run(now())).unwrap_err();
        assert!(matches!(err, EtlError::Archive(_)));
        assert!(err.to_string().contains("permission denied"));
        assert!(h.appends.lock().unwrap().is_empty());
    }

    #[test]
    fn load_failure_leaves_archive_written() {
        let h = harness(Ok(example()), false, true);
        let err = tokio_test::block_on(h.pipeline.run(now())).unwrap_err();
        assert!(matches!(err, EtlError::Load(_)));
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(h.puts.lock().unwrap().len(), 1);
    }

    #[test]
    fn rerun_same_date_reuses_artifact_name() {
        let h = harness(Ok(example()), false, false);
        tokio_test::block_on(h.pipeline.run(now())).unwrap();
        tokio_test::block_on(h.pipeline.run(now())).unwrap();
        let puts = h.puts.lock().unwrap();
        assert_eq!(puts[0].1, puts[1].1);
        // Loads are not deduplicated.
        assert_eq!(h.appends.lock().unwrap().len(), 2);
    }

    #[test]
    fn real_adapters_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.archive.root = dir.path().join("objects");

        let source = StubSource { result: Ok(example()), seen: Default::default() };
        let store = LocalObjectStore::new(&config.archive.root);
        let warehouse = DuckDbWarehouse::open(&dir.path().join("wh.duckdb")).unwrap();
        let pipeline =
            Pipeline::new(config, Box::new(source), Box::new(store), Box::new(warehouse)).unwrap();

        let result = tokio_test::block_on(pipeline.run(now())).unwrap();
        assert_eq!(result, RunResult::Loaded(1));

        let csv = std::fs::read_to_string(
            dir.path().join("objects/fred-data-backup/daily/sp500_2026-03-02.csv"),
        )
        .unwrap();
        assert_eq!(csv, "date,sp500\n2026-03-02,5137.21\n");

        drop(pipeline);
        let wh = DuckDbWarehouse::open(&dir.path().join("wh.duckdb")).unwrap();
        let t = TableRef::new("fred-etl", "fred_data", "sp500_daily").unwrap();
        assert_eq!(wh.row_count(&t).unwrap(), 1);
    }

    // ── Retry wrapper ─────────────────────────────────────────────────────────

    /// Fails the first `failures` fetches, then serves the example.
    struct FlakySource {
        calls: Arc<AtomicUsize>,
        failures: usize,
    }

    #[async_trait]
    impl ObservationSource for FlakySource {
        async fn fetch(&self, _window: &ObservationWindow) -> Result<Vec<Observation>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                anyhow::bail!("HTTP error 503 Service Unavailable");
            }
            Ok(example())
        }
    }

    fn flaky_factory(calls: &Arc<AtomicUsize>, failures: usize) -> impl FnMut() -> Result<Pipeline> {
        let calls = Arc::clone(calls);
        move || {
            let source = FlakySource { calls: Arc::clone(&calls), failures };
            Pipeline::new(
                AppConfig::default(),
                Box::new(source),
                Box::new(RecordingStore::default()),
                Box::new(RecordingWarehouse::default()),
            )
        }
    }

    #[test]
    fn retry_recovers_from_one_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = tokio_test::block_on(run_with_retry(
            flaky_factory(&calls, 1),
            now(),
            1,
            Duration::ZERO,
        ))
        .unwrap();
        assert_eq!(result, RunResult::Loaded(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn no_retries_fails_after_one_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let err = tokio_test::block_on(run_with_retry(
            flaky_factory(&calls, 1),
            now(),
            0,
            Duration::ZERO,
        ))
        .unwrap_err();
        assert!(format!("{:#}", err).contains("fetch failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retries_are_bounded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let err = tokio_test::block_on(run_with_retry(
            flaky_factory(&calls, usize::MAX),
            now(),
            2,
            Duration::ZERO,
        ))
        .unwrap_err();
        assert!(err.downcast_ref::<EtlError>().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn oversized_window_is_rejected_before_running() {
        let mut config = AppConfig::default();
        config.source.window_days = i64::MAX;
        let source = StubSource { result: Ok(example()), seen: Default::default() };
        let built = Pipeline::new(
            config,
            Box::new(source),
            Box::new(RecordingStore::default()),
            Box::new(RecordingWarehouse::default()),
        );
        assert!(built.is_err());
    }
}
