//! Audit archive: the cleaned rows as a CSV object, one per run date.

use crate::models::CanonicalRow;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

// ── Store trait ───────────────────────────────────────────────────────────────

/// "Upload named blob to named bucket." Creates or overwrites exactly one object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;
}

// ── Naming ────────────────────────────────────────────────────────────────────

/// `sp500_2026-03-02.csv`; depends on nothing but the stem and the run date.
pub fn artifact_name(stem: &str, run_date: NaiveDate) -> String {
    format!("{}_{}.csv", stem, run_date.format("%Y-%m-%d"))
}

pub fn object_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

// ── Serialization ─────────────────────────────────────────────────────────────

/// Header `date,<value_column>`, one line per row, input order kept.
pub fn render_csv(rows: &[CanonicalRow], value_column: &str) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["date", value_column])?;
    for row in rows {
        writer
            .serialize((row.date, row.metric_value))
            .with_context(|| format!("serialize row {}", row.date))?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("CSV flush failed: {}", e.error()))
}

// ── Local filesystem store ────────────────────────────────────────────────────

/// Object store backed by a directory: `<root>/<bucket>/<key>`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_segment(bucket).with_context(|| format!("bad bucket name {:?}", bucket))?;
        validate_key(key).with_context(|| format!("bad object key {:?}", key))?;
        Ok(self.root.join(bucket).join(key))
    }
}

fn validate_segment(s: &str) -> Result<()> {
    if s.trim().is_empty() || s.contains('/') || s.contains('\\') || s == "." || s == ".." {
        anyhow::bail!("must be a single non-empty path segment");
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        anyhow::bail!("key is empty");
    }
    if key.contains('\\') {
        anyhow::bail!("key must not contain '\\'");
    }
    let all_normal = Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !all_normal {
        anyhow::bail!("key must be relative without '.' or '..' segments");
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }

        // Write beside the target, then rename, so readers never see a partial object.
        let mut tmp = path.clone().into_os_string();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);

        let written = async {
            tokio::fs::write(&tmp, &body)
                .await
                .with_context(|| format!("Failed to write {:?}", tmp))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .with_context(|| format!("Failed to move {:?} into place", path))
        }
        .await;

        if written.is_err() {
            tokio::fs::remove_file(&tmp).await.ok();
        }
        written?;

        debug!("Wrote {} bytes to {}/{}", body.len(), bucket, key);
        Ok(())
    }
}
