//! # sweeper 模块
//!
//! 清理过期的代理记录。
//!
//! 一次清理依次经过 `Listing → Classifying → Deleting → Summarizing`：
//! 读取全部记录，按 testedAt 与保留时长比较，过期的交给并发删除池。
//! 只有枚举阶段完全无法访问存储时才会中止，此时不做任何删除；
//! 其他单条失败（时间戳无法解析、删除失败）都只记录，不影响剩余记录。
//! 时间戳无法解析的记录一律保留。

use crate::common::error::HarvestError;
use crate::common::utils::parse_tested_at;
use crate::db::{DeleteOutcome, RecordStore};
use crate::model::SweepConfig;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// 每删除多少条输出一次进度。
const PROGRESS_EVERY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    Listing,
    Classifying,
    Deleting,
    Summarizing,
}

impl fmt::Display for SweepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SweepPhase::Listing => "listing",
            SweepPhase::Classifying => "classifying",
            SweepPhase::Deleting => "deleting",
            SweepPhase::Summarizing => "summarizing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub retention: TimeDelta,
    pub delete_workers: usize,
    pub page_size: usize,
    pub error_sample: usize,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            retention: TimeDelta::days(2),
            delete_workers: 20,
            page_size: crate::db::manager::DEFAULT_PAGE_SIZE,
            error_sample: 10,
        }
    }
}

impl SweepOptions {
    pub fn from_config(sweep: &SweepConfig, page_size: usize) -> Self {
        Self {
            retention: sweep.retention(),
            delete_workers: sweep.delete_workers,
            page_size,
            error_sample: sweep.error_sample,
        }
    }
}

/// 一次清理的汇总。
#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub success: bool,
    pub timestamp: String,
    pub cutoff: String,
    pub total_checked: usize,
    pub deleted: usize,
    /// 删除时已不存在（404），按成功处理。
    pub already_deleted: usize,
    pub retained: usize,
    pub errors_count: usize,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
}

pub struct RetentionSweeper {
    store: Arc<dyn RecordStore>,
    options: SweepOptions,
}

/// 累积错误，只保留前 N 条文本。
struct ErrorLog {
    count: usize,
    sample: Vec<String>,
    limit: usize,
}

impl ErrorLog {
    fn new(limit: usize) -> Self {
        Self {
            count: 0,
            sample: Vec::new(),
            limit,
        }
    }

    fn push(&mut self, err: &HarvestError) {
        error!("{}", err);
        self.count += 1;
        if self.sample.len() < self.limit {
            self.sample.push(err.to_string());
        }
    }
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn RecordStore>, options: SweepOptions) -> Self {
        Self { store, options }
    }

    pub async fn sweep(&self) -> SweepSummary {
        self.sweep_at(Utc::now()).await
    }

    /// 以 `now` 为当前时间执行一次清理。
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepSummary {
        // 溢出时取最早时间，即什么都不删
        let cutoff = now
            .checked_sub_signed(self.options.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut errors = ErrorLog::new(self.options.error_sample);

        info!("========== [过期代理清理] ==========");
        info!(
            "🧹 截止时间 {}，删除早于该时间的记录（保留 {} 小时）",
            iso(cutoff),
            self.options.retention.num_hours()
        );

        enter(SweepPhase::Listing);
        let records = match self.store.list_all(self.options.page_size).await {
            Ok(records) => records,
            Err(e) => {
                enter(SweepPhase::Summarizing);
                error!("❌ 无法读取存储，本次清理中止：{}", e);
                return SweepSummary {
                    success: false,
                    timestamp: iso(now),
                    cutoff: iso(cutoff),
                    total_checked: 0,
                    deleted: 0,
                    already_deleted: 0,
                    retained: 0,
                    errors_count: 1,
                    errors: vec![e.to_string()],
                    fatal_error: Some(e.to_string()),
                };
            }
        };

        enter(SweepPhase::Classifying);
        let total_checked = records.len();
        let mut expired = Vec::new();
        for record in records {
            match parse_tested_at(&record.tested_at) {
                Some(tested_at) if tested_at < cutoff => expired.push(record.id),
                Some(_) => {}
                None => errors.push(&HarvestError::TimestampParse {
                    id: record.id,
                    value: record.tested_at,
                }),
            }
        }
        info!("共检查 {} 条，过期 {} 条", total_checked, expired.len());

        enter(SweepPhase::Deleting);
        let (deleted, already_deleted) = self.delete_all(expired, &mut errors).await;

        enter(SweepPhase::Summarizing);
        let summary = SweepSummary {
            success: true,
            timestamp: iso(now),
            cutoff: iso(cutoff),
            total_checked,
            deleted,
            already_deleted,
            retained: total_checked - deleted - already_deleted,
            errors_count: errors.count,
            errors: errors.sample,
            fatal_error: None,
        };

        info!(
            "✅ 清理完成：检查 {} 条，删除 {} 条，已不存在 {} 条，保留 {} 条，错误 {} 条",
            summary.total_checked,
            summary.deleted,
            summary.already_deleted,
            summary.retained,
            summary.errors_count
        );
        summary
    }

    /// 并发删除，返回 (删除数, 已不存在数)。
    async fn delete_all(&self, ids: Vec<String>, errors: &mut ErrorLog) -> (usize, usize) {
        let semaphore = Arc::new(Semaphore::new(self.options.delete_workers.max(1)));

        let (ids, handles): (Vec<_>, Vec<_>) = ids
            .into_iter()
            .map(|id| {
                let semaphore = Arc::clone(&semaphore);
                let store = Arc::clone(&self.store);
                let task_id = id.clone();
                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.map_err(|e| HarvestError::Delete {
                        id: task_id.clone(),
                        reason: e.to_string(),
                    })?;
                    store.delete(&task_id).await
                });
                (id, handle)
            })
            .unzip();

        let mut deleted = 0usize;
        let mut already_deleted = 0usize;
        let results = join_all(handles).await;
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(Ok(DeleteOutcome::Deleted)) => {
                    deleted += 1;
                    if deleted % PROGRESS_EVERY == 0 {
                        info!("已删除 {} 条过期记录...", deleted);
                    }
                }
                Ok(Ok(DeleteOutcome::AlreadyGone)) => {
                    warn!("记录 {} 已不存在，跳过", id);
                    already_deleted += 1;
                }
                Ok(Err(e)) => errors.push(&e),
                Err(e) => errors.push(&HarvestError::Delete {
                    id,
                    reason: format!("task aborted: {}", e),
                }),
            }
        }

        (deleted, already_deleted)
    }
}

fn enter(phase: SweepPhase) {
    info!(phase = %phase, "sweep phase");
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::utils::format_tested_at;
    use crate::db::memory::MemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 20, 12, 0, 0).unwrap()
    }

    fn sweeper(store: Arc<MemoryStore>) -> RetentionSweeper {
        let options = SweepOptions {
            page_size: 3,
            delete_workers: 4,
            ..SweepOptions::default()
        };
        RetentionSweeper::new(store, options)
    }

    #[tokio::test]
    async fn test_deletes_expired_and_keeps_fresh() {
        let store = Arc::new(MemoryStore::new());
        let old = store.insert("1.1.1.1:80", &format_tested_at(now() - TimeDelta::days(3)));
        let fresh = store.insert("2.2.2.2:80", &format_tested_at(now() - TimeDelta::days(1)));
        let bad = store.insert("3.3.3.3:80", "not a date");

        let summary = sweeper(store.clone()).sweep_at(now()).await;

        assert!(summary.success);
        assert_eq!(summary.total_checked, 3);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.retained, 2);
        assert_eq!(summary.errors_count, 1);
        assert!(summary.errors[0].contains(&bad));

        let left = store.ids();
        assert!(!left.contains(&old));
        assert!(left.contains(&fresh));
        assert!(left.contains(&bad));
    }

    #[tokio::test]
    async fn test_accepts_mixed_timestamp_formats() {
        let store = Arc::new(MemoryStore::new());
        store.insert("a:1", "2025-08-17T08:00:00.123456");
        store.insert("b:1", "2025-08-17 08:00:00");
        store.insert("c:1", "2025-08-17T08:00:00.5+02:00");
        store.insert("d:1", "2025-08-19T08:00:00Z");

        let summary = sweeper(store.clone()).sweep_at(now()).await;
        assert_eq!(summary.deleted, 3);
        assert_eq!(summary.retained, 1);
        assert_eq!(summary.errors_count, 0);
    }

    #[tokio::test]
    async fn test_record_exactly_at_cutoff_is_kept() {
        let store = Arc::new(MemoryStore::new());
        store.insert("a:1", &format_tested_at(now() - TimeDelta::days(2)));
        let summary = sweeper(store).sweep_at(now()).await;
        assert_eq!(summary.deleted, 0);
        assert_eq!(summary.retained, 1);
    }

    #[tokio::test]
    async fn test_missing_record_is_already_deleted_not_error() {
        let store = Arc::new(MemoryStore::new());
        let gone = store.insert("a:1", &format_tested_at(now() - TimeDelta::days(5)));
        store.insert("b:1", &format_tested_at(now() - TimeDelta::days(5)));
        store.vanish_on_delete(&gone);

        let summary = sweeper(store).sweep_at(now()).await;
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.already_deleted, 1);
        assert_eq!(summary.errors_count, 0);
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn test_delete_failure_does_not_block_others() {
        let store = Arc::new(MemoryStore::new());
        let stuck = store.insert("a:1", &format_tested_at(now() - TimeDelta::days(5)));
        for i in 0..10 {
            store.insert(&format!("b:{}", i), &format_tested_at(now() - TimeDelta::days(4)));
        }
        store.fail_delete_of(&stuck);

        let summary = sweeper(store.clone()).sweep_at(now()).await;
        assert!(summary.success);
        assert_eq!(summary.deleted, 10);
        assert_eq!(summary.errors_count, 1);
        assert!(summary.errors[0].contains(&stuck));
        assert_eq!(store.ids(), vec![stuck]);
    }

    #[tokio::test]
    async fn test_second_sweep_deletes_nothing() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..8 {
            let age = if i % 2 == 0 { TimeDelta::days(3) } else { TimeDelta::hours(5) };
            store.insert(&format!("c:{}", i), &format_tested_at(now() - age));
        }
        let sweeper = sweeper(store.clone());

        let first = sweeper.sweep_at(now()).await;
        assert_eq!(first.deleted, 4);

        let deletes_before = store.delete_calls();
        let second = sweeper.sweep_at(now()).await;
        assert_eq!(second.deleted, 0);
        assert_eq!(second.total_checked, 4);
        assert_eq!(store.delete_calls(), deletes_before);
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_without_deleting() {
        let store = Arc::new(MemoryStore::with_records(5));
        store.fail_listing();

        let summary = sweeper(store.clone()).sweep_at(now()).await;
        assert!(!summary.success);
        assert!(summary.fatal_error.is_some());
        assert_eq!(summary.deleted, 0);
        assert_eq!(store.delete_calls(), 0);
        assert_eq!(store.ids().len(), 5);
    }

    #[tokio::test]
    async fn test_oversized_retention_deletes_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.insert("a:1", "1970-01-01T00:00:00Z");
        let options = SweepOptions {
            retention: TimeDelta::MAX,
            ..SweepOptions::default()
        };

        let summary = RetentionSweeper::new(store.clone(), options).sweep_at(now()).await;
        assert!(summary.success);
        assert_eq!(summary.deleted, 0);
        assert_eq!(store.ids().len(), 1);
    }

    #[tokio::test]
    async fn test_error_sample_capped() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..15 {
            store.insert(&format!("d:{}", i), "garbage");
        }
        let summary = sweeper(store).sweep_at(now()).await;
        assert_eq!(summary.errors_count, 15);
        assert_eq!(summary.errors.len(), 10);
        assert_eq!(summary.retained, 15);
    }

    #[test]
    fn test_summary_json_shape() {
        let summary = SweepSummary {
            success: true,
            timestamp: "t".into(),
            cutoff: "c".into(),
            total_checked: 2,
            deleted: 1,
            already_deleted: 0,
            retained: 1,
            errors_count: 0,
            errors: vec![],
            fatal_error: None,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["deleted"], 1);
        assert!(json.get("fatal_error").is_none());
    }
}
