//! # verifier 模块
//!
//! 批量验证代理并把可用代理写入存储。
//!
//! - 先按 (类型, 地址) 去重；
//! - 通过信号量限制同时进行的验证数量；
//! - 每个验证完成后原子地更新统计，计数与完成顺序无关；
//! - 验证通过的代理在占用名额期间同步写入存储，写入失败只记录并计数；
//! - 等待所有任务结束后再给出最终统计，任务 panic 也会计为失败。

use crate::common::utils::dedup_proxies;
use crate::db::RecordStore;
use crate::model::{CandidateProxy, ProxyKind, ValidatedProxy};
use crate::service::validator::ProxyValidator;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// 每验证多少个代理输出一次进度。
const PROGRESS_EVERY: usize = 25;

pub const DEFAULT_ERROR_SAMPLE: usize = 10;

/// 单一类型的计数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindTally {
    pub tested: usize,
    pub working: usize,
    pub failed: usize,
}

/// 一批验证的统计快照，只在所有任务结束后生成。
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatistics {
    pub total_tested: usize,
    pub total_working: usize,
    pub total_failed: usize,
    pub per_kind: BTreeMap<ProxyKind, KindTally>,
    pub persisted: usize,
    pub persist_errors: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Default)]
struct KindCounters {
    tested: AtomicUsize,
    working: AtomicUsize,
    failed: AtomicUsize,
}

/// 验证过程中被多个任务并发更新的计数器。
#[derive(Default)]
struct StatsRecorder {
    tested: AtomicUsize,
    working: AtomicUsize,
    failed: AtomicUsize,
    persisted: AtomicUsize,
    persist_errors: AtomicUsize,
    per_kind: [KindCounters; ProxyKind::ALL.len()],
}

impl StatsRecorder {
    /// 记录一次验证结果，返回目前已完成的数量。
    fn record(&self, kind: ProxyKind, working: bool) -> usize {
        let counters = &self.per_kind[kind.index()];
        counters.tested.fetch_add(1, Ordering::SeqCst);
        if working {
            self.working.fetch_add(1, Ordering::SeqCst);
            counters.working.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
            counters.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.tested.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record_persist(&self, ok: bool) {
        if ok {
            self.persisted.fetch_add(1, Ordering::SeqCst);
        } else {
            self.persist_errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn snapshot(&self, started_at: DateTime<Utc>) -> BatchStatistics {
        let per_kind = ProxyKind::ALL
            .iter()
            .map(|kind| {
                let c = &self.per_kind[kind.index()];
                let tally = KindTally {
                    tested: c.tested.load(Ordering::SeqCst),
                    working: c.working.load(Ordering::SeqCst),
                    failed: c.failed.load(Ordering::SeqCst),
                };
                (*kind, tally)
            })
            .collect();

        BatchStatistics {
            total_tested: self.tested.load(Ordering::SeqCst),
            total_working: self.working.load(Ordering::SeqCst),
            total_failed: self.failed.load(Ordering::SeqCst),
            per_kind,
            persisted: self.persisted.load(Ordering::SeqCst),
            persist_errors: self.persist_errors.load(Ordering::SeqCst),
            started_at,
            finished_at: Utc::now(),
        }
    }
}

enum TaskOutcome {
    Working {
        proxy: ValidatedProxy,
        persist_error: Option<String>,
    },
    Failed,
}

/// 一批验证的结果。
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub statistics: BatchStatistics,
    pub working: Vec<ValidatedProxy>,
    pub errors_count: usize,
    /// 前 N 条错误信息。
    pub errors: Vec<String>,
}

pub struct ValidationPool {
    validator: ProxyValidator,
    store: Arc<dyn RecordStore>,
    workers: usize,
    error_sample: usize,
}

impl ValidationPool {
    /// `workers` 为最大并发验证数，传 0 时按 1 处理。
    pub fn new(validator: ProxyValidator, store: Arc<dyn RecordStore>, workers: usize) -> Self {
        Self {
            validator,
            store,
            workers: workers.max(1),
            error_sample: DEFAULT_ERROR_SAMPLE,
        }
    }

    pub fn with_error_sample(mut self, error_sample: usize) -> Self {
        self.error_sample = error_sample;
        self
    }

    /// 验证全部候选代理，等所有任务结束后返回结果。
    pub async fn run(&self, candidates: Vec<CandidateProxy>) -> BatchReport {
        let candidates = dedup_proxies(candidates);
        let len = candidates.len();
        let started_at = Utc::now();

        info!("========== [代理验证阶段] ==========");
        info!(
            "🚀 开始批量验证代理，共 {} 条，并发 {}，测速节点：{}",
            len,
            self.workers,
            self.validator.targets().join(", ")
        );

        let stats = Arc::new(StatsRecorder::default());
        let semaphore = Arc::new(Semaphore::new(self.workers));

        let (labels, handles): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .map(|candidate| {
                let stats = Arc::clone(&stats);
                let semaphore = Arc::clone(&semaphore);
                let validator = self.validator.clone();
                let store = Arc::clone(&self.store);
                let label = candidate.to_string();
                let kind = candidate.kind;

                let handle = tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        stats.record(candidate.kind, false);
                        return TaskOutcome::Failed;
                    };
                    verify_single(&candidate, &validator, store.as_ref(), &stats, len).await
                });
                ((kind, label), handle)
            })
            .unzip();

        let mut working = Vec::new();
        let mut errors = Vec::new();
        let mut errors_count = 0usize;
        let mut push_error = |message: String| {
            errors_count += 1;
            if errors.len() < self.error_sample {
                errors.push(message);
            }
        };

        let results = join_all(handles).await;
        for ((kind, label), result) in labels.into_iter().zip(results) {
            match result {
                Ok(TaskOutcome::Working { proxy, persist_error }) => {
                    if let Some(e) = persist_error {
                        push_error(format!("{}: {}", label, e));
                    }
                    working.push(proxy);
                }
                Ok(TaskOutcome::Failed) => {}
                Err(e) => {
                    error!("❌ {} 验证任务异常退出：{}", label, e);
                    stats.record(kind, false);
                    push_error(format!("{}: task aborted: {}", label, e));
                }
            }
        }

        let statistics = stats.snapshot(started_at);
        info!("========== [结果统计完成 ✅] ==========");
        info!(
            "✅ 验证完成：总计 {} 条，成功 {} 条，失败 {} 条，写入 {} 条，写入失败 {} 条",
            statistics.total_tested,
            statistics.total_working,
            statistics.total_failed,
            statistics.persisted,
            statistics.persist_errors
        );

        BatchReport {
            statistics,
            working,
            errors_count,
            errors,
        }
    }
}

/// 验证单个代理，成功则写入存储。
async fn verify_single(
    candidate: &CandidateProxy,
    validator: &ProxyValidator,
    store: &dyn RecordStore,
    stats: &StatsRecorder,
    total: usize,
) -> TaskOutcome {
    let start = Instant::now();
    let outcome = validator.validate(candidate).await;

    let result = if outcome.success {
        let proxy = ValidatedProxy::new(candidate, outcome.latency_seconds, Utc::now());
        info!(
            "🟢 {} 可用（{}，{:.2}s）",
            candidate, outcome.endpoint_label, proxy.response_time_seconds
        );

        let persist_error = match store.create(&proxy).await {
            Ok(record) => {
                debug!("{} 已写入，id {}", candidate, record.id);
                stats.record_persist(true);
                None
            }
            Err(e) => {
                warn!("⚠️ {} 写入存储失败：{}", candidate, e);
                stats.record_persist(false);
                Some(e.to_string())
            }
        };
        TaskOutcome::Working { proxy, persist_error }
    } else {
        debug!(
            "🔴 {} 无效代理，耗时 {}ms：{}",
            candidate,
            start.elapsed().as_millis(),
            outcome.endpoint_label
        );
        TaskOutcome::Failed
    };

    let done = stats.record(candidate.kind, outcome.success);
    if done % PROGRESS_EVERY == 0 {
        info!("📊 进度：{}/{}", done, total);
    }
    result
}
