//! 验证批次的汇总与本地导出。

use crate::model::{ProxyKind, ValidatedProxy};
use crate::service::verifier::{BatchReport, BatchStatistics};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// 一次采集验证运行的最终汇总，结束时以 JSON 输出。
#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub success: bool,
    /// 抓取失败而被跳过的列表源。
    pub fetch_errors: Vec<String>,
    pub statistics: BatchStatistics,
    /// 百分比，保留一位小数。
    pub success_rate: f64,
    pub duration_seconds: f64,
    pub fastest: BTreeMap<ProxyKind, ValidatedProxy>,
    pub errors_count: usize,
    pub errors: Vec<String>,
}

impl ValidationSummary {
    pub fn new(report: &BatchReport, fetch_errors: Vec<String>) -> Self {
        let stats = &report.statistics;
        let success_rate = if stats.total_tested == 0 {
            0.0
        } else {
            (stats.total_working as f64 / stats.total_tested as f64 * 1000.0).round() / 10.0
        };
        let duration = stats.finished_at - stats.started_at;

        Self {
            success: stats.persist_errors == 0 && fetch_errors.is_empty(),
            fetch_errors,
            statistics: stats.clone(),
            success_rate,
            duration_seconds: duration.num_milliseconds() as f64 / 1000.0,
            fastest: fastest_by_kind(&report.working),
            errors_count: report.errors_count,
            errors: report.errors.clone(),
        }
    }
}

/// 每种类型中响应最快的代理。
pub fn fastest_by_kind(working: &[ValidatedProxy]) -> BTreeMap<ProxyKind, ValidatedProxy> {
    let mut fastest: BTreeMap<ProxyKind, ValidatedProxy> = BTreeMap::new();
    for proxy in working {
        let better = fastest
            .get(&proxy.kind)
            .is_none_or(|best| proxy.response_time_seconds < best.response_time_seconds);
        if better {
            fastest.insert(proxy.kind, proxy.clone());
        }
    }
    fastest
}

/// 把可用代理按类型写到 `dir` 下：
/// `working_{kind}_latest.txt`（每行一个地址）和 `working_{kind}_latest.json`。
///
/// `kinds` 为本次抓取成功的类型，每个都会重写，没有可用代理时写空文件，
/// 避免上一批的结果仍被当作最新。
pub fn export_working(
    dir: &Path,
    kinds: &[ProxyKind],
    working: &[ValidatedProxy],
) -> anyhow::Result<Vec<String>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    for &kind in kinds {
        let list: Vec<&ValidatedProxy> = working.iter().filter(|p| p.kind == kind).collect();

        let txt = dir.join(format!("working_{}_latest.txt", kind));
        let lines: String = list.iter().map(|p| format!("{}\n", p.address)).collect();
        fs::write(&txt, lines)?;

        let json = dir.join(format!("working_{}_latest.json", kind));
        fs::write(&json, serde_json::to_string_pretty(&list)?)?;

        info!("💾 已导出 {} 条 {} 代理到 {}", list.len(), kind, txt.display());
        written.push(txt.display().to_string());
        written.push(json.display().to_string());
    }

    Ok(written)
}
