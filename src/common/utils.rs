use crate::model::CandidateProxy;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::collections::HashSet;
use tracing::Level;

/// 将浮点数四舍五入为两位小数。
pub fn round2(val: f64) -> f64 {
    (val * 100.0).round() / 100.0
}

/// 按 (类型, 地址) 去重，保留首次出现的顺序。
pub fn dedup_proxies(proxies: Vec<CandidateProxy>) -> Vec<CandidateProxy> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();

    for proxy in proxies.into_iter() {
        let key = format!("{}://{}", proxy.kind, proxy.address);
        if seen.insert(key) {
            result.push(proxy);
        }
    }
    result
}

/// 生成 testedAt 字段：UTC，精确到秒，形如 `2025-08-20T14:30:00Z`。
pub fn format_tested_at(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// 解析存储中的 testedAt。
///
/// 接受以下格式，其余一律返回 `None`：
/// - RFC 3339：`2025-08-20T14:30:00Z`、`2025-08-20T14:30:00.123+08:00`
/// - 无时区的 ISO 8601：`2025-08-20T14:30:00`、`2025-08-20T14:30:00.123456`
/// - `2025-08-20 14:30:00`（可带小数秒）
///
/// 无时区的写法按 UTC 处理。
pub fn parse_tested_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

// 把字符串转换成 Level，忽略大小写，不识别时返回 None
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}
