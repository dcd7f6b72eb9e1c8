//! 代理相关的数据结构：候选代理、探测结果、已验证代理与存储记录。

use crate::common::utils::{format_tested_at, round2};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// 代理类型。
///
/// 决定出站探测请求使用的代理协议，新增类型时需要在每个 `match` 中显式处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Socks4,
    Socks5,
}

impl ProxyKind {
    pub const ALL: [ProxyKind; 3] = [ProxyKind::Http, ProxyKind::Socks4, ProxyKind::Socks5];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyKind::Http => "http",
            ProxyKind::Socks4 => "socks4",
            ProxyKind::Socks5 => "socks5",
        }
    }

    /// 出站请求使用的代理 URL scheme。
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyKind::Http => "http",
            ProxyKind::Socks4 => "socks4",
            ProxyKind::Socks5 => "socks5",
        }
    }

    /// 在 `ALL` 中的下标，用于按类型分组计数。
    pub fn index(&self) -> usize {
        match self {
            ProxyKind::Http => 0,
            ProxyKind::Socks4 => 1,
            ProxyKind::Socks5 => 2,
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyKind::Http),
            "socks4" => Ok(ProxyKind::Socks4),
            "socks5" => Ok(ProxyKind::Socks5),
            other => Err(format!("未知的代理类型：{}", other)),
        }
    }
}

/// 从代理列表源解析出的候选代理，只在一次验证过程中存在。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateProxy {
    /// `host:port`
    pub address: String,
    pub kind: ProxyKind,
}

impl CandidateProxy {
    pub fn new(address: impl Into<String>, kind: ProxyKind) -> Self {
        Self {
            address: address.into(),
            kind,
        }
    }

    /// 传给 HTTP 客户端的代理地址，如 `socks5://1.2.3.4:1080`。
    pub fn proxy_url(&self) -> String {
        format!("{}://{}", self.kind.scheme(), self.address)
    }
}

impl fmt::Display for CandidateProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.proxy_url())
    }
}

/// 单次（代理, 目标地址）探测的结果。
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency_seconds: f64,
    /// 成功时为目标站点的主机名；失败时为原因，仅用于诊断。
    pub endpoint_label: String,
}

impl ProbeOutcome {
    pub fn success(latency_seconds: f64, endpoint_label: impl Into<String>) -> Self {
        Self {
            success: true,
            latency_seconds,
            endpoint_label: endpoint_label.into(),
        }
    }

    pub fn failure(latency_seconds: f64, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            latency_seconds,
            endpoint_label: reason.into(),
        }
    }
}

/// 验证通过的代理，创建后不再修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedProxy {
    pub address: String,
    pub kind: ProxyKind,
    /// 单位：秒，保留两位小数。
    pub response_time_seconds: f64,
    /// UTC，精确到秒的 ISO 8601 字符串。
    pub tested_at: String,
}

impl ValidatedProxy {
    pub fn new(candidate: &CandidateProxy, response_time_seconds: f64, tested_at: DateTime<Utc>) -> Self {
        Self {
            address: candidate.address.clone(),
            kind: candidate.kind,
            response_time_seconds: round2(response_time_seconds),
            tested_at: format_tested_at(tested_at),
        }
    }
}

/// 存储中的一条记录。
///
/// `tested_at` 保留存储返回的原始字符串，解析放到清理阶段进行，
/// 这样格式异常的记录会被报告出来，而不是在反序列化时丢失。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub address: String,
    /// 原样保留，旧数据里可能出现不认识的类型。
    #[serde(default, deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(default)]
    pub response_time_seconds: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tested_at: String,
}

/// 字符串字段容错：`null` 视为空串，数字等其他值转为文本。
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl PersistedRecord {
    pub fn from_validated(id: impl Into<String>, proxy: &ValidatedProxy) -> Self {
        Self {
            id: id.into(),
            address: proxy.address.clone(),
            kind: proxy.kind.to_string(),
            response_time_seconds: Some(proxy.response_time_seconds),
            tested_at: proxy.tested_at.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in ProxyKind::ALL {
            assert_eq!(kind.as_str().parse::<ProxyKind>().unwrap(), kind);
            assert_eq!(ProxyKind::ALL[kind.index()], kind);
        }
        assert_eq!(" SOCKS5 ".parse::<ProxyKind>().unwrap(), ProxyKind::Socks5);
        assert!("https".parse::<ProxyKind>().is_err());
    }

    #[test]
    fn test_proxy_url_uses_kind_scheme() {
        let p = CandidateProxy::new("10.0.0.1:1080", ProxyKind::Socks4);
        assert_eq!(p.proxy_url(), "socks4://10.0.0.1:1080");
        let p = CandidateProxy::new("10.0.0.1:8080", ProxyKind::Http);
        assert_eq!(p.proxy_url(), "http://10.0.0.1:8080");
    }

    #[test]
    fn test_validated_proxy_wire_format() {
        let candidate = CandidateProxy::new("1.2.3.4:80", ProxyKind::Http);
        let at = Utc.with_ymd_and_hms(2025, 8, 20, 14, 30, 0).unwrap();
        let proxy = ValidatedProxy::new(&candidate, 1.23456, at);

        let json = serde_json::to_value(&proxy).unwrap();
        assert_eq!(json["address"], "1.2.3.4:80");
        assert_eq!(json["kind"], "http");
        assert_eq!(json["responseTimeSeconds"], 1.23);
        assert_eq!(json["testedAt"], "2025-08-20T14:30:00Z");
    }

    #[test]
    fn test_persisted_record_tolerates_store_metadata() {
        let raw = r#"{
            "$id": "66aa01",
            "$collectionId": "c1",
            "$createdAt": "2025-08-20T14:30:01.000+00:00",
            "address": "1.2.3.4:80",
            "kind": "socks5",
            "responseTimeSeconds": 0.8,
            "testedAt": "2025-08-20T14:30:00Z"
        }"#;
        let record: PersistedRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.id, "66aa01");
        assert_eq!(record.kind, "socks5");
        assert_eq!(record.tested_at, "2025-08-20T14:30:00Z");
    }

    #[test]
    fn test_persisted_record_without_tested_at_still_decodes() {
        let record: PersistedRecord = serde_json::from_str(r#"{"$id": "x"}"#).unwrap();
        assert_eq!(record.tested_at, "");
        assert_eq!(record.kind, "");

        let record: PersistedRecord =
            serde_json::from_str(r#"{"$id": "y", "kind": "https", "testedAt": null}"#).unwrap();
        assert_eq!(record.kind, "https");
        assert_eq!(record.tested_at, "");
    }
}
