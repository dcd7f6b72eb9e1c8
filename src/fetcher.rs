//! # fetcher 模块
//!
//! 从公开的代理列表（每行一个 `host:port` 的纯文本）抓取候选代理。
//!
//! 列表内容来自第三方，不做格式假设：空行、注释或带多余字段的行都会被跳过，
//! 某个类型抓取失败时记录错误并继续抓取其他类型。

use crate::common::error::{HarvestError, Result};
use crate::common::utils::dedup_proxies;
use crate::model::{CandidateProxy, ProxyKind, SourceConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\[[0-9A-Fa-f:.]+\]|[A-Za-z0-9.\-]+):(\d{1,5})$").expect("address regex")
});

/// 多个类型的抓取结果。
#[derive(Debug, Default)]
pub struct FetchResult {
    pub candidates: Vec<CandidateProxy>,
    /// 抓取成功的类型（列表可能为空）。
    pub fetched: Vec<ProxyKind>,
    /// 抓取失败而被跳过的类型的错误信息。
    pub errors: Vec<String>,
}

pub struct SourceFetcher {
    client: Client,
    base_url: String,
}

impl SourceFetcher {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn list_url(&self, kind: ProxyKind) -> String {
        format!("{}/{}.txt", self.base_url, kind.as_str())
    }

    /// 抓取某一类型的代理列表，返回去重后的候选代理。
    pub async fn fetch(&self, kind: ProxyKind) -> Result<Vec<CandidateProxy>> {
        let url = self.list_url(kind);
        info!("Fetching {} proxies from {}", kind, url);

        let response = self.client.get(&url).send().await.map_err(|e| HarvestError::Fetch {
            kind,
            reason: e.to_string(),
        })?;

        if response.status() != StatusCode::OK {
            return Err(HarvestError::Fetch {
                kind,
                reason: format!("HTTP {}", response.status()),
            });
        }

        let text = response.text().await.map_err(|e| HarvestError::Fetch {
            kind,
            reason: e.to_string(),
        })?;

        let list = parse_proxy_list(&text, kind);
        info!("{} - got {} proxies", kind, list.len());
        Ok(list)
    }

    /// 依次抓取多个类型。单个类型失败只记录，不影响其他类型。
    pub async fn fetch_all(&self, kinds: &[ProxyKind]) -> FetchResult {
        let mut result = FetchResult::default();

        for &kind in kinds {
            match self.fetch(kind).await {
                Ok(list) => {
                    result.candidates.extend(list);
                    result.fetched.push(kind);
                }
                Err(e) => {
                    warn!("⚠️ 跳过 {} 类型：{}", kind, e);
                    result.errors.push(e.to_string());
                }
            }
        }

        result.candidates = dedup_proxies(result.candidates);
        result
    }
}

/// 解析换行分隔的代理列表。
///
/// 每行取第一个空白分隔的字段，必须形如 `host:port` 且端口在 1..=65535。
pub fn parse_proxy_list(text: &str, kind: ProxyKind) -> Vec<CandidateProxy> {
    let mut list = Vec::new();
    let mut skipped = 0usize;

    for line in text.lines() {
        let Some(token) = line.split_whitespace().next() else {
            continue;
        };

        if is_valid_address(token) {
            list.push(CandidateProxy::new(token, kind));
        } else {
            skipped += 1;
        }
    }

    if skipped > 0 {
        debug!("{} 列表中跳过 {} 行无法识别的内容", kind, skipped);
    }

    dedup_proxies(list)
}

fn is_valid_address(token: &str) -> bool {
    ADDRESS_RE
        .captures(token)
        .and_then(|cap| cap.get(1))
        .and_then(|port| port.as_str().parse::<u16>().ok())
        .is_some_and(|port| port > 0)
}
