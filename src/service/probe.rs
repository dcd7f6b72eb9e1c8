//! # probe 模块
//!
//! 通过代理向单个目标地址发起一次请求，判断是否可用。
//!
//! 只有 HTTP 200 算成功；状态码不对、连接失败、超时、TLS 错误都归为失败，
//! 具体原因只写进 `endpoint_label` 供排查，不影响后续流程。本层不重试。

use crate::model::{CandidateProxy, ProbeOutcome};
use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode, Url};
use std::time::{Duration, Instant};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// 最多跟随的重定向次数。
const MAX_REDIRECTS: usize = 5;

#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, candidate: &CandidateProxy, target: &str, timeout: Duration) -> ProbeOutcome;
}

/// 基于 reqwest 的探测实现。
///
/// 每次探测都新建客户端，避免不同代理之间共享连接池或代理设置。
/// 代理来源不可信，证书校验是关闭的。
#[derive(Debug, Clone, Default)]
pub struct HttpProbe;

impl HttpProbe {
    pub fn new() -> Self {
        Self
    }

    fn build_client(candidate: &CandidateProxy, timeout: Duration) -> reqwest::Result<Client> {
        let proxy = reqwest::Proxy::all(candidate.proxy_url())?;
        Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .danger_accept_invalid_certs(true)
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(0)
            .build()
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, candidate: &CandidateProxy, target: &str, timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();

        let client = match Self::build_client(candidate, timeout) {
            Ok(client) => client,
            Err(e) => return ProbeOutcome::failure(0.0, format!("client error: {}", e)),
        };

        // 外层再套一层超时，兜底 send() 的连接、握手和响应头读取
        let result = tokio::time::timeout(timeout, client.get(target).send()).await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(Ok(response)) if response.status() == StatusCode::OK => {
                ProbeOutcome::success(elapsed, endpoint_label(target))
            }
            Ok(Ok(response)) => ProbeOutcome::failure(
                elapsed,
                format!("{}: HTTP {}", endpoint_label(target), response.status().as_u16()),
            ),
            Ok(Err(e)) => ProbeOutcome::failure(elapsed, format!("{}: {}", endpoint_label(target), e)),
            Err(_) => ProbeOutcome::failure(elapsed, format!("{}: timeout", endpoint_label(target))),
        }
    }
}

/// 目标地址的主机名，解析失败时原样返回。
pub fn endpoint_label(target: &str) -> String {
    Url::parse(target)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| target.to_string())
}
