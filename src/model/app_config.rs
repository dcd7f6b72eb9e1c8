//! 应用配置。
//!
//! 加载顺序（后者覆盖前者）：
//! 1. 内置默认值；
//! 2. 可选的 `Config.toml`；
//! 3. `HARVEST__<SECTION>__<KEY>` 环境变量，例如 `HARVEST__VERIFY__WORKERS=40`；
//! 4. `APPWRITE_ENDPOINT` / `APPWRITE_PROJECT_ID` / `APPWRITE_API_KEY` /
//!    `APPWRITE_DATABASE_ID` / `APPWRITE_COLLECTION_ID`；
//! 5. 命令行参数（由 `main` 写回）。

use crate::common::error::{HarvestError, Result};
use crate::model::ProxyKind;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_STORE_ENDPOINT: &str = "https://cloud.appwrite.io/v1";
pub const DEFAULT_SOURCE_BASE_URL: &str = "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master";
/// 保留时长上限：100 年。
pub const MAX_RETENTION_HOURS: u64 = 100 * 365 * 24;
pub const DEFAULT_TEST_URLS: [&str; 4] = [
    "http://httpbin.org/get",
    "https://api.ipify.org",
    "https://www.google.com",
    "https://www.youtube.com",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub source: SourceConfig,
    pub verify: VerifyConfig,
    pub sweep: SweepConfig,
    pub log: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    pub endpoint: String,
    /// `X-Appwrite-Project`，必填。
    pub project_id: Option<String>,
    /// `X-Appwrite-Key`，必填。
    pub api_key: Option<String>,
    pub database_id: String,
    pub collection_id: String,
    /// 分页读取时每页条数。
    pub page_size: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// 代理列表根地址，实际请求 `{base_url}/{kind}.txt`。
    pub base_url: String,
    pub timeout_secs: u64,
    pub kinds: Vec<ProxyKind>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifyConfig {
    /// 同时进行验证的代理数量。
    ///
    /// 调大可以提高吞吐，但所有探测共享本机出口带宽和防火墙连接数，
    /// 并发过高时单个代理的成功率会明显下降。
    pub workers: usize,
    /// 单次探测超时（秒）。
    pub timeout_secs: u64,
    /// 按顺序尝试，任一成功即视为可用。
    pub test_urls: Vec<String>,
    /// 设置后把可用代理额外导出到本地目录。
    pub output_dir: Option<String>,
    pub error_sample: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweepConfig {
    /// 记录保留时长（小时），超过即删除。
    pub retention_hours: u64,
    pub delete_workers: usize,
    pub error_sample: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub dir: String,
    pub file_name: String,
    pub console_levels: Vec<String>,
}

impl StoreConfig {
    /// 返回 (project_id, api_key)，缺任何一个都是配置错误。
    pub fn credentials(&self) -> Result<(String, String)> {
        let project = non_blank(self.project_id.as_deref())
            .ok_or_else(|| HarvestError::Config("缺少 store.project_id（APPWRITE_PROJECT_ID）".into()))?;
        let key = non_blank(self.api_key.as_deref())
            .ok_or_else(|| HarvestError::Config("缺少 store.api_key（APPWRITE_API_KEY）".into()))?;
        Ok((project, key))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl VerifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SweepConfig {
    /// 超出 [`MAX_RETENTION_HOURS`] 时按上限计算，`validate` 会先拒绝这类配置。
    pub fn retention(&self) -> TimeDelta {
        let hours = self.retention_hours.min(MAX_RETENTION_HOURS) as i64;
        TimeDelta::try_hours(hours).unwrap_or(TimeDelta::MAX)
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let env: config::Map<String, String> = std::env::vars().collect();
        let config = Self::load_with(Some("Config"), env)?;
        config.validate()?;
        Ok(config)
    }

    /// `file` 为配置文件名（不含扩展名，可不存在），`env` 为环境变量快照。
    ///
    /// 不做取值检查，调用方在合并命令行参数之后再调用 [`AppConfig::validate`]。
    pub fn load_with(file: Option<&str>, env: config::Map<String, String>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("store.endpoint", DEFAULT_STORE_ENDPOINT)?
            .set_default("store.database_id", "ProxyDatabase")?
            .set_default("store.collection_id", "WorkingProxies")?
            .set_default("store.page_size", 100)?
            .set_default("store.request_timeout_secs", 30)?
            .set_default("source.base_url", DEFAULT_SOURCE_BASE_URL)?
            .set_default("source.timeout_secs", 30)?
            .set_default("source.kinds", ProxyKind::ALL.iter().map(|k| k.as_str()).collect::<Vec<_>>())?
            .set_default("verify.workers", 25)?
            .set_default("verify.timeout_secs", 15)?
            .set_default("verify.test_urls", DEFAULT_TEST_URLS.to_vec())?
            .set_default("verify.error_sample", 10)?
            .set_default("sweep.retention_hours", 48)?
            .set_default("sweep.delete_workers", 20)?
            .set_default("sweep.error_sample", 10)?
            .set_default("log.dir", "logs")?
            .set_default("log.file_name", "all.log")?
            .set_default("log.console_levels", vec!["error", "warn", "info"])?;

        if let Some(file) = file {
            builder = builder.add_source(config::File::with_name(file).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("HARVEST")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("source.kinds")
                .with_list_parse_key("verify.test_urls")
                .with_list_parse_key("log.console_levels")
                .source(Some(env.clone())),
        );

        for (key, var) in [
            ("store.endpoint", "APPWRITE_ENDPOINT"),
            ("store.project_id", "APPWRITE_PROJECT_ID"),
            ("store.api_key", "APPWRITE_API_KEY"),
            ("store.database_id", "APPWRITE_DATABASE_ID"),
            ("store.collection_id", "APPWRITE_COLLECTION_ID"),
        ] {
            builder = builder.set_override_option(key, env.get(var).cloned())?;
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// 检查数值范围。凭据在创建存储客户端时单独检查。
    pub fn validate(&self) -> Result<()> {
        if self.verify.workers == 0 {
            return Err(HarvestError::Config("verify.workers 必须大于 0".into()));
        }
        if self.sweep.delete_workers == 0 {
            return Err(HarvestError::Config("sweep.delete_workers 必须大于 0".into()));
        }
        if self.store.page_size == 0 {
            return Err(HarvestError::Config("store.page_size 必须大于 0".into()));
        }
        if self.verify.test_urls.is_empty() {
            return Err(HarvestError::Config("verify.test_urls 不能为空".into()));
        }
        if self.sweep.retention_hours == 0 || self.sweep.retention_hours > MAX_RETENTION_HOURS {
            return Err(HarvestError::Config(format!(
                "sweep.retention_hours 必须在 1..={} 之间",
                MAX_RETENTION_HOURS
            )));
        }
        Ok(())
    }
}
