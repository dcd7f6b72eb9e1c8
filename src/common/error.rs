//! # error 模块
//!
//! 采集、验证、存储与清理各阶段共用的错误类型。
//!
//! 除 `List`（清理时无法枚举存储）之外，其余错误都只影响单个条目，
//! 由调用方记录、计数后继续处理剩余工作。

use crate::model::ProxyKind;
use thiserror::Error;

pub type Result<T, E = HarvestError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum HarvestError {
    /// 配置缺失或非法，在发起任何网络请求之前报告。
    #[error("配置错误：{0}")]
    Config(String),

    /// 代理列表源不可达或返回非 200，跳过该类型继续其他类型。
    #[error("抓取 {kind} 代理列表失败：{reason}")]
    Fetch { kind: ProxyKind, reason: String },

    /// 写入存储失败（非 2xx）。
    #[error("写入存储失败（HTTP {status}）：{body}")]
    Persist { status: u16, body: String },

    /// 分页读取失败，终止本次清理的枚举阶段。
    #[error("读取存储失败（offset {offset}）：{reason}")]
    List { offset: usize, reason: String },

    /// 单条删除失败。
    #[error("删除记录 {id} 失败：{reason}")]
    Delete { id: String, reason: String },

    /// 时间戳无法解析，该记录保留不删。
    #[error("记录 {id} 的 testedAt 无法解析：{value:?}")]
    TimestampParse { id: String, value: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
