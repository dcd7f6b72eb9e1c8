//! 存储接口：代理记录的写入、分页枚举与删除。
//!
//! 引擎只依赖文档数据库最基本的能力（create / list / delete），
//! 具体后端实现 [`RecordStore`] 即可接入。

use crate::common::error::Result;
use crate::model::{PersistedRecord, ValidatedProxy};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// 默认每页条数。
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// 一页查询结果。`total` 为服务端报告的总数，仅供参考。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub documents: Vec<PersistedRecord>,
    #[serde(default)]
    pub total: u64,
}

/// 单条删除的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// 记录已不存在（HTTP 404），按删除成功处理。
    AlreadyGone,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 写入一条验证通过的代理，返回带 id 的记录。
    ///
    /// 存储不做唯一性约束，同一代理在不同批次中重复写入是允许的。
    async fn create(&self, proxy: &ValidatedProxy) -> Result<PersistedRecord>;

    /// 读取一页，`offset` 从 0 开始。
    async fn list_page(&self, limit: usize, offset: usize) -> Result<RecordPage>;

    /// 按 id 删除。
    async fn delete(&self, id: &str) -> Result<DeleteOutcome>;

    /// 分页读取全部记录。
    ///
    /// 某页返回的条数小于 `page_size`（包括空页）即视为结束，
    /// 不依赖服务端报告的 `total`，避免总数不准时死循环或漏读。
    async fn list_all(&self, page_size: usize) -> Result<Vec<PersistedRecord>> {
        let page_size = page_size.max(1);
        let mut records = Vec::new();
        let mut offset = 0usize;
        let mut reported_total: u64;

        loop {
            let page = self.list_page(page_size, offset).await?;
            let received = page.documents.len();
            reported_total = page.total;
            debug!("读取第 {} 页：{} 条（offset {}）", offset / page_size + 1, received, offset);

            records.extend(page.documents);
            if received < page_size {
                break;
            }
            offset += received;
        }

        if reported_total != records.len() as u64 {
            warn!(
                "服务端报告共 {} 条，实际读取 {} 条",
                reported_total,
                records.len()
            );
        }

        Ok(records)
    }
}
