//! Appwrite 文档数据库存储。
//!
//! 通过 REST 接口访问 `{endpoint}/databases/{database}/collections/{collection}/documents`，
//! 以 `X-Appwrite-Project` 和 `X-Appwrite-Key` 两个请求头鉴权。

use crate::common::error::{HarvestError, Result};
use crate::db::manager::{DeleteOutcome, RecordPage, RecordStore};
use crate::model::{PersistedRecord, StoreConfig, ValidatedProxy};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::{debug, info};

const PROJECT_HEADER: &str = "x-appwrite-project";
const KEY_HEADER: &str = "x-appwrite-key";

#[derive(Debug)]
pub struct AppwriteStore {
    client: Client,
    documents_url: String,
}

impl AppwriteStore {
    /// 创建客户端。缺少 project id 或 API key 时直接返回配置错误，不会发出任何请求。
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let (project_id, api_key) = config.credentials()?;

        let mut headers = HeaderMap::new();
        headers.insert(PROJECT_HEADER, header_value(&project_id, "project_id")?);
        let mut key = header_value(&api_key, "api_key")?;
        key.set_sensitive(true);
        headers.insert(KEY_HEADER, key);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;

        let store = Self {
            client,
            documents_url: documents_url(config),
        };
        info!("✅ Appwrite 存储已配置：{}", store.documents_url);
        Ok(store)
    }
}

fn header_value(value: &str, field: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| HarvestError::Config(format!("store.{} 含有非法字符", field)))
}

fn documents_url(config: &StoreConfig) -> String {
    format!(
        "{}/databases/{}/collections/{}/documents",
        config.endpoint.trim_end_matches('/'),
        config.database_id,
        config.collection_id
    )
}

/// 分页查询参数，形如 `queries[]={"method":"limit","values":[100]}`。
fn page_queries(limit: usize, offset: usize) -> Vec<(&'static str, String)> {
    vec![
        ("queries[]", json!({"method": "limit", "values": [limit]}).to_string()),
        ("queries[]", json!({"method": "offset", "values": [offset]}).to_string()),
    ]
}

/// 错误响应体最多保留的字符数。
const ERROR_BODY_CHARS: usize = 500;

async fn error_body(response: reqwest::Response) -> String {
    truncate_chars(response.text().await.unwrap_or_default(), ERROR_BODY_CHARS)
}

/// 按字符截断，响应体可能含多字节字符。
fn truncate_chars(body: String, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body,
    }
}

#[async_trait]
impl RecordStore for AppwriteStore {
    async fn create(&self, proxy: &ValidatedProxy) -> Result<PersistedRecord> {
        let body = json!({
            "documentId": "unique()",
            "data": proxy,
        });

        let response = self.client.post(&self.documents_url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Persist {
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }

        let record: PersistedRecord = response.json().await?;
        debug!("写入记录 {}：{}", record.id, proxy.address);
        Ok(record)
    }

    async fn list_page(&self, limit: usize, offset: usize) -> Result<RecordPage> {
        let response = self
            .client
            .get(&self.documents_url)
            .query(&page_queries(limit, offset))
            .send()
            .await
            .map_err(|e| HarvestError::List {
                offset,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::List {
                offset,
                reason: format!("HTTP {}：{}", status.as_u16(), error_body(response).await),
            });
        }

        response.json::<RecordPage>().await.map_err(|e| HarvestError::List {
            offset,
            reason: e.to_string(),
        })
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        let url = format!("{}/{}", self.documents_url, id);
        let response = self.client.delete(&url).send().await.map_err(|e| HarvestError::Delete {
            id: id.to_string(),
            reason: e.to_string(),
        })?;

        classify_delete(id, response.status())
    }
}

fn classify_delete(id: &str, status: StatusCode) -> Result<DeleteOutcome> {
    if status.is_success() {
        Ok(DeleteOutcome::Deleted)
    } else if status == StatusCode::NOT_FOUND {
        Ok(DeleteOutcome::AlreadyGone)
    } else {
        Err(HarvestError::Delete {
            id: id.to_string(),
            reason: format!("HTTP {}", status.as_u16()),
        })
    }
}
