//! 测试用的内存存储，支持注入各类失败。

use crate::common::error::{HarvestError, Result};
use crate::db::manager::{DeleteOutcome, RecordPage, RecordStore};
use crate::model::{PersistedRecord, ValidatedProxy};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<PersistedRecord>>,
    next_id: AtomicUsize,
    list_calls: AtomicUsize,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    reported_total: Mutex<Option<u64>>,
    fail_list: AtomicBool,
    fail_create: AtomicBool,
    fail_delete_ids: Mutex<HashSet<String>>,
    /// 删除时返回 404 的 id（模拟被外部先删掉）。
    vanish_ids: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置 n 条记录，testedAt 均为 2025-01-01。
    pub fn with_records(n: usize) -> Self {
        let store = Self::new();
        for i in 0..n {
            store.insert(&format!("10.0.{}.{}:80", i / 250, i % 250), "2025-01-01T00:00:00Z");
        }
        store
    }

    pub fn insert(&self, address: &str, tested_at: &str) -> String {
        let id = format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.records.lock().unwrap().push(PersistedRecord {
            id: id.clone(),
            address: address.to_string(),
            kind: "http".into(),
            response_time_seconds: Some(0.5),
            tested_at: tested_at.to_string(),
        });
        id
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.lock().unwrap().iter().map(|r| r.id.clone()).collect()
    }

    pub fn records(&self) -> Vec<PersistedRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn report_total(&self, total: u64) {
        *self.reported_total.lock().unwrap() = Some(total);
    }

    pub fn fail_listing(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    pub fn fail_creates(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_delete_of(&self, id: &str) {
        self.fail_delete_ids.lock().unwrap().insert(id.to_string());
    }

    /// 列表里仍能看到该记录，但删除时已不存在。
    pub fn vanish_on_delete(&self, id: &str) {
        self.vanish_ids.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(&self, proxy: &ValidatedProxy) -> Result<PersistedRecord> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(HarvestError::Persist {
                status: 500,
                body: "storage unavailable".into(),
            });
        }
        let id = format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = PersistedRecord::from_validated(id, proxy);
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn list_page(&self, limit: usize, offset: usize) -> Result<RecordPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(HarvestError::List {
                offset,
                reason: "connection refused".into(),
            });
        }
        let records = self.records.lock().unwrap();
        let documents: Vec<_> = records.iter().skip(offset).take(limit).cloned().collect();
        let total = self.reported_total.lock().unwrap().unwrap_or(records.len() as u64);
        Ok(RecordPage { documents, total })
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete_ids.lock().unwrap().contains(id) {
            return Err(HarvestError::Delete {
                id: id.to_string(),
                reason: "HTTP 500".into(),
            });
        }
        let mut records = self.records.lock().unwrap();
        let vanished = self.vanish_ids.lock().unwrap().contains(id);
        let before = records.len();
        records.retain(|r| r.id != id);
        if vanished || records.len() == before {
            Ok(DeleteOutcome::AlreadyGone)
        } else {
            Ok(DeleteOutcome::Deleted)
        }
    }
}
