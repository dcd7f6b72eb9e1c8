//! Proxy Harvest
//!
//! 从公开列表采集代理，并发验证后写入文档数据库，并定期清理过期记录。

pub mod common;
pub mod db;
pub mod fetcher;
pub mod model;
pub mod service;

pub use common::error::{HarvestError, Result};
