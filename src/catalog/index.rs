//! 向量索引抽象、元数据过滤表达式与内存实现
//!
//! 过滤语法与 Chroma `where` 一致：`$eq` / `$gte` / `$lte`，多个条件以 `$and` 组合。

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::catalog::product::{DocumentKind, DocumentMetadata, EmbeddingDocument};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index request failed: {0}")]
    Request(String),

    #[error("index returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed index response: {0}")]
    Malformed(String),

    #[error("index backend error: {0}")]
    Backend(String),
}

/// 元数据过滤表达式
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataFilter {
    Eq { field: String, value: Value },
    Gte { field: String, value: u64 },
    Lte { field: String, value: u64 },
    And(Vec<MetadataFilter>),
}

impl MetadataFilter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        MetadataFilter::Eq {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn gte(field: &str, value: u64) -> Self {
        MetadataFilter::Gte {
            field: field.to_string(),
            value,
        }
    }

    pub fn lte(field: &str, value: u64) -> Self {
        MetadataFilter::Lte {
            field: field.to_string(),
            value,
        }
    }

    /// 渲染为 Chroma `where` JSON
    pub fn to_json(&self) -> Value {
        match self {
            MetadataFilter::Eq { field, value } => json!({ field.as_str(): { "$eq": value } }),
            MetadataFilter::Gte { field, value } => json!({ field.as_str(): { "$gte": value } }),
            MetadataFilter::Lte { field, value } => json!({ field.as_str(): { "$lte": value } }),
            MetadataFilter::And(parts) => {
                json!({ "$and": parts.iter().map(MetadataFilter::to_json).collect::<Vec<_>>() })
            }
        }
    }

    /// 对一条元数据求值（内存索引使用）
    pub fn matches(&self, metadata: &Value) -> bool {
        match self {
            MetadataFilter::Eq { field, value } => metadata.get(field) == Some(value),
            MetadataFilter::Gte { field, value } => metadata
                .get(field)
                .and_then(Value::as_f64)
                .map_or(false, |v| v >= *value as f64),
            MetadataFilter::Lte { field, value } => metadata
                .get(field)
                .and_then(Value::as_f64)
                .map_or(false, |v| v <= *value as f64),
            MetadataFilter::And(parts) => parts.iter().all(|p| p.matches(metadata)),
        }
    }
}

/// 由可选条件构造过滤：无条件返回 None，单条件不包 `$and`
pub fn build_filter(
    kind: Option<DocumentKind>,
    min_price: Option<u64>,
    max_price: Option<u64>,
) -> Option<MetadataFilter> {
    let mut parts = Vec::new();
    if let Some(kind) = kind {
        parts.push(MetadataFilter::eq("type", kind.as_str()));
    }
    if let Some(min) = min_price {
        parts.push(MetadataFilter::gte("price", min));
    }
    if let Some(max) = max_price {
        parts.push(MetadataFilter::lte("price", max));
    }
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(MetadataFilter::And(parts)),
    }
}

/// 查询结果：三个平行数组，按距离升序
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub distances: Vec<f32>,
    pub metadatas: Vec<DocumentMetadata>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// 相似度索引
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        vector: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<QueryResult, IndexError>;

    /// 以 `"{kind}_{product_id}"` 为键写入或覆盖
    async fn upsert(&self, document: &EmbeddingDocument) -> Result<(), IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;
}

struct StoredDocument {
    vector: Vec<f32>,
    metadata: DocumentMetadata,
    /// 预先序列化，过滤时直接求值
    metadata_json: Value,
}

/// 内存索引：余弦距离，适合测试与小目录
#[derive(Default)]
pub struct InMemoryIndex {
    docs: RwLock<HashMap<String, StoredDocument>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn query(
        &self,
        vector: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<QueryResult, IndexError> {
        let docs = self
            .docs
            .read()
            .map_err(|e| IndexError::Backend(e.to_string()))?;

        let mut scored: Vec<(&String, f32, &DocumentMetadata)> = docs
            .iter()
            .filter(|(_, d)| filter.map_or(true, |f| f.matches(&d.metadata_json)))
            .map(|(id, d)| (id, 1.0 - cosine_similarity(vector, &d.vector), &d.metadata))
            .collect();
        // 距离相同时按 id 排，结果可复现
        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        scored.truncate(n_results);

        let mut result = QueryResult::default();
        for (id, distance, metadata) in scored {
            result.ids.push(id.clone());
            result.distances.push(distance);
            result.metadatas.push(metadata.clone());
        }
        Ok(result)
    }

    async fn upsert(&self, document: &EmbeddingDocument) -> Result<(), IndexError> {
        let metadata_json = serde_json::to_value(&document.metadata)
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        let mut docs = self
            .docs
            .write()
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        docs.insert(
            document.key(),
            StoredDocument {
                vector: document.vector.clone(),
                metadata: document.metadata.clone(),
                metadata_json,
            },
        );
        Ok(())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        self.docs
            .read()
            .map(|d| d.len())
            .map_err(|e| IndexError::Backend(e.to_string()))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
