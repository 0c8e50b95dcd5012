//! 商品检索服务：编码查询 → 构造过滤 → 查询索引 → 去重排序

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::catalog::index::{build_filter, IndexError, VectorIndex};
use crate::catalog::product::DocumentKind;
use crate::catalog::ranker::{rank, SearchHit};
use crate::llm::{EmbeddingError, ImageEncoder, TextEncoder};

/// 检索失败
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index query failed: {0}")]
    Index(#[from] IndexError),

    #[error("cannot read image {path}: {reason}")]
    Image { path: PathBuf, reason: String },
}

/// 检索服务
pub struct CatalogSearchService {
    index: Arc<dyn VectorIndex>,
    text_encoder: Arc<dyn TextEncoder>,
    image_encoder: Arc<dyn ImageEncoder>,
    max_k: usize,
    oversample: usize,
}

impl CatalogSearchService {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        text_encoder: Arc<dyn TextEncoder>,
        image_encoder: Arc<dyn ImageEncoder>,
    ) -> Self {
        Self {
            index,
            text_encoder,
            image_encoder,
            max_k: 3,
            oversample: 2,
        }
    }

    pub fn with_max_k(mut self, max_k: usize) -> Self {
        self.max_k = max_k.max(1);
        self
    }

    /// 候选倍数，至少 2
    pub fn with_oversample(mut self, factor: usize) -> Self {
        self.oversample = factor.max(2);
        self
    }

    pub fn max_k(&self) -> usize {
        self.max_k
    }

    fn effective_k(&self, k: usize) -> usize {
        k.clamp(1, self.max_k)
    }

    pub async fn search_by_text(
        &self,
        query_text: &str,
        kind: Option<DocumentKind>,
        min_price: Option<u64>,
        max_price: Option<u64>,
        k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let k = self.effective_k(k);
        tracing::info!(
            query = %preview(query_text, 50),
            kind = ?kind,
            min_price,
            max_price,
            k,
            "text search"
        );
        let vector = self.text_encoder.encode_text(query_text).await?;
        let filter = build_filter(kind, min_price, max_price);
        let raw = self
            .index
            .query(&vector, k * self.oversample, filter.as_ref())
            .await?;
        tracing::debug!(raw = raw.len(), "index returned candidates");

        let hits = rank(raw.into_matches(), k);
        tracing::info!(found = hits.len(), "text search completed");
        Ok(hits)
    }

    pub async fn search_by_image(
        &self,
        photo_path: &Path,
        min_price: Option<u64>,
        max_price: Option<u64>,
        k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let k = self.effective_k(k);
        tracing::info!(path = %photo_path.display(), min_price, max_price, k, "photo search");

        let path = photo_path.to_path_buf();
        let decoded = tokio::task::spawn_blocking(move || image::open(&path).map(|i| i.to_rgb8()))
            .await
            .map_err(|e| SearchError::Image {
                path: photo_path.to_path_buf(),
                reason: e.to_string(),
            })?
            .map_err(|e| SearchError::Image {
                path: photo_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        tracing::debug!(width = decoded.width(), height = decoded.height(), "image loaded");

        let vector = self.image_encoder.encode_image(&decoded).await?;
        let filter = build_filter(None, min_price, max_price);
        let raw = self
            .index
            .query(&vector, k * self.oversample, filter.as_ref())
            .await?;

        let hits = rank(raw.into_matches(), k);
        tracing::info!(found = hits.len(), "photo search completed");
        Ok(hits)
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
