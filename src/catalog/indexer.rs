//! 目录索引：为每件在售商品写入一条文本文档和一条图片文档
//!
//! 已软删除的商品跳过；图片按 `{photo_base_url}/{id}/public` 规范化后下载。
//! 同一商品重复索引按 `"{kind}_{id}"` 覆盖。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::Client;
use thiserror::Error;

use crate::catalog::index::{IndexError, VectorIndex};
use crate::catalog::product::{DocumentKind, DocumentMetadata, EmbeddingDocument, ProductRecord};
use crate::llm::{EmbeddingError, ImageEncoder, TextEncoder};

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("failed to read catalog {path}: {reason}")]
    Catalog { path: String, reason: String },

    #[error("photo download failed: {0}")]
    Fetch(String),

    #[error("photo decode failed: {0}")]
    Decode(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// 读取目录 JSON（商品数组）
pub fn load_catalog(path: &Path) -> Result<Vec<ProductRecord>, IndexerError> {
    let raw = std::fs::read_to_string(path).map_err(|e| IndexerError::Catalog {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| IndexerError::Catalog {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// 裸图片 id 拼成完整 URL；已是 http(s) 地址则原样返回
pub fn normalize_photo_url(raw: &str, base: Option<&str>) -> String {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }
    match base {
        Some(base) => format!("{}/{}/public", base.trim_end_matches('/'), raw),
        None => raw.to_string(),
    }
}

/// 图片来源
#[async_trait]
pub trait PhotoFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, IndexerError>;
}

pub struct HttpPhotoFetcher {
    http: Client,
}

impl HttpPhotoFetcher {
    pub fn new(timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

#[async_trait]
impl PhotoFetcher for HttpPhotoFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, IndexerError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| IndexerError::Fetch(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(IndexerError::Fetch(format!("{} returned {}", url, resp.status())));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| IndexerError::Fetch(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// 一次索引的统计
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IndexReport {
    pub documents_written: usize,
    pub products_indexed: usize,
    pub skipped_deleted: usize,
    /// (商品 id, 原因)
    pub failures: Vec<(String, String)>,
}

pub struct CatalogIndexer {
    index: Arc<dyn VectorIndex>,
    text_encoder: Arc<dyn TextEncoder>,
    image_encoder: Arc<dyn ImageEncoder>,
    photos: Arc<dyn PhotoFetcher>,
    photo_base_url: Option<String>,
    language: String,
    concurrency: usize,
}

/// 单件商品的结果：写入文档数，失败原因
type ProductOutcome = (String, usize, Vec<String>);

impl CatalogIndexer {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        text_encoder: Arc<dyn TextEncoder>,
        image_encoder: Arc<dyn ImageEncoder>,
        photos: Arc<dyn PhotoFetcher>,
    ) -> Self {
        Self {
            index,
            text_encoder,
            image_encoder,
            photos,
            photo_base_url: None,
            language: "en".to_string(),
            concurrency: 4,
        }
    }

    pub fn with_photo_base_url(mut self, base: Option<String>) -> Self {
        self.photo_base_url = base;
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// 文本文档内容
    pub fn text_for(&self, product: &ProductRecord) -> String {
        format!(
            "Name: {}. Description: {}. Tags: {}.",
            product.name_in(&self.language),
            product.description_in(&self.language),
            product.tags_in(&self.language).join(", ")
        )
    }

    pub async fn index_all(&self, products: &[ProductRecord]) -> IndexReport {
        let mut report = IndexReport::default();
        let live: Vec<&ProductRecord> = products
            .iter()
            .filter(|p| {
                if p.is_deleted() {
                    tracing::debug!(product_id = %p.id, "skipping soft-deleted product");
                }
                !p.is_deleted()
            })
            .collect();
        report.skipped_deleted = products.len() - live.len();

        let total = live.len();
        let outcomes: Vec<ProductOutcome> = stream::iter(live)
            .map(|p| self.index_product(p))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (id, written, errors) in outcomes {
            report.documents_written += written;
            if written > 0 {
                report.products_indexed += 1;
            }
            for e in errors {
                tracing::warn!(product_id = %id, error = %e, "indexing failed");
                report.failures.push((id.clone(), e));
            }
        }
        tracing::info!(
            total,
            indexed = report.products_indexed,
            documents = report.documents_written,
            skipped = report.skipped_deleted,
            failed = report.failures.len(),
            "catalog indexing finished"
        );
        report
    }

    async fn index_product(&self, product: &ProductRecord) -> ProductOutcome {
        let photo_url = product
            .primary_photo()
            .map(|raw| normalize_photo_url(raw, self.photo_base_url.as_deref()));
        let mut written = 0;
        let mut errors = Vec::new();

        match self.index_text(product, photo_url.clone()).await {
            Ok(()) => written += 1,
            Err(e) => errors.push(format!("text: {}", e)),
        }
        if let Some(url) = photo_url {
            match self.index_photo(product, url).await {
                Ok(()) => written += 1,
                Err(e) => errors.push(format!("photo: {}", e)),
            }
        }
        tracing::debug!(product_id = %product.id, written, "product indexed");
        (product.id.clone(), written, errors)
    }

    async fn index_text(
        &self,
        product: &ProductRecord,
        photo_url: Option<String>,
    ) -> Result<(), IndexerError> {
        let vector = self.text_encoder.encode_text(&self.text_for(product)).await?;
        let meta = DocumentMetadata::for_product(product, DocumentKind::Text, &self.language, photo_url);
        self.index.upsert(&EmbeddingDocument::new(vector, meta)).await?;
        Ok(())
    }

    async fn index_photo(&self, product: &ProductRecord, url: String) -> Result<(), IndexerError> {
        let bytes = self.photos.fetch(&url).await?;
        let decoded = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes).map(|i| i.to_rgb8())
        })
        .await
        .map_err(|e| IndexerError::Decode(e.to_string()))?
        .map_err(|e| IndexerError::Decode(e.to_string()))?;

        let vector = self.image_encoder.encode_image(&decoded).await?;
        let meta = DocumentMetadata::for_product(product, DocumentKind::Photo, &self.language, Some(url));
        self.index.upsert(&EmbeddingDocument::new(vector, meta)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;
    use crate::catalog::index::{InMemoryIndex, MetadataFilter};
    use crate::llm::StaticEncoder;

    struct PngFetcher;

    #[async_trait]
    impl PhotoFetcher for PngFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, IndexerError> {
            if url.contains("broken") {
                return Err(IndexerError::Fetch("404".into()));
            }
            let mut buf = Cursor::new(Vec::new());
            image::RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3]))
                .write_to(&mut buf, image::ImageFormat::Png)
                .unwrap();
            Ok(buf.into_inner())
        }
    }

    fn indexer(index: Arc<InMemoryIndex>) -> CatalogIndexer {
        let enc = Arc::new(StaticEncoder::new(vec![0.3, 0.7]));
        CatalogIndexer::new(index, enc.clone(), enc, Arc::new(PngFetcher))
            .with_photo_base_url(Some("https://img.example/acc/".into()))
    }

    const CATALOG: &str = r#"[
        {"id": 1, "name": {"en": "Roses"}, "description": {"en": "Red"}, "tags": [{"en": "red"}],
         "quantity": 2, "price": 300000, "photo_urls": ["uuid-1"], "deleted_at": null},
        {"id": 2, "name": {"en": "Tulips"}, "price": 150000, "photo_urls": [],
         "deleted_at": "2024-01-01T00:00:00Z"},
        {"id": 3, "name": {"en": "Lilies"}, "price": 200000, "photo_urls": ["broken"]}
    ]"#;

    #[test]
    fn test_normalize_photo_url() {
        assert_eq!(
            normalize_photo_url("abc", Some("https://img.example/acc/")),
            "https://img.example/acc/abc/public"
        );
        assert_eq!(
            normalize_photo_url("https://cdn.example/x.jpg", Some("https://img.example")),
            "https://cdn.example/x.jpg"
        );
        assert_eq!(normalize_photo_url("abc", None), "abc");
    }

    #[test]
    fn test_load_catalog_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();
        let products = load_catalog(file.path()).unwrap();
        assert_eq!(products.len(), 3);
        assert!(products[1].is_deleted());
        assert!(load_catalog(Path::new("/no/such/catalog.json")).is_err());
    }

    #[tokio::test]
    async fn test_index_all_skips_deleted_and_reports_failures() {
        let products: Vec<ProductRecord> = serde_json::from_str(CATALOG).unwrap();
        let index = Arc::new(InMemoryIndex::new());
        let report = indexer(index.clone()).index_all(&products).await;

        assert_eq!(report.skipped_deleted, 1);
        assert_eq!(report.products_indexed, 2);
        // 1: text + photo, 3: 只有 text
        assert_eq!(report.documents_written, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "3");
        assert_eq!(index.count().await.unwrap(), 3);

        let photos = index
            .query(&[0.3, 0.7], 10, Some(&MetadataFilter::eq("type", "photo")))
            .await
            .unwrap();
        assert_eq!(photos.ids, vec!["photo_1"]);
        assert_eq!(
            photos.metadatas[0].photo_url.as_deref(),
            Some("https://img.example/acc/uuid-1/public")
        );
    }

    #[tokio::test]
    async fn test_reindex_overwrites() {
        let products: Vec<ProductRecord> = serde_json::from_str(CATALOG).unwrap();
        let index = Arc::new(InMemoryIndex::new());
        let idx = indexer(index.clone());
        idx.index_all(&products).await;
        idx.index_all(&products).await;
        assert_eq!(index.count().await.unwrap(), 3);
    }

    #[test]
    fn test_text_document() {
        let products: Vec<ProductRecord> = serde_json::from_str(CATALOG).unwrap();
        let idx = indexer(Arc::new(InMemoryIndex::new()));
        assert_eq!(
            idx.text_for(&products[0]),
            "Name: Roses. Description: Red. Tags: red."
        );
    }
}
