//! 商品检索工具：按文本 / 按图片
//!
//! 结果格式化为每行一件商品的纯文本，供模型引用名称、价格与图片链接。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::catalog::{CatalogSearchService, DocumentKind, SearchHit};
use crate::core::AgentError;
use crate::tools::schema::parameters_schema_for;
use crate::tools::{parse_args, Tool, ToolContext};

pub const TEXT_SEARCH_TOOL: &str = "search_products_by_text";
pub const PHOTO_SEARCH_TOOL: &str = "search_products_by_photo";

/// search_products_by_text 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TextSearchArgs {
    /// Text query describing what the customer is looking for
    pub query_text: String,
    /// Type of document to search in
    pub document_type: Option<DocumentKind>,
    /// Minimum price filter
    pub min_price: Option<f64>,
    /// Maximum price filter
    pub max_price: Option<f64>,
    /// Number of results to return (max 3)
    pub k: Option<u32>,
}

/// search_products_by_photo 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PhotoSearchArgs {
    /// Path to the uploaded photo file
    pub photo_path: String,
    /// Minimum price filter
    pub min_price: Option<f64>,
    /// Maximum price filter
    pub max_price: Option<f64>,
    /// Number of results to return (max 3)
    pub k: Option<u32>,
}

/// 模型给出的价格可能带小数或为负，统一到非负整数
pub(crate) fn to_price(v: f64) -> u64 {
    if v.is_finite() && v > 0.0 {
        v.round() as u64
    } else {
        0
    }
}

/// 格式化检索结果；空结果给出固定提示
pub fn format_search_results(hits: &[SearchHit], currency: &str) -> String {
    if hits.is_empty() {
        return "No products found matching the criteria.".to_string();
    }
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let m = &hit.metadata;
            format!(
                "Product {}: {} | Description: {} | Price: {} {} | Photo: {}",
                i + 1,
                m.name,
                m.description,
                m.price,
                currency,
                m.photo_url.as_deref().unwrap_or("none")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct TextSearchTool {
    search: Arc<CatalogSearchService>,
    default_k: usize,
    currency: String,
}

impl TextSearchTool {
    pub fn new(search: Arc<CatalogSearchService>, default_k: usize, currency: &str) -> Self {
        Self {
            search,
            default_k,
            currency: currency.to_string(),
        }
    }
}

#[async_trait]
impl Tool for TextSearchTool {
    fn name(&self) -> &str {
        TEXT_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Search for bouquets using text description with optional filters"
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<TextSearchArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AgentError> {
        let args: TextSearchArgs = parse_args(TEXT_SEARCH_TOOL, args)?;
        let k = args.k.map(|k| k as usize).unwrap_or(self.default_k);
        tracing::info!(user_id = %ctx.user_id, tool = TEXT_SEARCH_TOOL, "searching by text");
        let hits = self
            .search
            .search_by_text(
                &args.query_text,
                args.document_type,
                args.min_price.map(to_price),
                args.max_price.map(to_price),
                k,
            )
            .await?;
        Ok(format_search_results(&hits, &self.currency))
    }
}

/// 以图搜图：使用入站事件附带的图片，忽略参数里的路径
pub struct PhotoSearchTool {
    search: Arc<CatalogSearchService>,
    default_k: usize,
    currency: String,
}

impl PhotoSearchTool {
    pub fn new(search: Arc<CatalogSearchService>, default_k: usize, currency: &str) -> Self {
        Self {
            search,
            default_k,
            currency: currency.to_string(),
        }
    }

    fn photo<'a>(&self, ctx: &'a ToolContext) -> Result<&'a PathBuf, AgentError> {
        ctx.photo_path
            .as_ref()
            .ok_or_else(|| AgentError::MissingInput("No photo provided for photo search".to_string()))
    }
}

#[async_trait]
impl Tool for PhotoSearchTool {
    fn name(&self) -> &str {
        PHOTO_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Search for bouquets using an uploaded photo with optional filters"
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<PhotoSearchArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AgentError> {
        let photo = self.photo(ctx)?;
        let args: PhotoSearchArgs = parse_args(PHOTO_SEARCH_TOOL, args)?;
        if args.photo_path != photo.to_string_lossy() {
            tracing::debug!(requested = %args.photo_path, "using the photo attached to the event");
        }
        let k = args.k.map(|k| k as usize).unwrap_or(self.default_k);
        let hits = self
            .search
            .search_by_image(
                photo,
                args.min_price.map(to_price),
                args.max_price.map(to_price),
                k,
            )
            .await?;
        Ok(format_search_results(&hits, &self.currency))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::catalog::{DocumentMetadata, EmbeddingDocument, InMemoryIndex, VectorIndex};
    use crate::llm::StaticEncoder;

    fn hit(name: &str, price: u64, photo: Option<&str>) -> SearchHit {
        SearchHit {
            product_id: name.to_string(),
            score: 0.9,
            metadata: DocumentMetadata {
                product_id: name.to_string(),
                kind: DocumentKind::Text,
                name: name.to_string(),
                description: "Lovely".to_string(),
                tags: String::new(),
                quantity: 1,
                price,
                photo_url: photo.map(String::from),
            },
        }
    }

    async fn service() -> Arc<CatalogSearchService> {
        let index = Arc::new(InMemoryIndex::new());
        let mut meta = hit("Roses", 300000, Some("https://img/1")).metadata;
        index
            .upsert(&EmbeddingDocument::new(vec![1.0, 0.0], meta.clone()))
            .await
            .unwrap();
        meta.product_id = "Tulips".into();
        meta.name = "Tulips".into();
        meta.price = 900000;
        index
            .upsert(&EmbeddingDocument::new(vec![0.9, 0.1], meta))
            .await
            .unwrap();
        let enc = Arc::new(StaticEncoder::new(vec![1.0, 0.0]));
        Arc::new(CatalogSearchService::new(index, enc.clone(), enc))
    }

    #[test]
    fn test_format_results() {
        let text = format_search_results(&[hit("Roses", 300000, Some("https://img/1")), hit("Lily", 5, None)], "uzs");
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Product 1: Roses | Description: Lovely | Price: 300000 uzs | Photo: https://img/1"
        );
        assert!(lines[1].starts_with("Product 2: Lily"));
        assert_eq!(format_search_results(&[], "uzs"), "No products found matching the criteria.");
    }

    #[test]
    fn test_to_price() {
        assert_eq!(to_price(100000.4), 100000);
        assert_eq!(to_price(-5.0), 0);
        assert_eq!(to_price(f64::NAN), 0);
    }

    #[test]
    fn test_schema_lists_required_query() {
        let schema = parameters_schema_for::<TextSearchArgs>();
        assert_eq!(schema["required"], json!(["query_text"]));
        assert_eq!(schema["properties"]["document_type"]["enum"], json!(["text", "photo"]));
    }

    #[tokio::test]
    async fn test_text_tool_applies_price_bound() {
        let tool = TextSearchTool::new(service().await, 3, "uzs");
        let out = tool
            .execute(json!({"query_text": "roses", "max_price": 400000}), &ToolContext::new("u"))
            .await
            .unwrap();
        assert!(out.contains("Roses"));
        assert!(!out.contains("Tulips"));
    }

    #[tokio::test]
    async fn test_photo_tool_without_photo() {
        let tool = PhotoSearchTool::new(service().await, 3, "uzs");
        let err = tool
            .execute(json!({"photo_path": "/tmp/x.jpg"}), &ToolContext::new("u"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No photo provided for photo search");
    }
}
