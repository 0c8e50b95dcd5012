//! 商品目录数据模型与索引文档

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// 目录中的一件商品（只读）
#[derive(Debug, Clone, Deserialize)]
pub struct ProductRecord {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: HashMap<String, String>,
    #[serde(default)]
    pub description: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<HashMap<String, String>>,
    #[serde(default)]
    pub quantity: u64,
    /// 最小货币单位
    pub price: u64,
    #[serde(default)]
    pub photo_urls: Vec<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ProductRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// 取指定语言的名称，缺失时退回英文
    pub fn name_in(&self, lang: &str) -> &str {
        localized(&self.name, lang).unwrap_or("Unknown Product")
    }

    pub fn description_in(&self, lang: &str) -> &str {
        localized(&self.description, lang).unwrap_or("")
    }

    pub fn tags_in(&self, lang: &str) -> Vec<&str> {
        self.tags.iter().filter_map(|t| localized(t, lang)).collect()
    }

    pub fn primary_photo(&self) -> Option<&str> {
        self.photo_urls.first().map(String::as_str)
    }
}

fn localized<'a>(map: &'a HashMap<String, String>, lang: &str) -> Option<&'a str> {
    map.get(lang)
        .or_else(|| map.get("en"))
        .map(String::as_str)
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// 索引文档类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Text,
    Photo,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Text => "text",
            DocumentKind::Photo => "photo",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 随向量一起存入索引的元数据快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub product_id: String,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 逗号分隔
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub quantity: u64,
    pub price: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl DocumentMetadata {
    pub fn for_product(
        product: &ProductRecord,
        kind: DocumentKind,
        lang: &str,
        photo_url: Option<String>,
    ) -> Self {
        Self {
            product_id: product.id.clone(),
            kind,
            name: product.name_in(lang).to_string(),
            description: product.description_in(lang).to_string(),
            tags: product.tags_in(lang).join(", "),
            quantity: product.quantity,
            price: product.price,
            photo_url,
        }
    }
}

/// 一条待写入索引的文档
#[derive(Debug, Clone)]
pub struct EmbeddingDocument {
    pub vector: Vec<f32>,
    pub metadata: DocumentMetadata,
}

impl EmbeddingDocument {
    pub fn new(vector: Vec<f32>, metadata: DocumentMetadata) -> Self {
        Self { vector, metadata }
    }

    /// `"{kind}_{product_id}"`，重复索引时按此覆盖
    pub fn key(&self) -> String {
        document_key(self.metadata.kind, &self.metadata.product_id)
    }
}

pub fn document_key(kind: DocumentKind, product_id: &str) -> String {
    format!("{}_{}", kind, product_id)
}
