//! 嵌入 API：文本与图片编码为向量，调用 OpenAI 兼容的 /embeddings 端点
//!
//! 图片以 PNG data URI 作为输入，需要服务端模型支持多模态嵌入（如 CLIP 代理）。

use std::io::Cursor;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding response carried no vector")]
    Empty,

    #[error("image encoding failed: {0}")]
    Image(String),
}

/// 文本编码器
#[async_trait]
pub trait TextEncoder: Send + Sync {
    async fn encode_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// 图片编码器
#[async_trait]
pub trait ImageEncoder: Send + Sync {
    async fn encode_image(&self, image: &RgbImage) -> Result<Vec<f32>, EmbeddingError>;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    async fn embed_input(&self, input: String) -> Result<Vec<f32>, EmbeddingError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(input))
            .build()
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;
        response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or(EmbeddingError::Empty)
    }
}

#[async_trait]
impl TextEncoder for OpenAiEmbedder {
    async fn encode_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_input(text.trim().to_string()).await
    }
}

#[async_trait]
impl ImageEncoder for OpenAiEmbedder {
    async fn encode_image(&self, image: &RgbImage) -> Result<Vec<f32>, EmbeddingError> {
        let uri = png_data_uri(image)?;
        self.embed_input(uri).await
    }
}

/// 固定向量编码器（测试与离线演示用）
#[derive(Debug, Clone)]
pub struct StaticEncoder {
    vector: Vec<f32>,
}

impl StaticEncoder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }
}

#[async_trait]
impl TextEncoder for StaticEncoder {
    async fn encode_text(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vector.clone())
    }
}

#[async_trait]
impl ImageEncoder for StaticEncoder {
    async fn encode_image(&self, _image: &RgbImage) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vector.clone())
    }
}

/// RGB 图片编码为 `data:image/png;base64,...`
pub fn png_data_uri(image: &RgbImage) -> Result<String, EmbeddingError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| EmbeddingError::Image(e.to_string()))?;
    Ok(format!(
        "data:image/png;base64,{}",
        STANDARD.encode(buf.into_inner())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_data_uri_prefix() {
        let img = RgbImage::from_pixel(2, 2, image::Rgb([255, 0, 0]));
        let uri = png_data_uri(&img).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
        assert!(uri.len() > "data:image/png;base64,".len());
    }
}
