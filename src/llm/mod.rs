//! LLM 层：补全客户端抽象与实现（OpenAI 兼容 / Mock），以及嵌入编码器

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{EmbeddingError, ImageEncoder, OpenAiEmbedder, StaticEncoder, TextEncoder};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{AssistantTurn, CompletionRequest, LlmClient, LlmError, ToolSchema};
