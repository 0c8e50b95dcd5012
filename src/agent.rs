//! Headless Agent 运行时
//!
//! 供各前端（命令行、聊天平台）调用的无界面导购逻辑：
//! create_agent_components 从配置构建 LLM / 索引 / 编码器 / 工具，
//! SellerAgent::process_message 对单条入站消息跑工具循环并返回最终回复。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{CatalogSearchService, ChromaIndex, InMemoryIndex, VectorIndex};
use crate::config::{AppConfig, IndexBackend};
use crate::core::AgentError;
use crate::engagement::IdleOutcome;
use crate::llm::{ImageEncoder, LlmClient, MockLlmClient, OpenAiClient, OpenAiEmbedder, TextEncoder};
use crate::memory::{ConversationStore, Message};
use crate::react::ToolLoop;
use crate::tools::{
    PaymentLinkTool, PaymentUrlBuilder, PhotoSearchTool, TextSearchTool, ToolContext, ToolExecutor,
    ToolRegistry,
};

/// 本轮处理失败时写入历史并返回的回复
pub const APOLOGY: &str =
    "I apologize, but I encountered an error while processing your request. Please try again.";
/// 只发图片没有说明文字时使用的 user 消息
pub const DEFAULT_PHOTO_CAPTION: &str = "I uploaded a photo, please find similar bouquets";

/// 导购 Agent：按用户保存对话，串行处理同一用户的消息
pub struct SellerAgent {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    store: ConversationStore,
    system_prompt: String,
    max_iterations: usize,
    eager_photo_k: usize,
}

impl SellerAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        store: ConversationStore,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            executor,
            store,
            system_prompt: system_prompt.into(),
            max_iterations: crate::react::DEFAULT_MAX_ITERATIONS,
            eager_photo_k: 3,
        }
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n.max(1);
        self
    }

    pub fn with_eager_photo_k(mut self, k: usize) -> Self {
        self.eager_photo_k = k.max(1);
        self
    }

    fn tool_loop(&self) -> ToolLoop<'_> {
        ToolLoop::new(self.llm.as_ref(), &self.executor, &self.system_prompt)
            .with_max_iterations(self.max_iterations)
    }

    /// 处理一条入站消息；失败时写入并返回致歉
    pub async fn process_message(
        &self,
        user_id: &str,
        text: &str,
        photo: Option<PathBuf>,
    ) -> String {
        let text = if text.trim().is_empty() && photo.is_some() {
            DEFAULT_PHOTO_CAPTION
        } else {
            text
        };
        tracing::info!(
            user_id,
            has_photo = photo.is_some(),
            preview = %text.chars().take(100).collect::<String>(),
            "processing message"
        );

        let ctx = ToolContext::new(user_id).with_photo(photo);
        let mut conversation = self.store.lock(user_id).await;
        conversation.push(Message::user(text));

        let tool_loop = self.tool_loop();
        if ctx.photo_path.is_some() {
            tool_loop
                .prefetch_photo(&mut conversation, &ctx, self.eager_photo_k)
                .await;
        }
        match tool_loop.run(&mut conversation, &ctx).await {
            Ok(result) => result.reply,
            Err(e) => {
                tracing::error!(user_id, error = %e, "turn failed");
                conversation.push(Message::assistant(APOLOGY));
                APOLOGY.to_string()
            }
        }
    }

    /// 用户长时间未回复时生成跟进消息
    ///
    /// 在副本上生成，整个过程持有该用户的对话锁。生成完成后 still_idle 为假
    /// （用户已回复）则丢弃，历史不变；生成失败时在同一把锁内写入 fallback。
    pub async fn respond_to_idle(
        &self,
        user_id: &str,
        note: &str,
        fallback: &str,
        still_idle: &(dyn Fn() -> bool + Send + Sync),
    ) -> IdleOutcome {
        let ctx = ToolContext::new(user_id);
        let mut conversation = self.store.lock(user_id).await;
        let mut scratch = (*conversation).clone();
        scratch.push(Message::user(note));
        let result = self.tool_loop().run(&mut scratch, &ctx).await;

        if !still_idle() {
            return IdleOutcome::Dropped;
        }
        *conversation = scratch;
        match result {
            Ok(result) => IdleOutcome::Reply(result.reply),
            Err(e) => {
                tracing::error!(user_id, error = %e, "follow-up generation failed");
                conversation.push(Message::assistant(fallback));
                IdleOutcome::Fallback(fallback.to_string())
            }
        }
    }

    /// 把已发送的兜底消息写入历史
    pub async fn record_fallback(&self, user_id: &str, text: &str) {
        self.store.lock(user_id).await.push(Message::assistant(text));
    }

    pub async fn reset(&self, user_id: &str) {
        self.store.reset(user_id).await;
        tracing::info!(user_id, "conversation reset");
    }

    pub async fn history(&self, user_id: &str) -> Vec<Message> {
        self.store.snapshot(user_id).await
    }

    /// 清理空闲超过 ttl 的对话，返回清理数量
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        self.store.evict_idle(ttl).await
    }

    /// (prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}

/// 从配置创建补全客户端；未设置 API Key 时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match std::env::var(&cfg.llm.api_key_env) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::info!(model = %cfg.llm.model, base_url = %cfg.llm.base_url, "using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                &cfg.llm.base_url,
                &cfg.llm.model,
                Some(&key),
                cfg.llm.timeouts.request,
            ))
        }
        _ => {
            tracing::warn!(env = %cfg.llm.api_key_env, "no API key set, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

/// 文本与图片编码器
pub fn create_encoders(cfg: &AppConfig) -> (Arc<dyn TextEncoder>, Arc<dyn ImageEncoder>) {
    let key = std::env::var(&cfg.embedding.api_key_env)
        .ok()
        .or_else(|| std::env::var(&cfg.llm.api_key_env).ok());
    let base = cfg.embedding.base_url.as_deref();
    let text = OpenAiEmbedder::new(base, &cfg.embedding.text_model, key.as_deref());
    let image = OpenAiEmbedder::new(base, &cfg.embedding.image_model, key.as_deref());
    (Arc::new(text), Arc::new(image))
}

/// 按配置连接向量索引
pub async fn create_index(cfg: &AppConfig) -> Result<Arc<dyn VectorIndex>, AgentError> {
    match cfg.index.backend {
        IndexBackend::Chroma => {
            let index = ChromaIndex::connect(
                &cfg.index.url,
                &cfg.index.collection,
                Duration::from_secs(cfg.index.timeout_secs),
            )
            .await
            .map_err(|e| AgentError::Config(format!("vector index unavailable: {}", e)))?;
            Ok(Arc::new(index))
        }
        IndexBackend::Memory => {
            tracing::warn!("using in-memory index; catalog must be indexed in this process");
            Ok(Arc::new(InMemoryIndex::new()))
        }
    }
}

/// 注册三个业务工具
pub fn create_tool_registry(cfg: &AppConfig, search: Arc<CatalogSearchService>) -> ToolRegistry {
    let currency = &cfg.agent.currency;
    let mut tools = ToolRegistry::new();
    tools.register(TextSearchTool::new(search.clone(), cfg.search.default_k, currency));
    tools.register(PhotoSearchTool::new(search, cfg.search.default_k, currency));
    tools.register(PaymentLinkTool::new(
        PaymentUrlBuilder::from_config(&cfg.payment),
        currency,
    ));
    tools
}

/// 由已构建的协作方组装 Agent
pub fn assemble_agent(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    search: Arc<CatalogSearchService>,
    system_prompt: &str,
) -> SellerAgent {
    let executor = ToolExecutor::new(create_tool_registry(cfg, search), cfg.agent.tool_timeout_secs);
    SellerAgent::new(
        llm,
        executor,
        ConversationStore::new(Some(cfg.agent.max_history_messages)),
        system_prompt,
    )
    .with_max_iterations(cfg.agent.max_iterations)
    .with_eager_photo_k(cfg.agent.eager_photo_k)
}

/// 创建 Agent：从配置加载 LLM、索引、编码器与工具
pub async fn create_agent_components(
    cfg: &AppConfig,
    system_prompt: &str,
) -> Result<SellerAgent, AgentError> {
    let llm = create_llm_from_config(cfg);
    let index = create_index(cfg).await?;
    let (text_encoder, image_encoder) = create_encoders(cfg);
    let search = Arc::new(
        CatalogSearchService::new(index, text_encoder, image_encoder)
            .with_max_k(cfg.search.max_k)
            .with_oversample(cfg.search.oversample),
    );
    Ok(assemble_agent(cfg, llm, search, system_prompt))
}
