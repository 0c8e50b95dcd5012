//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SELLER__*` 覆盖（双下划线表示嵌套，如 `SELLER__LLM__MODEL=gpt-4o`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub index: IndexSection,
    pub search: SearchSection,
    pub agent: AgentSection,
    pub engagement: EngagementSection,
    pub payment: PaymentSection,
    pub catalog: CatalogSection,
}

/// [app] 段：应用名与 system prompt 路径
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 未设置时依次尝试 config/prompts/system.md、../config/prompts/system.md
    pub system_prompt_path: Option<PathBuf>,
}

/// [llm] 段：OpenAI 兼容端点、模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// 读取 API Key 的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [embedding] 段：文本 / 图像两个独立编码器（同一 OpenAI 兼容 /embeddings 服务）
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    pub base_url: Option<String>,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            base_url: None,
            text_model: default_text_model(),
            image_model: default_image_model(),
            api_key_env: default_embedding_key_env(),
        }
    }
}

fn default_text_model() -> String {
    "sentence-transformers/clip-ViT-B-32-multilingual-v1".to_string()
}

fn default_image_model() -> String {
    "clip-ViT-B-32".to_string()
}

fn default_embedding_key_env() -> String {
    "EMBEDDING_API_KEY".to_string()
}

/// 向量索引后端
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Chroma,
    Memory,
}

/// [index] 段：Chroma 地址与集合名
#[derive(Debug, Clone, Deserialize)]
pub struct IndexSection {
    #[serde(default)]
    pub backend: IndexBackend,
    #[serde(default = "default_chroma_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            url: default_chroma_url(),
            collection: default_collection(),
            timeout_secs: default_index_timeout(),
        }
    }
}

fn default_chroma_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_collection() -> String {
    "products".to_string()
}

fn default_index_timeout() -> u64 {
    15
}

/// [search] 段：返回条数上限与过采样倍数
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_k")]
    pub max_k: usize,
    /// 向索引请求 oversample * k 条原始结果，抵消 文档 -> 商品 的多对一折叠
    #[serde(default = "default_oversample")]
    pub oversample: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_k(),
            oversample: default_oversample(),
        }
    }
}

fn default_k() -> usize {
    3
}

fn default_oversample() -> usize {
    2
}

/// [agent] 段：工具循环上限、图片预检索条数、历史保留、工具超时
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_k")]
    pub eager_photo_k: usize,
    /// 单个用户保留的最大消息条数，0 表示不裁剪
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 会话空闲多久后可被回收（秒）
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            eager_photo_k: default_k(),
            max_history_messages: default_max_history_messages(),
            tool_timeout_secs: default_tool_timeout_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            currency: default_currency(),
        }
    }
}

fn default_max_iterations() -> usize {
    5
}

fn default_max_history_messages() -> usize {
    200
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_session_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_currency() -> String {
    "uzs".to_string()
}

/// [engagement] 段：三个跟进触发器的延迟（秒）
#[derive(Debug, Clone, Deserialize)]
pub struct EngagementSection {
    #[serde(default = "default_engagement_enabled")]
    pub enabled: bool,
    #[serde(default = "default_first_delay")]
    pub first_delay_secs: u64,
    #[serde(default = "default_second_delay")]
    pub second_delay_secs: u64,
    #[serde(default = "default_third_delay")]
    pub third_delay_secs: u64,
}

impl Default for EngagementSection {
    fn default() -> Self {
        Self {
            enabled: default_engagement_enabled(),
            first_delay_secs: default_first_delay(),
            second_delay_secs: default_second_delay(),
            third_delay_secs: default_third_delay(),
        }
    }
}

fn default_engagement_enabled() -> bool {
    true
}

fn default_first_delay() -> u64 {
    20
}

fn default_second_delay() -> u64 {
    300
}

fn default_third_delay() -> u64 {
    18_000
}

/// [payment] 段：固定商户参数
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentSection {
    #[serde(default = "default_payment_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub merchant_id: String,
    #[serde(default)]
    pub transaction_param: String,
    #[serde(default)]
    pub return_url: String,
}

impl Default for PaymentSection {
    fn default() -> Self {
        Self {
            base_url: default_payment_base_url(),
            service_id: String::new(),
            merchant_id: String::new(),
            transaction_param: String::new(),
            return_url: String::new(),
        }
    }
}

fn default_payment_base_url() -> String {
    "https://my.click.uz/services/pay/".to_string()
}

/// [catalog] 段：目录文件、图片地址前缀、索引并发
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSection {
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
    /// 仅给出图片 ID 时拼接为 `{photo_base_url}/{id}/public`
    pub photo_base_url: Option<String>,
    #[serde(default = "default_index_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
            photo_base_url: None,
            concurrency: default_index_concurrency(),
            language: default_language(),
        }
    }
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("data/products.json")
}

fn default_index_concurrency() -> usize {
    4
}

fn default_language() -> String {
    "en".to_string()
}

/// 从 config 目录加载配置，环境变量 SELLER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SELLER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SELLER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 读取 system prompt：优先配置路径，其次约定位置，最后内置兜底
pub fn load_system_prompt(cfg: &AppConfig) -> String {
    let configured = cfg.app.system_prompt_path.iter().cloned();
    let conventional = [
        PathBuf::from("config/prompts/system.md"),
        PathBuf::from("../config/prompts/system.md"),
    ];
    configured
        .chain(conventional)
        .find_map(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly shop assistant. \
Use search_products_by_text or search_products_by_photo to find products, \
and generate_payment_link once the customer has confirmed an order.";
