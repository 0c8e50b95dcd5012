//! Seller - Rust 对话式导购助手
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时（命令行 / 聊天平台共用）
//! - **catalog**: 商品模型、向量索引（Chroma / 内存）、检索排序与目录索引
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **engagement**: 空闲用户的三段式主动跟进
//! - **integrations**: 出站发送、回复解析与会话入口
//! - **llm**: 补全客户端（OpenAI 兼容 / Mock）与嵌入编码器
//! - **memory**: 按用户保存的对话历史
//! - **react**: 有上限的工具调用循环
//! - **tools**: 检索 / 支付工具、注册表与执行器

pub mod agent;
pub mod catalog;
pub mod config;
pub mod core;
pub mod engagement;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod react;
pub mod tools;

pub use agent::SellerAgent;
pub use integrations::ChatService;
