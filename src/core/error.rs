//! Agent 错误类型
//!
//! 工具层错误（检索失败、缺少输入、参数错误）在派发边界被转成 "Error: ..." 文本写回对话；
//! 只有补全服务失败会中止当前一轮并换成致歉回复。

use thiserror::Error;

use crate::catalog::SearchError;
use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 补全服务调用失败（CompletionServiceFailure）
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 编码或索引 I/O 失败（RetrievalFailure）
    #[error("{0}")]
    Search(#[from] SearchError),

    /// 工具需要的输入缺失，如以图搜图时没有图片
    #[error("{0}")]
    MissingInput(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 出站消息发送失败（SchedulerDeliveryFailure）
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Config error: {0}")]
    Config(String),
}
