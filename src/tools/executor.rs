//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时。每次调用在超时内执行，输出结构化审计日志（JSON）；
//! 无论成功、参数错误、未知工具还是超时，都产出一段可以写回对话的文本。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::llm::ToolSchema;
use crate::memory::ToolCallRequest;
use crate::tools::{ToolContext, ToolRegistry};

/// 一次派发的结果；失败时 content 以 "Error: " 开头
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: String,
    pub ok: bool,
}

impl ToolOutcome {
    fn from_result(result: Result<String, AgentError>) -> Self {
        match result {
            Ok(content) => Self { content, ok: true },
            Err(e) => Self {
                content: format!("Error: {}", e),
                ok: false,
            },
        }
    }
}

/// 工具执行器：对每次调用施加超时，错误一律转成 "Error: ..." 文本
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// 派发一次模型发起的工具调用（arguments 为原始 JSON 字符串）
    pub async fn dispatch(&self, call: &ToolCallRequest, ctx: &ToolContext) -> ToolOutcome {
        let args = match parse_arguments(&call.name, &call.arguments) {
            Ok(args) => args,
            Err(e) => {
                audit(&call.name, false, "invalid_arguments", 0, &call.arguments);
                return ToolOutcome::from_result(Err(e));
            }
        };
        self.execute(&call.name, args, ctx).await
    }

    /// 执行指定工具；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let start = Instant::now();
        let preview = args_preview(&args.to_string());
        let result = timeout(self.timeout, self.registry.execute(tool_name, args, ctx)).await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(AgentError::UnknownTool(_))) => "unknown_tool",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        audit(tool_name, outcome == "ok", outcome, duration_ms, &preview);
        tracing::debug!(user_id = %ctx.user_id, tool = tool_name, outcome, "tool dispatched");

        ToolOutcome::from_result(match result {
            Ok(r) => r,
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        })
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn parse_arguments(tool: &str, raw: &str) -> Result<Value, AgentError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| AgentError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

fn audit(tool: &str, ok: bool, outcome: &str, duration_ms: u64, args: &str) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": ok,
        "outcome": outcome,
        "duration_ms": duration_ms,
        "args_preview": args_preview(args),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}
