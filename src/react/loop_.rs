//! 工具调用主循环
//!
//! 提交 (system, 历史, 工具) -> 模型要求调用工具则依次派发并写回 tool 消息 -> 再提交；
//! 模型直接给出文本即结束。超过最大轮数仍在调用工具时，再做一次不带工具的补全收尾。

use serde_json::json;

use crate::core::AgentError;
use crate::llm::{AssistantTurn, CompletionRequest, LlmClient, ToolSchema};
use crate::memory::{ConversationMemory, Message, ToolCallRequest};
use crate::tools::{ToolContext, ToolExecutor, PHOTO_SEARCH_TOOL};

/// 默认最大工具轮数
pub const DEFAULT_MAX_ITERATIONS: usize = 5;
/// 模型返回空文本时的收尾句
pub const CLOSING_FALLBACK: &str = "Let me know if you'd like to see more options! 💐";

/// 一次循环的结果
#[derive(Debug, Clone, PartialEq)]
pub struct LoopResult {
    pub reply: String,
    /// 带工具的补全次数
    pub iterations: usize,
    pub tool_calls: usize,
    /// 是否由不带工具的收尾补全结束
    pub forced_final: bool,
}

/// 循环配置
pub struct ToolLoop<'a> {
    pub llm: &'a dyn LlmClient,
    pub executor: &'a ToolExecutor,
    pub system_prompt: &'a str,
    pub max_iterations: usize,
    tools: Vec<ToolSchema>,
}

impl<'a> ToolLoop<'a> {
    pub fn new(llm: &'a dyn LlmClient, executor: &'a ToolExecutor, system_prompt: &'a str) -> Self {
        Self {
            llm,
            executor,
            system_prompt,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tools: executor.schemas(),
        }
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n.max(1);
        self
    }

    /// 运行循环；调用方已把本轮 user 消息写入 conversation
    pub async fn run(
        &self,
        conversation: &mut ConversationMemory,
        ctx: &ToolContext,
    ) -> Result<LoopResult, AgentError> {
        let mut tool_calls = 0;

        for iteration in 1..=self.max_iterations {
            let turn = self
                .llm
                .complete(CompletionRequest {
                    system: self.system_prompt,
                    messages: conversation.messages(),
                    tools: Some(&self.tools),
                })
                .await?;

            if !turn.wants_tools() {
                let reply = reply_text(turn);
                conversation.push(Message::assistant(reply.clone()));
                tracing::info!(user_id = %ctx.user_id, iteration, tool_calls, "reply ready");
                return Ok(LoopResult {
                    reply,
                    iterations: iteration,
                    tool_calls,
                    forced_final: false,
                });
            }

            let calls = with_ids(turn.tool_calls);
            tracing::info!(
                user_id = %ctx.user_id,
                iteration,
                requested = calls.len(),
                "model requested tools"
            );
            conversation.push(Message::assistant_tool_calls(
                turn.content.unwrap_or_default(),
                calls.clone(),
            ));
            for call in &calls {
                let outcome = self.executor.dispatch(call, ctx).await;
                tool_calls += 1;
                conversation.push(Message::tool(call.id.clone(), outcome.content));
            }
        }

        tracing::warn!(
            user_id = %ctx.user_id,
            max_iterations = self.max_iterations,
            "iteration ceiling reached, forcing a reply without tools"
        );
        let turn = self
            .llm
            .complete(CompletionRequest {
                system: self.system_prompt,
                messages: conversation.messages(),
                tools: None,
            })
            .await?;
        if turn.wants_tools() {
            tracing::debug!(ignored = turn.tool_calls.len(), "tool calls ignored in final reply");
        }
        let reply = reply_text(turn);
        conversation.push(Message::assistant(reply.clone()));
        Ok(LoopResult {
            reply,
            iterations: self.max_iterations,
            tool_calls,
            forced_final: true,
        })
    }

    /// 入站带图时先做一次以图搜图，成功则作为已应答的工具调用写入历史
    pub async fn prefetch_photo(
        &self,
        conversation: &mut ConversationMemory,
        ctx: &ToolContext,
        k: usize,
    ) -> bool {
        let Some(photo) = ctx.photo_path.as_ref() else {
            return false;
        };
        let call = ToolCallRequest {
            id: format!("prefetch_{}", uuid::Uuid::new_v4().simple()),
            name: PHOTO_SEARCH_TOOL.to_string(),
            arguments: json!({"photo_path": photo.to_string_lossy(), "k": k}).to_string(),
        };
        let outcome = self.executor.dispatch(&call, ctx).await;
        if !outcome.ok {
            tracing::warn!(user_id = %ctx.user_id, error = %outcome.content, "eager photo search failed");
            return false;
        }
        let id = call.id.clone();
        conversation.push(Message::assistant_tool_calls("", vec![call]));
        conversation.push(Message::tool(id, outcome.content));
        true
    }
}

fn reply_text(turn: AssistantTurn) -> String {
    match turn.content {
        Some(text) if !text.trim().is_empty() => text,
        _ => CLOSING_FALLBACK.to_string(),
    }
}

/// 模型未给 id 时补一个，保证 tool 消息能对应回请求
fn with_ids(calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    calls
        .into_iter()
        .map(|mut c| {
            if c.id.is_empty() {
                c.id = format!("call_{}", uuid::Uuid::new_v4().simple());
            }
            c
        })
        .collect()
}
