//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本依次返回回复；脚本耗尽后回显最后一条 User 消息。
//! `always_tool_call` 模式下只要请求带工具就一直要求调用工具，用于验证循环上限。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{AssistantTurn, CompletionRequest, LlmClient, LlmError};
use crate::memory::{Message, Role, ToolCallRequest};

/// 记录下来的一次请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools_offered: bool,
}

type Scripted = Result<AssistantTurn, String>;

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Scripted>>,
    always_tool: Option<ToolCallRequest>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序返回给定回复
    pub fn scripted(turns: Vec<AssistantTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    /// 带工具的请求总是返回同一个工具调用；不带工具时返回文本
    pub fn always_tool_call(name: &str, arguments: &str) -> Self {
        Self {
            always_tool: Some(ToolCallRequest {
                id: String::new(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }),
            ..Self::default()
        }
    }

    /// 下一次调用返回错误
    pub fn push_error(&self, message: &str) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(message.to_string()));
        }
    }

    pub fn push_turn(&self, turn: AssistantTurn) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(turn));
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<AssistantTurn, LlmError> {
        let n = {
            let mut requests = self
                .requests
                .lock()
                .map_err(|_| LlmError::Http("mock poisoned".into()))?;
            requests.push(RecordedRequest {
                messages: request.messages.to_vec(),
                tools_offered: request.tools.is_some(),
            });
            requests.len()
        };

        if let Some(call) = &self.always_tool {
            if request.tools.is_some() {
                let mut call = call.clone();
                call.id = format!("mock_call_{}", n);
                return Ok(AssistantTurn::tool_calls(vec![call]));
            }
            return Ok(AssistantTurn::text("Here is what I found for you."));
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Ok(turn)) => Ok(turn),
            Some(Err(e)) => Err(LlmError::Api(e)),
            None => {
                let last_user = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Ok(AssistantTurn::text(format!("Echo from Mock: {}", last_user)))
            }
        }
    }
}
