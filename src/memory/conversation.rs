//! 对话历史（ConversationState）
//!
//! 只追加；可选保留上限，超出时丢弃最旧消息，并继续丢弃开头的非 user 消息，
//! 保证 tool 消息不会脱离发起它的 assistant 消息。最后一条 user 消息起的当前一轮从不裁剪。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// assistant 请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// 关联 id，tool 结果消息用它回指
    pub id: String,
    pub name: String,
    /// JSON 字符串形式的参数
    pub arguments: String,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// 携带工具调用请求的 assistant 消息；content 可为空
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// 单个用户的对话历史；max_messages 为 None 时不裁剪
#[derive(Clone, Debug, Default)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_messages: Option<usize>,
}

impl ConversationMemory {
    pub fn new(max_messages: Option<usize>) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.filter(|m| *m > 0),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 整体清空（显式 reset）
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn prune(&mut self) {
        let Some(max) = self.max_messages else {
            return;
        };
        if self.messages.len() <= max {
            return;
        }
        // 当前一轮（最后一条 user 及其后）整体保留，轮内超限时暂不裁剪
        let Some(last_user) = self.messages.iter().rposition(|m| m.role == Role::User) else {
            return;
        };
        let mut cut = self.messages.len() - max;
        // 只从 user 消息处开始保留，避免留下孤立的 tool 结果
        while cut < last_user && self.messages[cut].role != Role::User {
            cut += 1;
        }
        self.messages.drain(..cut.min(last_user));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_when_zero() {
        let mut mem = ConversationMemory::new(Some(0));
        for i in 0..50 {
            mem.push(Message::user(format!("m{i}")));
        }
        assert_eq!(mem.len(), 50);
    }

    #[test]
    fn test_prune_keeps_tail() {
        let mut mem = ConversationMemory::new(Some(4));
        for i in 0..6 {
            mem.push(Message::user(format!("m{i}")));
        }
        assert_eq!(mem.len(), 4);
        assert_eq!(mem.messages()[0].content, "m2");
    }

    fn search_call(id: &str) -> Message {
        Message::assistant_tool_calls(
            "",
            vec![ToolCallRequest {
                id: id.into(),
                name: "search_products_by_text".into(),
                arguments: "{}".into(),
            }],
        )
    }

    #[test]
    fn test_prune_never_orphans_tool_turns() {
        let mut mem = ConversationMemory::new(Some(3));
        mem.push(Message::user("hi"));
        mem.push(search_call("c1"));
        mem.push(Message::tool("c1", "Product 1: ..."));
        mem.push(Message::assistant("here you go"));

        // 当前一轮超限也不裁剪，tool 结果仍跟在发起它的 assistant 后面
        assert_eq!(mem.len(), 4);
        assert_eq!(mem.messages()[0].role, Role::User);
        assert_eq!(mem.messages()[2].tool_call_id.as_deref(), Some("c1"));

        mem.push(Message::user("thanks"));
        assert_eq!(mem.len(), 1);
        assert_eq!(mem.messages()[0].content, "thanks");
    }

    #[test]
    fn test_long_tool_round_keeps_its_user_turn() {
        let mut mem = ConversationMemory::new(Some(2));
        mem.push(Message::user("old"));
        mem.push(Message::assistant("old reply"));
        mem.push(Message::user("roses"));
        for i in 0..3 {
            let id = format!("c{i}");
            mem.push(search_call(&id));
            mem.push(Message::tool(id, "Product 1: ..."));
        }

        let messages = mem.messages();
        assert_eq!(messages[0].content, "roses");
        assert_eq!(messages.len(), 7);
        for pair in messages[1..].chunks(2) {
            assert!(pair[0].has_tool_calls());
            assert_eq!(pair[1].tool_call_id.as_deref(), Some(pair[0].tool_calls[0].id.as_str()));
        }
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let json = serde_json::to_value(Message::user("hello")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hello"}));
    }
}
