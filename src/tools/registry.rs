//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），
//! 由 ToolRegistry 按注册顺序保存并按名查找；ToolExecutor 在调用时加超时并把错误转成文本。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::ToolSchema;

/// 触发本次调用的事件上下文
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub user_id: String,
    /// 入站事件附带的图片（已落盘）
    pub photo_path: Option<PathBuf>,
}

impl ToolContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            photo_path: None,
        }
    }

    pub fn with_photo(mut self, photo_path: Option<PathBuf>) -> Self {
        self.photo_path = photo_path;
        self
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（function calling 中的 name）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AgentError>;
}

/// 把 JSON 参数解析成工具的参数结构
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, AgentError> {
    serde_json::from_value(args).map_err(|e| AgentError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

/// 工具注册表：保持注册顺序，同名后注册者覆盖
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let tool: Arc<dyn Tool> = Arc::new(tool);
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(i) => self.tools[i] = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<String, AgentError> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        tool.execute(args, ctx).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// 提供给补全服务的工具定义
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test"
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String, AgentError> {
            Ok(self.1.to_string())
        }
    }

    #[tokio::test]
    async fn test_order_and_override() {
        let mut reg = ToolRegistry::new();
        reg.register(Named("b", "first"));
        reg.register(Named("a", "a"));
        reg.register(Named("b", "second"));
        assert_eq!(reg.tool_names(), vec!["b", "a"]);

        let ctx = ToolContext::new("u1");
        let out = reg.execute("b", Value::Null, &ctx).await.unwrap();
        assert_eq!(out, "second");

        let err = reg.execute("missing", Value::Null, &ctx).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(_)));
        assert_eq!(reg.schemas()[1].name, "a");
    }
}
