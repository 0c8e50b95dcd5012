//! 对话编排：有上限的工具调用循环

pub mod loop_;

pub use loop_::{LoopResult, ToolLoop, CLOSING_FALLBACK, DEFAULT_MAX_ITERATIONS};
