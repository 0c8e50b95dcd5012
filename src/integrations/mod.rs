//! 外部集成：出站发送抽象与前端无关的会话入口

pub mod chat;
pub mod outbound;

pub use chat::ChatService;
pub use outbound::{strip_html, ConsoleOutbound, Outbound, RecordingOutbound, ReplyParts};
