//! 出站消息：发送抽象、命令行实现与回复解析
//!
//! 模型回复里的链接以 `<a href="...">` 形式出现；解析出支付链接与商品图片，
//! 供支持按钮 / 图片的前端单独展示，正文转成纯文本。

use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use html2text::from_read;
use regex::Regex;

use crate::core::AgentError;

/// 向用户发送一条消息
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), AgentError>;
}

/// 解析后的回复
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyParts {
    pub text: String,
    pub payment_url: Option<String>,
    pub photo_urls: Vec<String>,
}

static ANCHOR_RE: OnceLock<Regex> = OnceLock::new();
static PAYMENT_RE: OnceLock<Regex> = OnceLock::new();

fn anchor_re() -> &'static Regex {
    ANCHOR_RE.get_or_init(|| Regex::new(r#"<a\s+[^>]*href\s*=\s*["']([^"']+)["']"#).unwrap())
}

fn payment_re() -> &'static Regex {
    PAYMENT_RE.get_or_init(|| {
        Regex::new(r#"https?://[^\s"'<>]+\?service_id=[^\s"'<>]+&amount=[^\s"'<>]+"#).unwrap()
    })
}

fn is_payment_url(url: &str) -> bool {
    url.contains("service_id=") && url.contains("amount=")
}

impl ReplyParts {
    pub fn parse(reply: &str) -> Self {
        let mut payment_url = None;
        let mut photo_urls: Vec<String> = Vec::new();

        for cap in anchor_re().captures_iter(reply) {
            let url = cap[1].replace("&amp;", "&");
            if is_payment_url(&url) {
                payment_url.get_or_insert(url);
            } else if !photo_urls.contains(&url) {
                photo_urls.push(url);
            }
        }
        if payment_url.is_none() {
            payment_url = payment_re()
                .find(&reply.replace("&amp;", "&"))
                .map(|m| m.as_str().to_string());
        }

        Self {
            text: strip_html(reply),
            payment_url,
            photo_urls,
        }
    }
}

/// HTML 转纯文本；html2text 失败时退回简单去标签
pub fn strip_html(html: &str) -> String {
    if !html.contains('<') {
        return html.trim().to_string();
    }
    match from_read(html.as_bytes(), 120) {
        Ok(text) => text.trim().to_string(),
        Err(_) => strip_html_tags(html),
    }
}

fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// 命令行出站：打印纯文本，附带支付链接与图片
#[derive(Debug, Default)]
pub struct ConsoleOutbound;

#[async_trait]
impl Outbound for ConsoleOutbound {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), AgentError> {
        let parts = ReplyParts::parse(text);
        println!("\n[seller -> {}]\n{}", user_id, parts.text);
        for url in &parts.photo_urls {
            println!("  🖼  {}", url);
        }
        if let Some(url) = &parts.payment_url {
            println!("  💳 Pay Now: {}", url);
        }
        Ok(())
    }
}

/// 记录所有发送内容（测试与演示）；可设置为失败
#[derive(Debug, Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<bool>,
}

impl RecordingOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut f) = self.failing.lock() {
            *f = failing;
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, user_id: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(u, _)| u == user_id)
            .map(|(_, t)| t)
            .collect()
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), AgentError> {
        if self.failing.lock().map(|f| *f).unwrap_or(false) {
            return Err(AgentError::Delivery(format!("send to {} refused", user_id)));
        }
        self.sent
            .lock()
            .map_err(|e| AgentError::Delivery(e.to_string()))?
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }
}
