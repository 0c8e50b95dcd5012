//! Seller 命令行
//!
//! 本地单用户对话：普通输入即消息，`/photo <路径> [说明]` 以图搜图，
//! `/clear` 清空对话，`/usage` 查看 token 用量，`/quit` 退出。跟进消息会异步打印。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use seller::agent::create_agent_components;
use seller::config::{load_config, load_system_prompt};
use seller::engagement::{EngagementDelays, EngagementScheduler};
use seller::integrations::{ChatService, ConsoleOutbound, Outbound};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOCAL_USER: &str = "local";

#[derive(Debug, PartialEq)]
enum Command {
    Say(String),
    Photo { path: PathBuf, caption: String },
    Clear,
    Usage,
    Quit,
    Empty,
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    match line {
        "/quit" | "/exit" => return Command::Quit,
        "/clear" => return Command::Clear,
        "/usage" => return Command::Usage,
        _ => {}
    }
    if let Some(rest) = line.strip_prefix("/photo ") {
        let rest = rest.trim();
        let (path, caption) = rest.split_once(' ').unwrap_or((rest, ""));
        return Command::Photo {
            path: PathBuf::from(path),
            caption: caption.trim().to_string(),
        };
    }
    Command::Say(line.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let system_prompt = load_system_prompt(&cfg);

    let agent = Arc::new(
        create_agent_components(&cfg, &system_prompt)
            .await
            .context("Failed to create agent")?,
    );
    let outbound: Arc<dyn Outbound> = Arc::new(ConsoleOutbound);
    let scheduler = Arc::new(
        EngagementScheduler::new(
            EngagementDelays::from_config(&cfg.engagement),
            agent.clone(),
            outbound.clone(),
        )
        .with_enabled(cfg.engagement.enabled),
    );
    let chat = ChatService::new(agent.clone(), scheduler, outbound);

    if cfg.agent.session_ttl_secs > 0 {
        let agent = agent.clone();
        let ttl = Duration::from_secs(cfg.agent.session_ttl_secs);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(ttl.min(Duration::from_secs(600)));
            loop {
                tick.tick().await;
                let evicted = agent.evict_idle(ttl).await;
                if evicted > 0 {
                    tracing::info!(evicted, "idle conversations evicted");
                }
            }
        });
    }

    println!("💐 {} ready. Type a message, /photo <path> [caption], /clear, /usage or /quit.",
        cfg.app.name.as_deref().unwrap_or("Seller"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let result = match parse_command(&line) {
            Command::Quit => break,
            Command::Empty => continue,
            Command::Clear => {
                chat.reset(LOCAL_USER).await;
                println!("Conversation cleared.");
                continue;
            }
            Command::Usage => {
                let (prompt, completion, total) = agent.token_usage();
                println!("tokens: prompt={} completion={} total={}", prompt, completion, total);
                continue;
            }
            Command::Photo { path, caption } => {
                if !path.exists() {
                    println!("No such file: {}", path.display());
                    continue;
                }
                chat.handle_message(LOCAL_USER, &caption, Some(path)).await
            }
            Command::Say(text) => chat.handle_message(LOCAL_USER, &text, None).await,
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "failed to deliver reply");
        }
    }

    Ok(())
}
