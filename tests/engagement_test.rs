//! 主动跟进端到端测试：暂停时钟下驱动 ChatService + 调度器

use std::sync::Arc;
use std::time::Duration;

use seller::agent::assemble_agent;
use seller::catalog::{CatalogSearchService, InMemoryIndex};
use seller::config::AppConfig;
use seller::engagement::{EngagementDelays, EngagementScheduler};
use seller::integrations::{ChatService, RecordingOutbound};
use seller::llm::{AssistantTurn, MockLlmClient, StaticEncoder};
use seller::memory::Role;

struct Harness {
    chat: ChatService,
    outbound: Arc<RecordingOutbound>,
}

fn harness(llm: Arc<MockLlmClient>) -> Harness {
    let encoder = Arc::new(StaticEncoder::new(vec![1.0]));
    let search = Arc::new(CatalogSearchService::new(
        Arc::new(InMemoryIndex::new()),
        encoder.clone(),
        encoder,
    ));
    let agent = Arc::new(assemble_agent(&AppConfig::default(), llm, search, "sys"));
    let outbound = Arc::new(RecordingOutbound::new());
    let scheduler = Arc::new(EngagementScheduler::new(
        EngagementDelays::default(),
        agent.clone(),
        outbound.clone(),
    ));
    Harness {
        chat: ChatService::new(agent, scheduler, outbound.clone()),
        outbound,
    }
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn test_first_follow_up_after_twenty_seconds() {
    let h = harness(Arc::new(MockLlmClient::new()));
    h.chat.handle_message("u1", "hi", None).await.unwrap();

    advance(19).await;
    assert_eq!(h.outbound.sent_to("u1").len(), 1);

    advance(2).await;
    assert_eq!(
        h.outbound.sent_to("u1"),
        vec![
            "Echo from Mock: hi",
            "Echo from Mock: user did not answer in 20sec"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reply_restarts_the_idle_clock() {
    let h = harness(Arc::new(MockLlmClient::new()));
    h.chat.handle_message("u1", "hi", None).await.unwrap();
    advance(10).await;
    h.chat.handle_message("u1", "any roses?", None).await.unwrap();

    // 第一次出站后的 20 秒已过，但计时器已被入站取消
    advance(15).await;
    assert_eq!(h.outbound.sent_to("u1").len(), 2);

    advance(6).await;
    let sent = h.outbound.sent_to("u1");
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2], "Echo from Mock: user did not answer in 20sec");
}

#[tokio::test(start_paused = true)]
async fn test_silent_user_gets_each_follow_up_once() {
    let h = harness(Arc::new(MockLlmClient::new()));
    h.chat.handle_message("u1", "hi", None).await.unwrap();

    advance(20_000).await;

    let sent = h.outbound.sent_to("u1");
    assert_eq!(
        sent,
        vec![
            "Echo from Mock: hi",
            "Echo from Mock: user did not answer in 20sec",
            "Echo from Mock: user did not answer in 5 minutes",
            "Echo from Mock: user did not answer in 5 hours",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_users_are_independent() {
    let h = harness(Arc::new(MockLlmClient::new()));
    h.chat.handle_message("u1", "hi", None).await.unwrap();
    advance(5).await;
    h.chat.handle_message("u2", "hello", None).await.unwrap();

    advance(16).await;
    assert_eq!(h.outbound.sent_to("u1").len(), 2);
    assert_eq!(h.outbound.sent_to("u2").len(), 1);

    advance(5).await;
    assert_eq!(h.outbound.sent_to("u2").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_generation_failure_sends_fixed_phrase() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_turn(AssistantTurn::text("Welcome! 💐"));
    llm.push_error("model unavailable");
    let h = harness(llm);

    h.chat.handle_message("u1", "hi", None).await.unwrap();
    advance(21).await;

    assert_eq!(
        h.outbound.sent_to("u1"),
        vec!["Welcome! 💐", "Did you like what you saw? 😊"]
    );
    let history = h.chat.agent().history("u1").await;
    let last = history.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "Did you like what you saw? 😊");
}

#[tokio::test(start_paused = true)]
async fn test_reset_drops_pending_follow_ups() {
    let h = harness(Arc::new(MockLlmClient::new()));
    h.chat.handle_message("u1", "hi", None).await.unwrap();
    assert_eq!(h.chat.scheduler().pending_count("u1"), 3);

    h.chat.reset("u1").await;
    advance(20_000).await;

    assert_eq!(h.outbound.sent_to("u1").len(), 1);
    assert!(h.chat.agent().history("u1").await.is_empty());
}
