//! 工具循环与 Agent 端到端测试（Mock LLM + 内存索引，无网络）

use std::sync::Arc;

use seller::agent::{assemble_agent, APOLOGY, DEFAULT_PHOTO_CAPTION};
use seller::catalog::{
    CatalogSearchService, DocumentKind, DocumentMetadata, EmbeddingDocument, InMemoryIndex,
    VectorIndex,
};
use seller::config::AppConfig;
use seller::engagement::{EngagementDelays, EngagementScheduler};
use seller::integrations::{ChatService, RecordingOutbound};
use seller::llm::{AssistantTurn, MockLlmClient, StaticEncoder};
use seller::memory::{Role, ToolCallRequest};
use seller::SellerAgent;

fn metadata(id: &str, kind: DocumentKind, name: &str, price: u64) -> DocumentMetadata {
    DocumentMetadata {
        product_id: id.to_string(),
        kind,
        name: name.to_string(),
        description: format!("{} bouquet", name),
        tags: "roses, red".to_string(),
        quantity: 5,
        price,
        photo_url: Some(format!("https://imagedelivery.net/shop/{}/public", id)),
    }
}

async fn seeded_index() -> Arc<InMemoryIndex> {
    let index = Arc::new(InMemoryIndex::new());
    index
        .upsert(&EmbeddingDocument::new(
            vec![1.0, 0.0],
            metadata("101", DocumentKind::Photo, "Red Rose Classic", 450_000),
        ))
        .await
        .unwrap();
    index
        .upsert(&EmbeddingDocument::new(
            vec![0.0, 1.0],
            metadata("102", DocumentKind::Text, "Spring Tulip Mix", 280_000),
        ))
        .await
        .unwrap();
    index
}

fn agent_with(llm: Arc<MockLlmClient>, index: Arc<InMemoryIndex>) -> SellerAgent {
    let encoder = Arc::new(StaticEncoder::new(vec![1.0, 0.0]));
    let search = Arc::new(CatalogSearchService::new(index, encoder.clone(), encoder));
    assemble_agent(&AppConfig::default(), llm, search, "You sell flowers.")
}

fn call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

#[tokio::test]
async fn test_tool_loop_is_bounded_and_forces_final_answer() {
    let llm = Arc::new(MockLlmClient::always_tool_call(
        "search_products_by_text",
        r#"{"query_text":"red roses"}"#,
    ));
    let agent = agent_with(llm.clone(), seeded_index().await);

    let reply = agent.process_message("u1", "show me roses", None).await;

    assert_eq!(reply, "Here is what I found for you.");
    assert_eq!(llm.call_count(), 6);
    let requests = llm.requests();
    assert!(requests[..5].iter().all(|r| r.tools_offered));
    assert!(!requests[5].tools_offered);

    let history = agent.history("u1").await;
    let tool_turns = history.iter().filter(|m| m.role == Role::Tool).count();
    assert_eq!(tool_turns, 5);
    assert_eq!(history.last().unwrap().content, reply);
}

#[tokio::test]
async fn test_every_tool_call_gets_a_tool_reply() {
    let llm = Arc::new(MockLlmClient::scripted(vec![
        AssistantTurn::tool_calls(vec![
            call("c1", "search_products_by_text", r#"{"query_text":"tulips","k":1}"#),
            call("c2", "generate_payment_link", r#"{"price":280000}"#),
        ]),
        AssistantTurn::text("Here you go 💐"),
    ]));
    let agent = agent_with(llm, seeded_index().await);

    let reply = agent.process_message("u1", "tulips please", None).await;
    assert_eq!(reply, "Here you go 💐");

    let history = agent.history("u1").await;
    let ids: Vec<_> = history
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.clone())
        .collect();
    assert_eq!(ids, vec!["c1", "c2"]);
    let payment = history
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("c2"))
        .unwrap();
    assert!(payment.content.contains("Payment link generated"));
    assert!(payment.content.contains("amount=280000"));
}

#[tokio::test]
async fn test_photo_tool_without_photo_reports_error_to_model() {
    let llm = Arc::new(MockLlmClient::scripted(vec![
        AssistantTurn::tool_calls(vec![call("c1", "search_products_by_photo", "{}")]),
        AssistantTurn::text("Could you send the photo again?"),
    ]));
    let agent = agent_with(llm.clone(), seeded_index().await);

    let reply = agent.process_message("u1", "find this", None).await;
    assert_eq!(reply, "Could you send the photo again?");

    let second = &llm.requests()[1];
    let tool_msg = second
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert_eq!(tool_msg.content, "Error: No photo provided for photo search");
}

#[tokio::test]
async fn test_llm_failure_returns_apology() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_error("upstream 500");
    let agent = agent_with(llm.clone(), seeded_index().await);

    let reply = agent.process_message("u1", "hello", None).await;
    assert_eq!(reply, APOLOGY);

    // 下一轮照常处理
    let reply = agent.process_message("u1", "hello again", None).await;
    assert_eq!(reply, "Echo from Mock: hello again");
    assert_eq!(agent.history("u1").await.len(), 4);
}

#[tokio::test]
async fn test_photo_message_is_prefetched_before_model_call() {
    let dir = tempfile::tempdir().unwrap();
    let photo = dir.path().join("bouquet.png");
    image::RgbImage::from_pixel(4, 4, image::Rgb([200, 20, 40]))
        .save(&photo)
        .unwrap();

    let llm = Arc::new(MockLlmClient::new());
    let agent = agent_with(llm.clone(), seeded_index().await);

    agent.process_message("u1", "", Some(photo)).await;

    let first = &llm.requests()[0];
    assert_eq!(first.messages[0].content, DEFAULT_PHOTO_CAPTION);
    assert!(first.messages[1].has_tool_calls());
    assert!(first.messages[1].tool_calls[0].id.starts_with("prefetch_"));
    assert_eq!(first.messages[1].tool_calls[0].name, "search_products_by_photo");
    assert_eq!(first.messages[2].role, Role::Tool);
    assert!(first.messages[2].content.contains("Red Rose Classic"));
    // 以图搜图不按文档类型过滤，文本文档同样参与
    assert!(first.messages[2].content.contains("Spring Tulip Mix"));
}

#[tokio::test]
async fn test_unreadable_photo_skips_prefetch() {
    let llm = Arc::new(MockLlmClient::new());
    let agent = agent_with(llm.clone(), seeded_index().await);

    agent
        .process_message("u1", "like this", Some("/nonexistent/photo.jpg".into()))
        .await;

    let first = &llm.requests()[0];
    assert_eq!(first.messages.len(), 1);
    assert_eq!(first.messages[0].content, "like this");
}

#[tokio::test]
async fn test_chat_service_delivers_reply() {
    let llm = Arc::new(MockLlmClient::new());
    let agent = Arc::new(agent_with(llm, seeded_index().await));
    let outbound = Arc::new(RecordingOutbound::new());
    let scheduler = Arc::new(
        EngagementScheduler::new(EngagementDelays::default(), agent.clone(), outbound.clone())
            .with_enabled(false),
    );
    let chat = ChatService::new(agent.clone(), scheduler, outbound.clone());

    let reply = chat.handle_message("u1", "hi", None).await.unwrap();
    assert_eq!(reply, "Echo from Mock: hi");
    assert_eq!(outbound.sent_to("u1"), vec!["Echo from Mock: hi"]);

    chat.reset("u1").await;
    assert!(agent.history("u1").await.is_empty());
}

#[tokio::test]
async fn test_failed_delivery_surfaces_error() {
    let llm = Arc::new(MockLlmClient::new());
    let agent = Arc::new(agent_with(llm, seeded_index().await));
    let outbound = Arc::new(RecordingOutbound::new());
    outbound.set_failing(true);
    let scheduler = Arc::new(EngagementScheduler::new(
        EngagementDelays::default(),
        agent.clone(),
        outbound.clone(),
    ));
    let chat = ChatService::new(agent, scheduler.clone(), outbound);

    assert!(chat.handle_message("u1", "hi", None).await.is_err());
    assert_eq!(scheduler.pending_count("u1"), 0);
}
