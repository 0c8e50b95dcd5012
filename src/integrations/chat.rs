//! 前端无关的会话入口：入站 -> Agent -> 出站 -> 布置跟进

use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::SellerAgent;
use crate::core::AgentError;
use crate::engagement::EngagementScheduler;
use crate::integrations::Outbound;

pub struct ChatService {
    agent: Arc<SellerAgent>,
    scheduler: Arc<EngagementScheduler>,
    outbound: Arc<dyn Outbound>,
}

impl ChatService {
    pub fn new(
        agent: Arc<SellerAgent>,
        scheduler: Arc<EngagementScheduler>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            agent,
            scheduler,
            outbound,
        }
    }

    /// 处理一条入站消息并把回复发给用户；发送失败时不布置跟进
    pub async fn handle_message(
        &self,
        user_id: &str,
        text: &str,
        photo: Option<PathBuf>,
    ) -> Result<String, AgentError> {
        self.scheduler.on_inbound(user_id);
        let reply = self.agent.process_message(user_id, text, photo).await;
        self.outbound.send(user_id, &reply).await?;
        self.scheduler.on_outbound(user_id);
        Ok(reply)
    }

    /// 清空对话与跟进计时器
    pub async fn reset(&self, user_id: &str) {
        self.scheduler.forget(user_id);
        self.agent.reset(user_id).await;
    }

    pub fn agent(&self) -> &Arc<SellerAgent> {
        &self.agent
    }

    pub fn scheduler(&self) -> &Arc<EngagementScheduler> {
        &self.scheduler
    }
}
