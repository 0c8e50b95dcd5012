//! 主动跟进调度
//!
//! 每次出站后布置 first / second / third 三个计时器（已在等待的不重复布置）；
//! 入站消息取消全部计时器。计时器到点后由 EngagementState::claim 裁决，
//! 通过则把空闲说明交给 Agent 生成跟进消息并发送；生成或发送失败时发送固定话术。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::SellerAgent;
use crate::config::EngagementSection;
use crate::engagement::state::{idle_note, Claim, EngagementState, Stamp, Trigger};
use crate::integrations::Outbound;

/// 一次跟进生成的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleOutcome {
    /// 生成成功，待发送
    Reply(String),
    /// 生成失败，兜底话术已写入历史，待发送
    Fallback(String),
    /// 生成期间用户回复了，不发送
    Dropped,
}

/// 生成跟进消息的一方
#[async_trait]
pub trait IdleResponder: Send + Sync {
    /// still_idle 在提交结果前调用；为假时返回 Dropped 且不改动历史
    async fn respond_to_idle(
        &self,
        user_id: &str,
        note: &str,
        fallback: &str,
        still_idle: &(dyn Fn() -> bool + Send + Sync),
    ) -> IdleOutcome;

    /// 生成成功但投递失败时，兜底话术发出后写入对话历史
    async fn record_fallback(&self, user_id: &str, text: &str);
}

#[async_trait]
impl IdleResponder for SellerAgent {
    async fn respond_to_idle(
        &self,
        user_id: &str,
        note: &str,
        fallback: &str,
        still_idle: &(dyn Fn() -> bool + Send + Sync),
    ) -> IdleOutcome {
        SellerAgent::respond_to_idle(self, user_id, note, fallback, still_idle).await
    }

    async fn record_fallback(&self, user_id: &str, text: &str) {
        SellerAgent::record_fallback(self, user_id, text).await
    }
}

/// 三个计时器的延迟
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngagementDelays {
    pub first: Duration,
    pub second: Duration,
    pub third: Duration,
}

impl Default for EngagementDelays {
    fn default() -> Self {
        Self {
            first: Duration::from_secs(20),
            second: Duration::from_secs(300),
            third: Duration::from_secs(18000),
        }
    }
}

impl EngagementDelays {
    pub fn from_config(cfg: &EngagementSection) -> Self {
        Self {
            first: Duration::from_secs(cfg.first_delay_secs),
            second: Duration::from_secs(cfg.second_delay_secs),
            third: Duration::from_secs(cfg.third_delay_secs),
        }
    }

    pub fn of(&self, trigger: Trigger) -> Duration {
        match trigger {
            Trigger::First => self.first,
            Trigger::Second => self.second,
            Trigger::Third => self.third,
        }
    }
}

pub struct EngagementScheduler {
    states: Mutex<HashMap<String, EngagementState>>,
    delays: EngagementDelays,
    responder: Arc<dyn IdleResponder>,
    outbound: Arc<dyn Outbound>,
    next_generation: AtomicU64,
    enabled: bool,
}

impl EngagementScheduler {
    pub fn new(
        delays: EngagementDelays,
        responder: Arc<dyn IdleResponder>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            delays,
            responder,
            outbound,
            next_generation: AtomicU64::new(1),
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, EngagementState>> {
        // 临界区内不会 panic，中毒时沿用内部数据
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 用户发来消息
    pub fn on_inbound(&self, user_id: &str) {
        let cancelled = self
            .states()
            .entry(user_id.to_string())
            .or_default()
            .record_inbound(Stamp::now());
        if cancelled > 0 {
            tracing::debug!(user_id, cancelled, "pending follow-ups cancelled");
        }
    }

    /// 向用户发出了消息：记录时间并布置计时器
    pub fn on_outbound(self: &Arc<Self>, user_id: &str) {
        let mut armed = Vec::new();
        {
            let mut states = self.states();
            let state = states.entry(user_id.to_string()).or_default();
            state.record_outbound(Stamp::now());
            if !self.enabled {
                return;
            }
            for trigger in Trigger::ALL {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                if let Some(token) = state.arm(trigger, generation) {
                    armed.push((trigger, generation, token));
                }
            }
        }

        for (trigger, generation, token) in armed {
            let this = Arc::clone(self);
            let user = user_id.to_string();
            let delay = self.delays.of(trigger);
            tracing::debug!(user_id, %trigger, delay_secs = delay.as_secs(), "follow-up armed");
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!(user_id = %user, %trigger, "follow-up cancelled");
                    }
                    _ = tokio::time::sleep(delay) => {
                        this.fire(&user, trigger, generation).await;
                    }
                }
            });
        }
    }

    /// 计时器到点
    async fn fire(self: Arc<Self>, user_id: &str, trigger: Trigger, generation: u64) {
        let claim = self
            .states()
            .get_mut(user_id)
            .map_or(Claim::Stale, |s| s.claim(trigger, generation));
        let armed = match claim {
            Claim::Fire(armed) => armed,
            Claim::Raced => {
                tracing::info!(user_id, %trigger, "skipping follow-up, user answered after our message");
                return;
            }
            Claim::AlreadyFired => {
                tracing::debug!(user_id, %trigger, "follow-up already sent this idle period");
                return;
            }
            Claim::Stale => return,
        };

        let delay = self.delays.of(trigger);
        tracing::info!(user_id, %trigger, delay_secs = delay.as_secs(), "sending follow-up");
        let note = idle_note(delay);
        let still_idle = || self.still_idle(user_id, armed);

        let outcome = self
            .responder
            .respond_to_idle(user_id, &note, trigger.fallback(), &still_idle)
            .await;
        let delivered = match outcome {
            IdleOutcome::Dropped => {
                tracing::info!(user_id, %trigger, "dropping follow-up, user answered while it was generated");
                return;
            }
            IdleOutcome::Reply(text) => match self.outbound.send(user_id, &text).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(user_id, %trigger, error = %e, "follow-up delivery failed");
                    self.send_fallback(user_id, trigger).await
                }
            },
            IdleOutcome::Fallback(text) => self.deliver(user_id, trigger, &text).await,
        };

        if delivered {
            self.on_outbound(user_id);
        }
    }

    /// 布置计时器的那次出站之后用户没有再发消息
    fn still_idle(&self, user_id: &str, armed: Stamp) -> bool {
        self.states()
            .get(user_id)
            .map_or(false, |s| s.still_idle(armed))
    }

    async fn deliver(&self, user_id: &str, trigger: Trigger, text: &str) -> bool {
        match self.outbound.send(user_id, text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(user_id, %trigger, error = %e, "fallback delivery failed");
                false
            }
        }
    }

    async fn send_fallback(&self, user_id: &str, trigger: Trigger) -> bool {
        let text = trigger.fallback();
        let delivered = self.deliver(user_id, trigger, text).await;
        self.responder.record_fallback(user_id, text).await;
        delivered
    }

    /// 重置对话时丢弃该用户的全部跟进状态
    pub fn forget(&self, user_id: &str) {
        if let Some(mut state) = self.states().remove(user_id) {
            state.cancel_all();
        }
    }

    pub fn pending_count(&self, user_id: &str) -> usize {
        self.states()
            .get(user_id)
            .map_or(0, EngagementState::pending_count)
    }

    pub fn delays(&self) -> EngagementDelays {
        self.delays
    }
}
