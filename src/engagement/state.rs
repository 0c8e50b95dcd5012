//! 每个用户的跟进状态
//!
//! 三个具名计时器各自处于 Pending / Fired / Cancelled / Discarded 之一；
//! fired 集合只在收到新的入站消息时清空，保证一次空闲期内每个计时器最多发送一次。

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// 事件时间戳：全局递增序号 + 单调时钟
///
/// 比较只看序号，同一时钟刻度内的先后也能区分。
#[derive(Debug, Clone, Copy)]
pub struct Stamp {
    seq: u64,
    at: Instant,
}

impl Stamp {
    pub fn now() -> Self {
        Self {
            seq: NEXT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.at.elapsed()
    }
}

impl PartialEq for Stamp {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Stamp {}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq.cmp(&other.seq)
    }
}

/// 跟进计时器名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    First,
    Second,
    Third,
}

impl Trigger {
    pub const ALL: [Trigger; 3] = [Trigger::First, Trigger::Second, Trigger::Third];

    pub fn name(self) -> &'static str {
        match self {
            Trigger::First => "first",
            Trigger::Second => "second",
            Trigger::Third => "third",
        }
    }

    /// 生成失败时发送的固定话术
    pub fn fallback(self) -> &'static str {
        match self {
            Trigger::First => "Did you like what you saw? 😊",
            Trigger::Second => "Do you want something different? I'm here to help! 💐",
            Trigger::Third => "Waiting for your answer! Maybe you want something different like... 🌸",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 未知计时器名的兜底话术
pub const DEFAULT_FALLBACK: &str = "How can I help you find the perfect bouquet? 💐";

/// 按名字取兜底话术
pub fn fallback_for(name: &str) -> &'static str {
    Trigger::ALL
        .iter()
        .find(|t| t.name() == name)
        .map(|t| t.fallback())
        .unwrap_or(DEFAULT_FALLBACK)
}

/// 给模型看的空闲说明：`user did not answer in 20sec` / `5 minutes` / `5 hours`
pub fn idle_note(delay: Duration) -> String {
    let secs = delay.as_secs();
    let desc = if secs < 60 {
        format!("{}sec", secs)
    } else if secs < 3600 {
        format!("{} minutes", secs / 60)
    } else {
        format!("{} hours", secs / 3600)
    };
    format!("user did not answer in {}", desc)
}

#[derive(Debug, Clone)]
pub enum TimerState {
    Pending {
        generation: u64,
        /// 布置时的最近出站时间
        armed_outbound: Stamp,
        token: CancellationToken,
    },
    Fired,
    Cancelled,
    Discarded,
}

impl TimerState {
    pub fn is_pending(&self) -> bool {
        matches!(self, TimerState::Pending { .. })
    }
}

/// 计时器到点时的裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// 发送；附带布置时的出站时间，发送前据此再次确认用户仍未回复
    Fire(Stamp),
    /// 已被取消或被新一轮布置替换
    Stale,
    /// 布置之后用户有过入站消息
    Raced,
    /// 本空闲期已发过
    AlreadyFired,
}

#[derive(Debug, Default)]
pub struct EngagementState {
    last_inbound: Option<Stamp>,
    last_outbound: Option<Stamp>,
    timers: HashMap<Trigger, TimerState>,
    fired: HashSet<Trigger>,
}

impl EngagementState {
    /// 入站：取消所有等待中的计时器并清空 fired 集合；返回取消数量
    pub fn record_inbound(&mut self, now: Stamp) -> usize {
        self.last_inbound = Some(now);
        self.fired.clear();
        let mut cancelled = 0;
        for state in self.timers.values_mut() {
            if let TimerState::Pending { token, .. } = state {
                token.cancel();
                *state = TimerState::Cancelled;
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn record_outbound(&mut self, now: Stamp) {
        self.last_outbound = Some(now);
    }

    /// 布置计时器；同名计时器仍在等待时不重复布置
    pub fn arm(&mut self, trigger: Trigger, generation: u64) -> Option<CancellationToken> {
        if self.timers.get(&trigger).map_or(false, TimerState::is_pending) {
            return None;
        }
        let armed_outbound = self.last_outbound.unwrap_or_else(Stamp::now);
        let token = CancellationToken::new();
        self.timers.insert(
            trigger,
            TimerState::Pending {
                generation,
                armed_outbound,
                token: token.clone(),
            },
        );
        Some(token)
    }

    /// 计时器到点：决定是否发送，并推进状态
    pub fn claim(&mut self, trigger: Trigger, generation: u64) -> Claim {
        let armed_outbound = match self.timers.get(&trigger) {
            Some(TimerState::Pending {
                generation: g,
                armed_outbound,
                ..
            }) if *g == generation => *armed_outbound,
            _ => return Claim::Stale,
        };

        if self.last_inbound.map_or(false, |inbound| inbound > armed_outbound) {
            self.timers.insert(trigger, TimerState::Discarded);
            return Claim::Raced;
        }
        if !self.fired.insert(trigger) {
            self.timers.insert(trigger, TimerState::Discarded);
            return Claim::AlreadyFired;
        }
        self.timers.insert(trigger, TimerState::Fired);
        Claim::Fire(armed_outbound)
    }

    /// armed_outbound 之后没有入站消息
    pub fn still_idle(&self, armed_outbound: Stamp) -> bool {
        !self.last_inbound.map_or(false, |inbound| inbound > armed_outbound)
    }

    /// 取消全部等待中的计时器（重置对话时使用）
    pub fn cancel_all(&mut self) {
        for state in self.timers.values_mut() {
            if let TimerState::Pending { token, .. } = state {
                token.cancel();
                *state = TimerState::Cancelled;
            }
        }
    }

    pub fn timer(&self, trigger: Trigger) -> Option<&TimerState> {
        self.timers.get(&trigger)
    }

    pub fn pending_count(&self) -> usize {
        self.timers.values().filter(|s| s.is_pending()).count()
    }

    pub fn has_fired(&self, trigger: Trigger) -> bool {
        self.fired.contains(&trigger)
    }

    pub fn last_inbound(&self) -> Option<Stamp> {
        self.last_inbound
    }

    pub fn last_outbound(&self) -> Option<Stamp> {
        self.last_outbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_note_units() {
        assert_eq!(idle_note(Duration::from_secs(20)), "user did not answer in 20sec");
        assert_eq!(idle_note(Duration::from_secs(300)), "user did not answer in 5 minutes");
        assert_eq!(idle_note(Duration::from_secs(18000)), "user did not answer in 5 hours");
    }

    #[test]
    fn test_fallback_phrases() {
        assert_eq!(fallback_for("first"), "Did you like what you saw? 😊");
        assert_eq!(Trigger::Third.fallback(), fallback_for("third"));
        assert_eq!(fallback_for("fourth"), DEFAULT_FALLBACK);
    }

    #[test]
    fn test_stamps_are_strictly_ordered() {
        let a = Stamp::now();
        let b = Stamp::now();
        assert!(b > a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_arm_is_not_repeated_while_pending() {
        let mut s = EngagementState::default();
        s.record_outbound(Stamp::now());
        assert!(s.arm(Trigger::First, 1).is_some());
        assert!(s.arm(Trigger::First, 2).is_none());
        assert_eq!(s.pending_count(), 1);
    }

    #[test]
    fn test_inbound_after_claim_ends_idle_period() {
        let mut s = EngagementState::default();
        s.record_outbound(Stamp::now());
        s.arm(Trigger::First, 1);
        let Claim::Fire(armed) = s.claim(Trigger::First, 1) else {
            panic!("first trigger should fire");
        };
        assert!(s.still_idle(armed));

        s.record_inbound(Stamp::now());
        assert!(!s.still_idle(armed));
    }

    #[test]
    fn test_claim_once_per_idle_period() {
        let mut s = EngagementState::default();
        s.record_outbound(Stamp::now());
        s.arm(Trigger::First, 1);
        assert!(matches!(s.claim(Trigger::First, 1), Claim::Fire(_)));
        assert!(s.has_fired(Trigger::First));

        // 再次出站后重新布置，但本空闲期已发过
        s.record_outbound(Stamp::now());
        s.arm(Trigger::First, 2);
        assert_eq!(s.claim(Trigger::First, 2), Claim::AlreadyFired);
        assert!(matches!(s.timer(Trigger::First), Some(TimerState::Discarded)));
    }

    #[test]
    fn test_inbound_cancels_and_clears() {
        let mut s = EngagementState::default();
        s.record_outbound(Stamp::now());
        let token = s.arm(Trigger::Second, 7).unwrap();
        s.arm(Trigger::Third, 8);
        s.fired.insert(Trigger::First);

        assert_eq!(s.record_inbound(Stamp::now()), 2);
        assert!(token.is_cancelled());
        assert!(!s.has_fired(Trigger::First));
        assert_eq!(s.claim(Trigger::Second, 7), Claim::Stale);
    }

    #[test]
    fn test_race_guard_discards_late_fire() {
        let mut s = EngagementState::default();
        s.record_outbound(Stamp::now());
        s.arm(Trigger::First, 1);
        // 入站被记录但计时器任务没来得及观察到取消
        s.last_inbound = Some(Stamp::now());
        assert_eq!(s.claim(Trigger::First, 1), Claim::Raced);
        assert!(!s.has_fired(Trigger::First));
    }

    #[test]
    fn test_stale_generation() {
        let mut s = EngagementState::default();
        s.record_outbound(Stamp::now());
        s.arm(Trigger::First, 3);
        assert_eq!(s.claim(Trigger::First, 2), Claim::Stale);
        assert_eq!(s.claim(Trigger::Second, 3), Claim::Stale);
    }
}
