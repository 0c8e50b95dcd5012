//! 按用户划分的对话存储
//!
//! 首次使用时创建；每个用户一把 tokio Mutex，同一用户的消息严格串行，不同用户互不阻塞。
//! 支持显式清空与空闲回收。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use super::conversation::{ConversationMemory, Message};

struct Entry {
    memory: Arc<Mutex<ConversationMemory>>,
    last_active: Instant,
}

/// 对话存储：user_id -> ConversationMemory
pub struct ConversationStore {
    entries: Mutex<HashMap<String, Entry>>,
    max_messages: Option<usize>,
}

impl ConversationStore {
    pub fn new(max_messages: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_messages,
        }
    }

    /// 取得用户对话的独占锁；持有期间该用户的其他处理会等待
    pub async fn lock(&self, user_id: &str) -> OwnedConversation {
        let memory = {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(user_id.to_string()).or_insert_with(|| Entry {
                memory: Arc::new(Mutex::new(ConversationMemory::new(self.max_messages))),
                last_active: Instant::now(),
            });
            entry.last_active = Instant::now();
            entry.memory.clone()
        };
        OwnedConversation {
            guard: memory.lock_owned().await,
        }
    }

    /// 清空用户对话（整体替换，不是部分裁剪）
    pub async fn reset(&self, user_id: &str) {
        let memory = self
            .entries
            .lock()
            .await
            .get(user_id)
            .map(|e| e.memory.clone());
        if let Some(memory) = memory {
            memory.lock().await.clear();
        }
    }

    /// 当前历史快照
    pub async fn snapshot(&self, user_id: &str) -> Vec<Message> {
        let memory = self
            .entries
            .lock()
            .await
            .get(user_id)
            .map(|e| e.memory.clone());
        match memory {
            Some(m) => m.lock().await.messages().to_vec(),
            None => Vec::new(),
        }
    }

    /// 回收空闲超过 ttl 且当前无人持有的会话，返回回收数量
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| {
            let idle = e.last_active.elapsed() > ttl;
            let in_use = e.memory.try_lock().is_err();
            !idle || in_use
        });
        before - entries.len()
    }

    pub async fn active_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// 用户对话的独占句柄
pub struct OwnedConversation {
    guard: OwnedMutexGuard<ConversationMemory>,
}

impl std::ops::Deref for OwnedConversation {
    type Target = ConversationMemory;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl std::ops::DerefMut for OwnedConversation {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_on_first_use_and_reset() {
        let store = ConversationStore::new(None);
        {
            let mut conv = store.lock("u1").await;
            conv.push(Message::user("hello"));
        }
        assert_eq!(store.snapshot("u1").await.len(), 1);
        assert!(store.snapshot("u2").await.is_empty());

        store.reset("u1").await;
        assert!(store.snapshot("u1").await.is_empty());
        assert_eq!(store.active_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_skips_locked() {
        let store = ConversationStore::new(None);
        drop(store.lock("idle").await);
        let _held = store.lock("busy").await;

        tokio::time::advance(Duration::from_secs(120)).await;
        let evicted = store.evict_idle(Duration::from_secs(60)).await;
        assert_eq!(evicted, 1);
        assert_eq!(store.active_count().await, 1);
    }
}
