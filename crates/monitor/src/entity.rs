//! Store entity status watches.
//!
//! Each watch remembers the transport topic it needs. Topics are
//! reference counted so the transport subscription is issued for the
//! first watch on a topic and withdrawn only after the last one goes.

use std::collections::HashMap;
use std::sync::Arc;

use cl_core::entity::EntityStatus;
use cl_core::types::EntityId;
use tokio::sync::RwLock;

use crate::callback::{Callback, CallbackDispatcher};

pub type EntityCallback = Callback<EntityStatus>;

#[derive(Clone)]
struct EntityWatch {
    entity_id: EntityId,
    topic: String,
    callback: EntityCallback,
}

#[derive(Default)]
struct EntityWatches {
    watches: HashMap<String, EntityWatch>,
    topic_refs: HashMap<String, usize>,
}

/// Outcome of registering an entity watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySubscription {
    pub subscription_id: String,
    pub topic: String,
    /// No other live watch uses this topic yet.
    pub first_for_topic: bool,
}

/// Outcome of removing an entity watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRelease {
    pub topic: String,
    /// No live watch uses this topic anymore.
    pub last_for_topic: bool,
}

pub struct EntityWatchRegistry {
    inner: RwLock<EntityWatches>,
    dispatcher: Arc<CallbackDispatcher>,
}

impl EntityWatchRegistry {
    pub fn new(dispatcher: Arc<CallbackDispatcher>) -> Self {
        Self {
            inner: RwLock::new(EntityWatches::default()),
            dispatcher,
        }
    }

    pub async fn subscribe(
        &self,
        entity_id: EntityId,
        topic: String,
        callback: EntityCallback,
    ) -> EntitySubscription {
        let subscription_id = uuid::Uuid::new_v4().to_string();
        let mut inner = self.inner.write().await;

        let refs = inner.topic_refs.entry(topic.clone()).or_insert(0);
        *refs += 1;
        let first_for_topic = *refs == 1;

        inner.watches.insert(
            subscription_id.clone(),
            EntityWatch {
                entity_id,
                topic: topic.clone(),
                callback,
            },
        );

        tracing::debug!(
            entity_id,
            subscription_id = %subscription_id,
            topic = %topic,
            "Registered entity watch",
        );

        EntitySubscription {
            subscription_id,
            topic,
            first_for_topic,
        }
    }

    /// Remove a watch. Unknown ids are logged and yield `None`.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Option<EntityRelease> {
        let mut inner = self.inner.write().await;
        let Some(watch) = inner.watches.remove(subscription_id) else {
            tracing::warn!(subscription_id, "Entity subscription not found");
            return None;
        };

        let remaining = inner
            .topic_refs
            .get(&watch.topic)
            .copied()
            .unwrap_or(0)
            .saturating_sub(1);
        let last_for_topic = remaining == 0;
        if last_for_topic {
            inner.topic_refs.remove(&watch.topic);
        } else {
            inner.topic_refs.insert(watch.topic.clone(), remaining);
        }

        tracing::debug!(
            entity_id = watch.entity_id,
            subscription_id,
            last_for_topic,
            "Removed entity watch",
        );

        Some(EntityRelease {
            topic: watch.topic,
            last_for_topic,
        })
    }

    /// Topics that currently have at least one live watch.
    pub async fn topics(&self) -> Vec<String> {
        self.inner.read().await.topic_refs.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.watches.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.watches.is_empty()
    }

    /// Deliver a status report to every watch on its entity id.
    pub async fn dispatch(&self, status: &EntityStatus) {
        let callbacks: Vec<EntityCallback> = self
            .inner
            .read()
            .await
            .watches
            .values()
            .filter(|w| w.entity_id == status.entity_id)
            .map(|w| w.callback.clone())
            .collect();

        tracing::debug!(
            entity_id = status.entity_id,
            status = %status.status,
            watchers = callbacks.len(),
            "Entity status received",
        );

        for callback in &callbacks {
            self.dispatcher.invoke(callback, status.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn registry() -> EntityWatchRegistry {
        EntityWatchRegistry::new(Arc::new(CallbackDispatcher::new()))
    }

    fn noop() -> EntityCallback {
        Callback::inline(|_: EntityStatus| {})
    }

    #[tokio::test]
    async fn topic_refcount_tracks_first_and_last() {
        let reg = registry();
        let topic = "store/8001/entity_item_status/5".to_string();

        let a = reg.subscribe(5, topic.clone(), noop()).await;
        let b = reg.subscribe(5, topic.clone(), noop()).await;
        assert!(a.first_for_topic);
        assert!(!b.first_for_topic);

        let release = reg.unsubscribe(&a.subscription_id).await.unwrap();
        assert!(!release.last_for_topic);
        assert_eq!(reg.topics().await, vec![topic.clone()]);

        let release = reg.unsubscribe(&b.subscription_id).await.unwrap();
        assert!(release.last_for_topic);
        assert_eq!(release.topic, topic);
        assert!(reg.topics().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_unsubscribe_returns_none() {
        assert!(registry().unsubscribe("missing").await.is_none());
    }

    #[tokio::test]
    async fn dispatch_matches_entity_id() {
        let reg = registry();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        reg.subscribe(
            9,
            "store/8001/entity_item_status/9".into(),
            Callback::inline(move |status: EntityStatus| {
                assert_eq!(status.entity_id, 9);
                h.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

        reg.dispatch(&EntityStatus::new(9, "processing", 1)).await;
        reg.dispatch(&EntityStatus::new(10, "processing", 1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
