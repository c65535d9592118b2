//! Resources a database releases when it closes.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Something that holds engine state on behalf of a database: an iterator,
/// a chained batch or a snapshot.
#[async_trait]
pub(crate) trait Resource: Send + Sync {
    /// Releases the engine state. Must be idempotent.
    async fn release(&self) -> Result<()>;
}

/// Identifies a registered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ResourceId(u64);

/// Weak handles to every live resource of one database.
#[derive(Default)]
pub(crate) struct Resources {
    next_id: u64,
    live: HashMap<ResourceId, Weak<dyn Resource>>,
}

impl Resources {
    pub(crate) fn register(&mut self, resource: Weak<dyn Resource>) -> ResourceId {
        self.next_id += 1;
        let id = ResourceId(self.next_id);
        self.live.insert(id, resource);
        id
    }

    pub(crate) fn remove(&mut self, id: ResourceId) {
        self.live.remove(&id);
    }

    /// Takes every resource that is still alive, leaving the set empty.
    pub(crate) fn drain(&mut self) -> Vec<Arc<dyn Resource>> {
        self.live.drain().filter_map(|(_, weak)| weak.upgrade()).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl Resource for Counter {
        async fn release(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn drain_skips_dropped_resources() {
        let mut resources = Resources::default();
        let kept: Arc<dyn Resource> = Arc::new(Counter(AtomicUsize::new(0)));
        let dropped: Arc<dyn Resource> = Arc::new(Counter(AtomicUsize::new(0)));
        resources.register(Arc::downgrade(&kept));
        resources.register(Arc::downgrade(&dropped));
        drop(dropped);

        let live = resources.drain();
        assert_eq!(live.len(), 1);
        assert_eq!(resources.len(), 0);
        for resource in live {
            resource.release().await.unwrap();
        }
    }

    #[test]
    fn remove_forgets_resource() {
        let mut resources = Resources::default();
        let kept: Arc<dyn Resource> = Arc::new(Counter(AtomicUsize::new(0)));
        let id = resources.register(Arc::downgrade(&kept));
        resources.remove(id);
        assert_eq!(resources.len(), 0);
    }
}
