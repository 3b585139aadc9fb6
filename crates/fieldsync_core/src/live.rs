//! Live (reactive) queries.
//!
//! A live query runs on a background task: it resolves the tenant, runs the
//! query, publishes a snapshot, then sleeps until the store reports a change
//! to that tenant's rows or asks for a refresh.

use crate::change_feed::StoreSignal;
use crate::tenant::TenantResolver;
use crate::types::TenantId;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One published result of a live query.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot<V> {
    /// Query result.
    pub value: V,
    /// True once tenant resolution and the first query run have finished.
    /// An empty `value` with `hydrated == false` means "not loaded yet",
    /// never "no data".
    pub hydrated: bool,
    /// Tenant the result was computed for.
    pub tenant_id: Option<TenantId>,
}

/// Handle to a running live query. Dropping it stops the query task.
#[derive(Debug)]
pub struct LiveQuery<V> {
    rx: watch::Receiver<QuerySnapshot<V>>,
    task: JoinHandle<()>,
}

impl<V> LiveQuery<V>
where
    V: Clone + Default + Send + Sync + 'static,
{
    pub(crate) fn spawn<Q>(
        mut signals: UnboundedReceiver<StoreSignal>,
        tenants: Arc<dyn TenantResolver>,
        mut query: Q,
    ) -> Self
    where
        Q: FnMut(Option<&TenantId>) -> V + Send + 'static,
    {
        let (tx, rx) = watch::channel(QuerySnapshot {
            value: V::default(),
            hydrated: false,
            tenant_id: None,
        });

        let task = tokio::spawn(async move {
            loop {
                let tenant = tenants.current_tenant_id().await;
                let value = query(tenant.as_ref());
                let snapshot = QuerySnapshot {
                    value,
                    hydrated: true,
                    tenant_id: tenant.clone(),
                };
                if tx.send(snapshot).is_err() {
                    return;
                }

                loop {
                    match signals.recv().await {
                        None => return,
                        Some(StoreSignal::Refresh) => break,
                        Some(StoreSignal::Changed(event))
                            if Some(&event.tenant_id) == tenant.as_ref() =>
                        {
                            break
                        }
                        Some(_) => {}
                    }
                }
                // Collapse a burst of signals into one re-run.
                while signals.try_recv().is_ok() {}
            }
        });

        Self { rx, task }
    }

    /// The latest snapshot.
    pub fn current(&self) -> QuerySnapshot<V> {
        self.rx.borrow().clone()
    }

    /// Returns true once the first result is published.
    pub fn is_hydrated(&self) -> bool {
        self.rx.borrow().hydrated
    }

    /// Waits for the next snapshot. Returns `None` once the query task has
    /// stopped.
    pub async fn changed(&mut self) -> Option<QuerySnapshot<V>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Waits until the query is hydrated and returns that snapshot.
    pub async fn wait_hydrated(&mut self) -> Option<QuerySnapshot<V>> {
        let snapshot = self.rx.wait_for(|s| s.hydrated).await.ok()?;
        Some(snapshot.clone())
    }

    /// Waits until a snapshot satisfies `predicate`.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&QuerySnapshot<V>) -> bool,
    ) -> Option<QuerySnapshot<V>> {
        let snapshot = self.rx.wait_for(|s| predicate(s)).await.ok()?;
        Some(snapshot.clone())
    }
}

impl<V> Drop for LiveQuery<V> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_feed::{ChangeEvent, ChangeFeed, Origin};
    use crate::tenant::StaticTenant;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn changed(tenant: &str) -> StoreSignal {
        StoreSignal::Changed(ChangeEvent {
            kind: "section",
            tenant_id: TenantId::new(tenant),
            origin: Origin::Local,
            ids: Vec::new(),
        })
    }

    #[tokio::test]
    async fn starts_unhydrated_then_publishes() {
        let feed = ChangeFeed::new();
        let tenants = Arc::new(StaticTenant::new(Some(TenantId::new("t1"))));
        let mut live = LiveQuery::spawn(feed.subscribe(), tenants, |tenant| {
            tenant.map(|t| vec![t.to_string()]).unwrap_or_default()
        });

        let snapshot = live.wait_hydrated().await.unwrap();
        assert_eq!(snapshot.value, vec!["t1".to_string()]);
        assert_eq!(snapshot.tenant_id, Some(TenantId::new("t1")));
        assert!(live.is_hydrated());
    }

    #[tokio::test]
    async fn reruns_only_for_own_tenant() {
        let feed = ChangeFeed::new();
        let tenants = Arc::new(StaticTenant::new(Some(TenantId::new("t1"))));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let mut live = LiveQuery::spawn(feed.subscribe(), tenants, move |_| {
            counter.fetch_add(1, Ordering::SeqCst) + 1
        });
        live.wait_hydrated().await.unwrap();

        feed.emit(changed("t2"));
        feed.emit(changed("t1"));
        let snapshot = live.wait_for(|s| s.value >= 2).await.unwrap();
        assert_eq!(snapshot.value, 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_re_resolves_tenant() {
        let feed = ChangeFeed::new();
        let tenants = Arc::new(StaticTenant::new(None));
        let mut live = LiveQuery::spawn(feed.subscribe(), tenants.clone(), |tenant| {
            tenant.map(ToString::to_string).unwrap_or_default()
        });

        let first = live.wait_hydrated().await.unwrap();
        assert!(first.hydrated);
        assert!(first.tenant_id.is_none());

        tenants.set(Some(TenantId::new("t9")));
        feed.emit(StoreSignal::Refresh);
        let snapshot = live.wait_for(|s| s.tenant_id.is_some()).await.unwrap();
        assert_eq!(snapshot.value, "t9");
    }

    #[tokio::test]
    async fn dropping_stops_the_task() {
        let feed = ChangeFeed::new();
        let tenants = Arc::new(StaticTenant::new(None));
        let mut live = LiveQuery::spawn(feed.subscribe(), tenants, |_| 0u8);
        live.wait_hydrated().await.unwrap();
        drop(live);

        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        feed.emit(StoreSignal::Refresh);
        feed.emit(StoreSignal::Refresh);
        assert_eq!(feed.subscriber_count(), 0);
    }
}
