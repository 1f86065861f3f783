//! Observable queries - live result lists that follow store changes
//!
//! An [`ObservableQuery`] starts uninitialized. `start` runs the query once,
//! publishes the result and spawns a task that re-runs the whole query on
//! every change notification from the store. There is no incremental diffing:
//! each notification yields a full, freshly converted list.
//!
//! Results are published on a `tokio::sync::watch` channel, so subscribers
//! only ever see the newest list. Notifications that pile up while a refetch
//! runs are folded into the next one.

use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use crate::convert::FromRecord;
use crate::query::Query;
use crate::store::{ChangeNotification, DataStore};
use crate::{Error, Result};

/// Lifecycle of an observable query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    Uninitialized,
    Active,
}

/// A query whose results are kept current as the store changes.
///
/// The refresh task lives as long as this value; dropping it stops updates
/// and ends every [`Subscription`].
pub struct ObservableQuery<T> {
    store: DataStore,
    query: Query,
    results: Arc<watch::Sender<Vec<T>>>,
    task: Option<JoinHandle<()>>,
}

impl<T> std::fmt::Debug for ObservableQuery<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableQuery")
            .field("query", &self.query)
            .field("state", &self.state())
            .finish()
    }
}

impl<T> ObservableQuery<T>
where
    T: FromRecord + Clone + Send + Sync + 'static,
{
    pub fn new(store: DataStore, query: Query) -> Self {
        let (results, _) = watch::channel(Vec::new());
        Self {
            store,
            query,
            results: Arc::new(results),
            task: None,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Run the initial fetch and begin following changes.
    ///
    /// Fails with `Error::NoRuntime` outside a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Err(Error::AlreadyStarted);
        }
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        // Subscribe before the first fetch so no change slips in between.
        let changes = self.store.subscribe_changes();
        let initial = self.store.fetch::<T>(&self.query)?;
        tracing::debug!("observing {} ({} initial results)", self.query.kind, initial.len());
        self.results.send_replace(initial);

        let task = refresh_loop(
            self.store.clone(),
            self.query.clone(),
            self.results.clone(),
            changes,
        );
        self.task = Some(runtime.spawn(task));
        Ok(())
    }

    /// The most recently published results
    pub fn results(&self) -> Vec<T> {
        self.results.borrow().clone()
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            receiver: self.results.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.results.receiver_count()
    }
}

impl<T> ObservableQuery<T> {
    pub fn state(&self) -> ObserverState {
        if self.task.is_some() {
            ObserverState::Active
        } else {
            ObserverState::Uninitialized
        }
    }
}

impl<T> Drop for ObservableQuery<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn refresh_loop<T>(
    store: DataStore,
    query: Query,
    results: Arc<watch::Sender<Vec<T>>>,
    mut changes: broadcast::Receiver<ChangeNotification>,
) where
    T: FromRecord + Send + Sync + 'static,
{
    loop {
        match changes.recv().await {
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("observer for {} lagged by {} notifications", query.kind, skipped);
            }
            Err(RecvError::Closed) => break,
        }

        // Fold whatever else is already queued into this refetch.
        loop {
            match changes.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => return,
            }
        }

        // SQLite I/O and the context lock block, so keep them off the workers
        let fetch_store = store.clone();
        let fetch_query = query.clone();
        let fetched = tokio::task::spawn_blocking(move || fetch_store.fetch::<T>(&fetch_query)).await;
        match fetched {
            Ok(Ok(values)) => {
                results.send_replace(values);
            }
            Ok(Err(err)) => {
                tracing::warn!("refetch of {} failed, keeping last results: {}", query.kind, err);
            }
            Err(err) => {
                tracing::warn!("refetch task for {} did not complete: {}", query.kind, err);
            }
        }
    }
}

/// A live view of an observable query's results.
///
/// Dropping the subscription (or calling `unsubscribe`) detaches it.
pub struct Subscription<T> {
    receiver: watch::Receiver<Vec<T>>,
}

impl<T: Clone> Subscription<T> {
    /// Results as of the last delivered change
    pub fn current(&self) -> Vec<T> {
        self.receiver.borrow().clone()
    }

    /// True if results were published since the last `next`
    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// Wait for the next published result list.
    ///
    /// Returns `None` once the observable query has been dropped.
    pub async fn next(&mut self) -> Option<Vec<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDescription, AttributeType, EntityDescription, Schema};
    use crate::query::SortDescriptor;
    use crate::record::Record;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, Clone, PartialEq)]
    struct Title(String);

    impl FromRecord for Title {
        fn from_record(record: &Record) -> Option<Self> {
            record.get_str("title").map(|t| Title(t.to_string()))
        }
    }

    fn store() -> DataStore {
        let schema = Schema::new().with_entity(
            EntityDescription::new("Note")
                .with_attribute(AttributeDescription::new("title", AttributeType::String)),
        );
        DataStore::open_in_memory("Notes", schema).unwrap()
    }

    fn add(store: &DataStore, title: &str) -> Record {
        store
            .insert("Note", |n| {
                n.set("title", title);
            })
            .unwrap()
    }

    fn titles(values: &[Title]) -> Vec<&str> {
        values.iter().map(|t| t.0.as_str()).collect()
    }

    fn by_title() -> Query {
        Query::new("Note").sort_by(SortDescriptor::ascending("title"))
    }

    #[tokio::test]
    async fn test_start_publishes_initial_results() {
        let store = store();
        add(&store, "b");
        add(&store, "a");

        let mut observable = store.observe::<Title>(by_title());
        assert_eq!(observable.state(), ObserverState::Uninitialized);
        assert!(observable.results().is_empty());

        observable.start().unwrap();
        assert_eq!(observable.state(), ObserverState::Active);
        assert_eq!(titles(&observable.results()), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_refetches_after_change() {
        let store = store();
        add(&store, "b");

        let mut observable = store.observe::<Title>(by_title());
        observable.start().unwrap();
        let mut subscription = observable.subscribe();
        assert_eq!(titles(&subscription.current()), vec!["b"]);

        add(&store, "a");
        let next = timeout(Duration::from_secs(2), subscription.next())
            .await
            .expect("no update published")
            .unwrap();
        assert_eq!(titles(&next), vec!["a", "b"]);
        assert_eq!(titles(&observable.results()), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_reflects_delete_and_rollback() {
        let store = store();
        let kept = add(&store, "kept");
        store.save().unwrap();

        let mut observable = store.observe::<Title>(by_title());
        observable.start().unwrap();
        let mut subscription = observable.subscribe();

        add(&store, "pending");
        store.rollback().unwrap();
        let mut latest = timeout(Duration::from_secs(2), subscription.next()).await.unwrap().unwrap();
        // Both notifications may land in one refetch or two
        while titles(&latest) != vec!["kept"] {
            latest = timeout(Duration::from_secs(2), subscription.next()).await.unwrap().unwrap();
        }

        store.delete(kept.id.as_ref().unwrap()).unwrap();
        let latest = timeout(Duration::from_secs(2), subscription.next()).await.unwrap().unwrap();
        assert!(latest.is_empty());
    }

    #[tokio::test]
    async fn test_lagging_observer_catches_up_in_one_refetch() {
        use crate::store::CHANGE_CHANNEL_CAPACITY;

        let store = store();
        let mut observable = store.observe::<Title>(Query::new("Note"));
        observable.start().unwrap();
        let mut subscription = observable.subscribe();

        // No await in between, so the refresh task falls behind the channel
        let total = CHANGE_CHANNEL_CAPACITY * 3;
        for i in 0..total {
            add(&store, &format!("note {}", i));
        }

        let latest = timeout(Duration::from_secs(5), subscription.next())
            .await
            .expect("no update published")
            .unwrap();
        assert_eq!(latest.len(), total);
        assert_eq!(observable.results().len(), total);
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let store = store();
        let mut observable = store.observe::<Record>(Query::new("Note"));
        assert!(matches!(observable.start(), Err(Error::NoRuntime)));
        assert_eq!(observable.state(), ObserverState::Uninitialized);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let store = store();
        let mut observable = store.observe::<Title>(Query::new("Note"));
        observable.start().unwrap();
        assert!(matches!(observable.start(), Err(Error::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_start_fails_on_bad_query() {
        let store = store();
        let mut observable = store.observe::<Title>(Query::new("Missing"));
        assert!(matches!(observable.start(), Err(Error::UnknownKind(_))));
        assert_eq!(observable.state(), ObserverState::Uninitialized);
    }

    #[tokio::test]
    async fn test_subscription_ends_when_observable_dropped() {
        let store = store();
        let mut observable = store.observe::<Title>(Query::new("Note"));
        observable.start().unwrap();
        let mut subscription = observable.subscribe();
        assert_eq!(observable.subscriber_count(), 1);

        drop(observable);
        let ended = timeout(Duration::from_secs(2), subscription.next()).await.unwrap();
        assert!(ended.is_none());
    }
}
