//! DataStore - the generic insert/fetch surface over one storage context
//!
//! A `DataStore` owns a single SQLite connection (the shared context) and the
//! schema it was opened with. Writes go into a pending transaction that stays
//! open until [`DataStore::save`] or [`DataStore::rollback`]; fetches run on the
//! same connection, so they see pending changes.
//!
//! Every write publishes a [`ChangeNotification`] on a broadcast channel. The
//! store never waits on subscribers; a slow subscriber lags and coalesces.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use crate::convert::{FetchOutcome, FromRecord};
use crate::model::{AttributeType, EntityDescription, Schema};
use crate::observe::ObservableQuery;
use crate::query::Query;
use crate::record::Record;
use crate::storage::{SqliteBackend, StoreDescription, StoreStats};
use crate::uri::ObjectId;
use crate::value::Value;
use crate::{Error, Result};

/// Buffered notifications per subscriber before it starts lagging
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Events reported to the handler passed to [`DataStore::initialize`]
#[derive(Debug)]
pub enum StoreEvent {
    /// The backend could not be opened; the store stays unloaded
    Failure(Error),
}

/// Callback receiving initialization events
pub type EventHandler = Box<dyn Fn(StoreEvent) + Send + Sync>;

/// A change to the store's context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotification {
    Inserted(ObjectId),
    Updated(ObjectId),
    Deleted(ObjectId),
    /// Pending changes were committed
    Saved,
    /// Pending changes were discarded
    RolledBack,
}

struct Shared {
    name: String,
    schema: Schema,
    description: StoreDescription,
    /// `None` when the backend failed to open
    context: Mutex<Option<SqliteBackend>>,
    changes: broadcast::Sender<ChangeNotification>,
}

/// Handle to a store. Cloning is cheap; clones share the same context.
#[derive(Clone)]
pub struct DataStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("name", &self.shared.name)
            .field("description", &self.shared.description)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl DataStore {
    /// Open a store, reporting failure through `event_handler`.
    ///
    /// On failure the handler receives exactly one `StoreEvent::Failure` and
    /// the returned store is unloaded: inserts return `None` and every other
    /// operation fails with `Error::StoreNotLoaded`.
    pub fn initialize(
        name: impl Into<String>,
        schema: Schema,
        description: StoreDescription,
        event_handler: Option<EventHandler>,
    ) -> Self {
        let name = name.into();
        let context = match Self::load(&schema, &description) {
            Ok(backend) => Some(backend),
            Err(err) => {
                tracing::error!("Failed to load store '{}': {}", name, err);
                if let Some(handler) = &event_handler {
                    handler(StoreEvent::Failure(err));
                }
                None
            }
        };
        Self::from_parts(name, schema, description, context)
    }

    /// Open a store, returning the failure instead of dispatching it
    pub fn open(name: impl Into<String>, schema: Schema, description: StoreDescription) -> Result<Self> {
        let backend = Self::load(&schema, &description)?;
        Ok(Self::from_parts(name.into(), schema, description, Some(backend)))
    }

    /// Open a private in-memory store
    pub fn open_in_memory(name: impl Into<String>, schema: Schema) -> Result<Self> {
        Self::open(name, schema, StoreDescription::in_memory())
    }

    fn load(schema: &Schema, description: &StoreDescription) -> Result<SqliteBackend> {
        schema.validate()?;
        let backend = SqliteBackend::open_description(description)?;
        backend.initialize_schema(schema)?;
        tracing::info!(
            "Loaded {} store with {} entities",
            description.store_type,
            schema.entities.len()
        );
        Ok(backend)
    }

    fn from_parts(
        name: String,
        schema: Schema,
        description: StoreDescription,
        context: Option<SqliteBackend>,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                name,
                schema,
                description,
                context: Mutex::new(context),
                changes,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn schema(&self) -> &Schema {
        &self.shared.schema
    }

    pub fn description(&self) -> &StoreDescription {
        &self.shared.description
    }

    pub fn entity_names(&self) -> Vec<&str> {
        self.shared.schema.entity_names()
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<SqliteBackend>> {
        match self.shared.context.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("store context lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn entity(&self, kind: &str) -> Result<&EntityDescription> {
        self.shared
            .schema
            .entity(kind)
            .ok_or_else(|| Error::UnknownKind(kind.to_string()))
    }

    /// Run `f` against the loaded backend while holding the context lock
    fn with_backend<T>(&self, f: impl FnOnce(&SqliteBackend) -> Result<T>) -> Result<T> {
        let guard = self.lock();
        let backend = guard.as_ref().ok_or(Error::StoreNotLoaded)?;
        f(backend)
    }

    fn notify(&self, change: ChangeNotification) {
        tracing::debug!("change: {:?}", change);
        // No receivers is fine
        let _ = self.shared.changes.send(change);
    }

    /// Subscribe to raw change notifications
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeNotification> {
        self.shared.changes.subscribe()
    }

    // ========== Writes ==========

    /// Insert a new record of `kind`, populated by `populate`.
    ///
    /// Returns `None` when `kind` is not in the schema or the record is
    /// rejected; the reason is logged. See [`DataStore::try_insert`].
    pub fn insert<F>(&self, kind: &str, populate: F) -> Option<Record>
    where
        F: FnOnce(&mut Record),
    {
        match self.try_insert(kind, populate) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!("Insert of {} rejected: {}", kind, err);
                None
            }
        }
    }

    /// Insert a new record of `kind` into the pending context.
    ///
    /// The record is visible to fetches immediately and becomes durable on
    /// [`DataStore::save`].
    pub fn try_insert<F>(&self, kind: &str, populate: F) -> Result<Record>
    where
        F: FnOnce(&mut Record),
    {
        let entity = self.entity(kind)?;
        let mut record = Record::new(kind);
        populate(&mut record);
        normalize(entity, &mut record)?;

        let pk = self.with_backend(|backend| {
            backend.begin_pending()?;
            backend.insert(entity, &record)
        })?;

        let id = ObjectId::new(kind, pk);
        record.id = Some(id.clone());
        self.notify(ChangeNotification::Inserted(id));
        Ok(record)
    }

    /// Apply `populate` to an existing record and write it back
    pub fn update<F>(&self, id: &ObjectId, populate: F) -> Result<Record>
    where
        F: FnOnce(&mut Record),
    {
        let entity = self.entity(&id.kind)?;
        let mut record = self
            .with_backend(|backend| backend.get(entity, id.pk))?
            .ok_or_else(|| Error::ObjectNotFound(id.to_uri_string()))?;

        // populate runs outside the lock so it may read from the store
        populate(&mut record);
        record.id = Some(id.clone());
        record.kind = id.kind.clone();
        normalize(entity, &mut record)?;

        self.with_backend(|backend| {
            backend.begin_pending()?;
            match backend.update(entity, id.pk, &record)? {
                0 => Err(Error::ObjectNotFound(id.to_uri_string())),
                _ => Ok(()),
            }
        })?;

        self.notify(ChangeNotification::Updated(id.clone()));
        Ok(record)
    }

    /// Delete a record from the pending context
    pub fn delete(&self, id: &ObjectId) -> Result<()> {
        let entity = self.entity(&id.kind)?;
        self.with_backend(|backend| {
            backend.begin_pending()?;
            match backend.delete(entity, id.pk)? {
                0 => Err(Error::ObjectNotFound(id.to_uri_string())),
                _ => Ok(()),
            }
        })?;

        self.notify(ChangeNotification::Deleted(id.clone()));
        Ok(())
    }

    /// True while the context holds unsaved changes
    pub fn has_changes(&self) -> bool {
        self.lock().as_ref().is_some_and(SqliteBackend::has_pending)
    }

    /// Commit pending changes. A no-op when there are none.
    pub fn save(&self) -> Result<()> {
        let committed = self.with_backend(|backend| {
            if !backend.has_pending() {
                return Ok(false);
            }
            backend.commit()?;
            Ok(true)
        })?;

        if committed {
            tracing::info!("Saved store '{}'", self.shared.name);
            self.notify(ChangeNotification::Saved);
        }
        Ok(())
    }

    /// Discard pending changes. A no-op when there are none.
    pub fn rollback(&self) -> Result<()> {
        let rolled_back = self.with_backend(|backend| {
            if !backend.has_pending() {
                return Ok(false);
            }
            backend.rollback()?;
            Ok(true)
        })?;

        if rolled_back {
            tracing::info!("Rolled back store '{}'", self.shared.name);
            self.notify(ChangeNotification::RolledBack);
        }
        Ok(())
    }

    // ========== Reads ==========

    /// Run `query` and return the raw records
    pub fn fetch_records(&self, query: &Query) -> Result<Vec<Record>> {
        let entity = self.entity(&query.kind)?;
        self.with_backend(|backend| backend.select(entity, query))
    }

    /// Run `query` and convert every record with `T::from_record`.
    ///
    /// Records that fail conversion are left out; order is preserved.
    pub fn fetch<T: FromRecord>(&self, query: &Query) -> Result<Vec<T>> {
        self.fetch_report(query).map(|outcome| outcome.values)
    }

    /// Like [`DataStore::fetch`] with a conversion closure
    pub fn fetch_with<T, F>(&self, query: &Query, convert: F) -> Result<Vec<T>>
    where
        F: Fn(&Record) -> Option<T>,
    {
        let records = self.fetch_records(query)?;
        let outcome = FetchOutcome::convert(&records, convert);
        log_dropped(query, &outcome);
        Ok(outcome.values)
    }

    /// Like [`DataStore::fetch`], also reporting how many records were dropped
    pub fn fetch_report<T: FromRecord>(&self, query: &Query) -> Result<FetchOutcome<T>> {
        let records = self.fetch_records(query)?;
        let outcome = FetchOutcome::convert(&records, T::from_record);
        log_dropped(query, &outcome);
        Ok(outcome)
    }

    /// Count records matching the query's predicate. Paging is ignored.
    pub fn count(&self, query: &Query) -> Result<usize> {
        let entity = self.entity(&query.kind)?;
        self.with_backend(|backend| backend.count(entity, &query.predicate))
    }

    /// Look up one record by identity
    pub fn get(&self, id: &ObjectId) -> Result<Option<Record>> {
        let entity = self.entity(&id.kind)?;
        self.with_backend(|backend| backend.get(entity, id.pk))
    }

    /// Observable query over this store. Call `start` on the result.
    pub fn observe<T>(&self, query: Query) -> ObservableQuery<T>
    where
        T: FromRecord + Clone + Send + Sync + 'static,
    {
        ObservableQuery::new(self.clone(), query)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.with_backend(|backend| backend.stats(&self.shared.schema))
    }
}

fn log_dropped<T>(query: &Query, outcome: &FetchOutcome<T>) {
    if !outcome.is_complete() {
        tracing::debug!(
            "{} {} record(s) failed conversion and were skipped",
            outcome.dropped,
            query.kind
        );
    }
}

/// Check a record against its entity and fill in defaults.
///
/// Integers bound for double attributes, set or defaulted, are widened so the
/// returned handle matches what a later fetch reads back.
fn normalize(entity: &EntityDescription, record: &mut Record) -> Result<()> {
    for (name, value) in &record.values {
        let attribute = entity.attribute(name).ok_or_else(|| Error::UnknownAttribute {
            kind: entity.name.clone(),
            attribute: name.clone(),
        })?;
        if !value.conforms_to(attribute.attribute_type) {
            return Err(Error::TypeMismatch {
                attribute: name.clone(),
                expected: attribute.attribute_type.to_string(),
                found: value.type_name(),
            });
        }
    }

    record.values.retain(|_, v| !v.is_null());

    for attribute in &entity.attributes {
        if record.values.contains_key(&attribute.name) {
            continue;
        }
        if let Some(default) = &attribute.default {
            record.values.insert(attribute.name.clone(), default.clone());
        } else if !attribute.optional {
            return Err(Error::MissingAttribute {
                kind: entity.name.clone(),
                attribute: attribute.name.clone(),
            });
        }
    }

    for attribute in entity.attributes.iter().filter(|a| a.attribute_type == AttributeType::Double) {
        if let Some(value) = record.values.get_mut(&attribute.name) {
            if let Value::Integer(i) = *value {
                *value = Value::Double(i as f64);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttributeDescription;
    use crate::query::{Predicate, SortDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TEST_ENTITY: &str = "TestEntity";

    fn test_schema() -> Schema {
        Schema::new().with_entity(
            EntityDescription::new(TEST_ENTITY)
                .with_attribute(AttributeDescription::new("name", AttributeType::String))
                .with_attribute(AttributeDescription::new("rank", AttributeType::Integer).with_default(0))
                .with_attribute(AttributeDescription::new("weight", AttributeType::Double)),
        )
    }

    fn seeded_store() -> DataStore {
        let store = DataStore::open_in_memory("Model", test_schema()).unwrap();
        for number in 0..10 {
            store
                .insert(TEST_ENTITY, |entity| {
                    entity.set("name", format!("Name{}", number));
                })
                .unwrap();
        }
        store
    }

    #[derive(Debug, Clone, PartialEq)]
    struct TestEntityValue {
        name: String,
    }

    impl FromRecord for TestEntityValue {
        fn from_record(record: &Record) -> Option<Self> {
            Some(Self {
                name: record.get_str("name")?.to_string(),
            })
        }
    }

    #[test]
    fn test_simple_insert() {
        let store = seeded_store();
        let entity = store
            .insert(TEST_ENTITY, |entity| {
                entity.set("name", "New Name");
            })
            .unwrap();

        assert_eq!(entity.get_str("name"), Some("New Name"));
        assert_eq!(entity.get_i64("rank"), Some(0)); // default applied
        let id = entity.id.clone().unwrap();
        assert_eq!(id.kind, TEST_ENTITY);
        assert_eq!(store.get(&id).unwrap(), Some(entity));
    }

    #[test]
    fn test_fetch_sorted_by_name() {
        let store = seeded_store();
        let query = Query::new(TEST_ENTITY)
            .filter(Predicate::True)
            .sort_by(SortDescriptor::ascending("name"));

        let result: Vec<TestEntityValue> = store.fetch(&query).unwrap();
        assert_eq!(result.len(), 10);
        for (offset, value) in result.iter().enumerate() {
            assert_eq!(value.name, format!("Name{}", offset));
        }
    }

    #[test]
    fn test_fetch_with_predicate_returns_exact_matches() {
        let store = seeded_store();
        for number in 0..4 {
            store
                .insert(TEST_ENTITY, |entity| {
                    entity.set("name", format!("Other{}", number)).set("rank", 10 - number);
                })
                .unwrap();
        }

        let query = Query::new(TEST_ENTITY)
            .filter(Predicate::gt("rank", 0))
            .sort_by(SortDescriptor::ascending("rank"));
        let names: Vec<String> = store
            .fetch::<TestEntityValue>(&query)
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["Other3", "Other2", "Other1", "Other0"]);
        assert_eq!(store.count(&query).unwrap(), 4);
    }

    #[test]
    fn test_fetch_empty_store() {
        let store = DataStore::open_in_memory("Model", test_schema()).unwrap();
        let result: Vec<TestEntityValue> = store.fetch(&Query::new(TEST_ENTITY)).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_failed_conversions_are_skipped() {
        let store = seeded_store();
        // No name: TestEntityValue cannot be built from these
        store.insert(TEST_ENTITY, |_| {}).unwrap();
        store.insert(TEST_ENTITY, |e| {
            e.set("rank", 3);
        }).unwrap();

        let query = Query::new(TEST_ENTITY).sort_by(SortDescriptor::ascending("name"));
        let result: Vec<TestEntityValue> = store.fetch(&query).unwrap();
        assert_eq!(result.len(), 10);
        assert_eq!(result[0].name, "Name0");
        assert_eq!(result[9].name, "Name9");

        let report = store.fetch_report::<TestEntityValue>(&query).unwrap();
        assert_eq!(report.dropped, 2);
        assert_eq!(report.values, result);
    }

    #[test]
    fn test_fetch_with_closure() {
        let store = seeded_store();
        let query = Query::new(TEST_ENTITY)
            .filter(Predicate::like("name", "Name%"))
            .sort_by(SortDescriptor::descending("name"))
            .limit(3);
        let names = store
            .fetch_with(&query, |r| r.get_str("name").map(str::to_string))
            .unwrap();
        assert_eq!(names, vec!["Name9", "Name8", "Name7"]);
    }

    #[test]
    fn test_unknown_kind() {
        let store = seeded_store();
        assert!(store.insert("Missing", |_| {}).is_none());
        assert!(matches!(
            store.fetch::<Record>(&Query::new("Missing")),
            Err(Error::UnknownKind(_))
        ));
    }

    #[test]
    fn test_malformed_query_fails() {
        let store = seeded_store();
        let query = Query::new(TEST_ENTITY).filter(Predicate::eq("color", "red"));
        assert!(matches!(
            store.fetch::<Record>(&query),
            Err(Error::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_insert_validation() {
        let store = seeded_store();
        let err = store
            .try_insert(TEST_ENTITY, |e| {
                e.set("name", 5);
            })
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));

        let err = store
            .try_insert(TEST_ENTITY, |e| {
                e.set("color", "red");
            })
            .unwrap_err();
        assert!(matches!(err, Error::UnknownAttribute { .. }));

        let record = store
            .try_insert(TEST_ENTITY, |e| {
                e.set("weight", 2);
            })
            .unwrap();
        assert_eq!(record.get("weight"), Some(&Value::Double(2.0)));
    }

    #[test]
    fn test_required_attribute() {
        let schema = Schema::new().with_entity(
            EntityDescription::new("Note")
                .with_attribute(AttributeDescription::new("title", AttributeType::String).required()),
        );
        let store = DataStore::open_in_memory("Notes", schema).unwrap();
        assert!(matches!(
            store.try_insert("Note", |_| {}),
            Err(Error::MissingAttribute { .. })
        ));
        assert!(store.insert("Note", |n| {
            n.set("title", "ok");
        }).is_some());
    }

    #[test]
    fn test_integer_default_for_double_is_widened() {
        let schema = Schema::new().with_entity(
            EntityDescription::new("Measure")
                .with_attribute(AttributeDescription::new("weight", AttributeType::Double).with_default(1)),
        );
        let store = DataStore::open_in_memory("Measures", schema).unwrap();

        let inserted = store.insert("Measure", |_| {}).unwrap();
        assert_eq!(inserted.get("weight"), Some(&Value::Double(1.0)));

        let fetched = store.get(inserted.id.as_ref().unwrap()).unwrap().unwrap();
        assert_eq!(inserted, fetched);
    }

    #[test]
    fn test_update_and_delete() {
        let store = seeded_store();
        let record = store
            .insert(TEST_ENTITY, |e| {
                e.set("name", "Temp");
            })
            .unwrap();
        let id = record.id.unwrap();

        let updated = store
            .update(&id, |e| {
                e.set("rank", 7);
            })
            .unwrap();
        assert_eq!(updated.get_str("name"), Some("Temp"));
        assert_eq!(updated.get_i64("rank"), Some(7));

        store.delete(&id).unwrap();
        assert_eq!(store.get(&id).unwrap(), None);
        assert!(matches!(store.delete(&id), Err(Error::ObjectNotFound(_))));
        assert!(matches!(store.update(&id, |_| {}), Err(Error::ObjectNotFound(_))));
    }

    #[test]
    fn test_pending_changes_and_rollback() {
        let store = DataStore::open_in_memory("Model", test_schema()).unwrap();
        assert!(!store.has_changes());

        store.insert(TEST_ENTITY, |e| {
            e.set("name", "pending");
        });
        assert!(store.has_changes());
        assert_eq!(store.count(&Query::new(TEST_ENTITY)).unwrap(), 1);

        store.rollback().unwrap();
        assert!(!store.has_changes());
        assert_eq!(store.count(&Query::new(TEST_ENTITY)).unwrap(), 0);
    }

    #[test]
    fn test_save_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.db");

        {
            let store = DataStore::open("Model", test_schema(), StoreDescription::sqlite(&path)).unwrap();
            store.insert(TEST_ENTITY, |e| {
                e.set("name", "kept");
            });
            store.save().unwrap();
            store.insert(TEST_ENTITY, |e| {
                e.set("name", "lost");
            });
            // dropped without saving
        }

        let store = DataStore::open("Model", test_schema(), StoreDescription::sqlite(&path)).unwrap();
        let names = store
            .fetch_with(&Query::new(TEST_ENTITY), |r| r.get_str("name").map(str::to_string))
            .unwrap();
        assert_eq!(names, vec!["kept"]);
    }

    #[test]
    fn test_initialize_failure_invokes_handler_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let handler: EventHandler = Box::new(move |event| {
            let StoreEvent::Failure(_) = event;
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let dir = tempfile::tempdir().unwrap();
        // SQLite does not create missing parent directories
        let store = DataStore::initialize(
            "Broken",
            test_schema(),
            StoreDescription::sqlite(dir.path().join("missing").join("model.db")),
            Some(handler),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!store.is_loaded());
        assert!(store.insert(TEST_ENTITY, |_| {}).is_none());
        assert!(matches!(
            store.fetch::<Record>(&Query::new(TEST_ENTITY)),
            Err(Error::StoreNotLoaded)
        ));
    }

    #[test]
    fn test_initialize_with_invalid_schema() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let store = DataStore::initialize(
            "Empty",
            Schema::new(),
            StoreDescription::in_memory(),
            Some(Box::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!store.is_loaded());
    }

    #[test]
    fn test_change_notifications() {
        let store = DataStore::open_in_memory("Model", test_schema()).unwrap();
        let mut changes = store.subscribe_changes();

        let record = store.insert(TEST_ENTITY, |_| {}).unwrap();
        store.save().unwrap();
        store.save().unwrap(); // nothing pending, no notification

        let id = record.id.unwrap();
        assert_eq!(changes.try_recv().unwrap(), ChangeNotification::Inserted(id));
        assert_eq!(changes.try_recv().unwrap(), ChangeNotification::Saved);
        assert!(changes.try_recv().is_err());
    }
}
