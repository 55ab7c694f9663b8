use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
    #[error("person id space exhausted")]
    IdSpaceExhausted,
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(transparent)]
pub struct PersonId(pub u64);

impl PersonId {
    /// The following id, or `None` at `u64::MAX`.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl Display for PersonId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PersonId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// One person record.
///
/// Values handed out by [`PersonStore`] are copies; changing them never reaches
/// the store. `id` defaults to `0` when absent from JSON, which is how
/// create/update payloads are usually written since the store ignores it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct Person {
    #[serde(default)]
    pub id: PersonId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub sex: String,
    pub ip_address: String,
    pub job_title: String,
    pub age: i32,
}

impl Person {
    #[must_use]
    pub fn with_id(mut self, id: PersonId) -> Self {
        self.id = id;
        self
    }
}

#[derive(Debug, Default)]
struct StoreState {
    initialized: bool,
    records: BTreeMap<PersonId, Person>,
    next_id: Option<PersonId>,
}

impl StoreState {
    fn ensure_initialized(&self, operation: &str) -> Result<(), StoreError> {
        if self.initialized {
            return Ok(());
        }
        tracing::warn!(operation, "rejected mutation on uninitialized store");
        Err(StoreError::Lifecycle(format!("{operation} called before initialize")))
    }
}

/// Shared in-memory person store.
///
/// All state sits behind one reader/writer lock: reads share it, and
/// `initialize`, `create`, `update` and `delete` hold it exclusively for their
/// whole duration. Reads return records in ascending id order, which is also
/// creation order for records added through [`PersonStore::create`].
///
/// Lifecycle: a store built with [`PersonStore::new`] reads as empty and
/// rejects mutations with [`StoreError::Lifecycle`] until
/// [`PersonStore::initialize`] runs. A second `initialize` is also rejected.
#[derive(Debug, Default)]
pub struct PersonStore {
    state: RwLock<StoreState>,
}

impl PersonStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and seed a store in one step.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidArgument`] when two records share an id.
    pub fn with_records(records: Vec<Person>) -> Result<Self, StoreError> {
        let store = Self::new();
        store.initialize(records)?;
        Ok(store)
    }

    /// Seed the store with the loader's records, keeping their ids.
    ///
    /// The allocator starts at one past the highest loaded id, or at `1` for an
    /// empty dataset.
    ///
    /// # Errors
    /// Returns [`StoreError::Lifecycle`] if the store was already initialized and
    /// [`StoreError::InvalidArgument`] if two records share an id. Neither
    /// failure changes state.
    pub fn initialize(&self, records: Vec<Person>) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.initialized {
            tracing::warn!("rejected second initialize");
            return Err(StoreError::Lifecycle("store is already initialized".to_string()));
        }

        let mut seeded = BTreeMap::new();
        for record in records {
            let id = record.id;
            if seeded.insert(id, record).is_some() {
                return Err(StoreError::InvalidArgument(format!(
                    "duplicate person id {id} in initial dataset"
                )));
            }
        }

        let next_id = match seeded.keys().next_back() {
            Some(max) => max.next(),
            None => Some(PersonId(1)),
        };
        tracing::info!(
            records = seeded.len(),
            next_id = next_id.map(|id| id.0),
            "person store initialized"
        );

        state.records = seeded;
        state.next_id = next_id;
        state.initialized = true;
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    /// Id the next `create` will assign, `None` once the id space is used up.
    #[must_use]
    pub fn next_id(&self) -> Option<PersonId> {
        self.state.read().next_id
    }

    #[must_use]
    pub fn get_all(&self) -> Vec<Person> {
        self.state.read().records.values().cloned().collect()
    }

    #[must_use]
    pub fn get_by_id(&self, id: PersonId) -> Option<Person> {
        self.state.read().records.get(&id).cloned()
    }

    /// Store a new record under a freshly allocated id.
    ///
    /// Any id carried by `data` is ignored.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidArgument`] when `data` is `None` and
    /// [`StoreError::Lifecycle`] before initialization. Returns
    /// [`StoreError::IdSpaceExhausted`] once `u64::MAX` has been handed out or
    /// loaded; the store is left unchanged.
    pub fn create(&self, data: Option<Person>) -> Result<Person, StoreError> {
        let data = data.ok_or_else(|| {
            StoreError::InvalidArgument("person data MUST be provided for create".to_string())
        })?;

        let mut state = self.state.write();
        state.ensure_initialized("create")?;

        let Some(id) = state.next_id else {
            tracing::warn!("rejected create: id space exhausted");
            return Err(StoreError::IdSpaceExhausted);
        };
        let record = data.with_id(id);
        state.records.insert(id, record.clone());
        state.next_id = id.next();
        tracing::debug!(id = id.0, "person created");
        Ok(record)
    }

    /// Replace every field of an existing record except its id.
    ///
    /// Returns `Ok(false)` when no record has `id`.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidArgument`] when `data` is `None` (checked
    /// first) and [`StoreError::Lifecycle`] before initialization.
    pub fn update(&self, id: PersonId, data: Option<Person>) -> Result<bool, StoreError> {
        let data = data.ok_or_else(|| {
            StoreError::InvalidArgument("person data MUST be provided for update".to_string())
        })?;

        let mut state = self.state.write();
        state.ensure_initialized("update")?;

        let Some(existing) = state.records.get_mut(&id) else {
            tracing::debug!(id = id.0, "update target not found");
            return Ok(false);
        };
        *existing = data.with_id(id);
        tracing::debug!(id = id.0, "person updated");
        Ok(true)
    }

    /// Remove a record. Its id is never handed out again.
    ///
    /// Returns `Ok(false)` when no record has `id`.
    ///
    /// # Errors
    /// Returns [`StoreError::Lifecycle`] before initialization.
    pub fn delete(&self, id: PersonId) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        state.ensure_initialized("delete")?;

        let removed = state.records.remove(&id).is_some();
        tracing::debug!(id = id.0, removed, "person delete");
        Ok(removed)
    }

    /// Case-insensitive substring search on `job_title`.
    ///
    /// A missing or blank query matches nothing.
    #[must_use]
    pub fn search_by_job_title(&self, query: Option<&str>) -> Vec<Person> {
        let Some(needle) = non_blank_lowercase(query) else {
            return Vec::new();
        };
        self.select(|person| person.job_title.to_lowercase().contains(&needle))
    }

    /// Case-insensitive exact match on `sex`.
    ///
    /// A missing or blank filter matches nothing.
    #[must_use]
    pub fn filter_by_sex(&self, filter: Option<&str>) -> Vec<Person> {
        let Some(wanted) = non_blank_lowercase(filter) else {
            return Vec::new();
        };
        self.select(|person| person.sex.to_lowercase() == wanted)
    }

    #[must_use]
    pub fn filter_by_age(&self, age: i32) -> Vec<Person> {
        self.select(|person| person.age == age)
    }

    fn select<F>(&self, predicate: F) -> Vec<Person>
    where
        F: Fn(&Person) -> bool,
    {
        self.state.read().records.values().filter(|person| predicate(*person)).cloned().collect()
    }
}

fn non_blank_lowercase(value: Option<&str>) -> Option<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Some(value.to_lowercase()),
        _ => None,
    }
}
