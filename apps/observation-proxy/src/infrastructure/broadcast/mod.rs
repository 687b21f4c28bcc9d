//! Output Broadcast Adapters
//!
//! Implements local sensor outputs using tokio broadcast channels for
//! fan-out to multiple subscribers.
//!
//! # Architecture
//!
//! Each [`OutputPort`] owns one broadcast channel and remembers the latest
//! record it published. Exactly one writer (the owning session or the
//! report collector) publishes into a port; any number of readers may call
//! [`OutputPort::latest`] or [`OutputPort::subscribe`] concurrently.
//!
//! The [`OutputHub`] is the directory of registered outputs. It rejects
//! duplicate names so two publishers can never share an output.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::domain::record::{Record, RecordSchema};

// =============================================================================
// Published Records
// =============================================================================

/// A record as published on an output, stamped with its publication time.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedRecord {
    /// Output the record was published on.
    pub output: String,
    /// Publication time.
    pub time: DateTime<Utc>,
    /// The record itself.
    pub record: Record,
}

// =============================================================================
// Output Port
// =============================================================================

/// A named, independently addressable local output.
#[derive(Debug)]
pub struct OutputPort {
    name: String,
    schema: RecordSchema,
    tx: broadcast::Sender<Arc<PublishedRecord>>,
    latest: RwLock<Option<Arc<PublishedRecord>>>,
    published: AtomicU64,
}

impl OutputPort {
    /// Create a new output with the given broadcast capacity.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: RecordSchema, capacity: usize) -> Self {
        Self {
            name: name.into(),
            schema,
            tx: broadcast::channel(capacity.max(1)).0,
            latest: RwLock::new(None),
            published: AtomicU64::new(0),
        }
    }

    /// Output name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record layout of this output.
    #[must_use]
    pub const fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Publish a record.
    ///
    /// Stores it as the latest record and forwards it to all current
    /// subscribers. Returns the number of subscribers reached.
    pub fn publish(&self, record: Record) -> usize {
        let published = Arc::new(PublishedRecord {
            output: self.name.clone(),
            time: Utc::now(),
            record,
        });

        *self.latest.write() = Some(Arc::clone(&published));
        self.published.fetch_add(1, Ordering::Relaxed);

        // No receivers is not an error: the latest record is still kept.
        self.tx.send(published).unwrap_or(0)
    }

    /// Latest published record and its time, if any.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<PublishedRecord>> {
        self.latest.read().clone()
    }

    /// Subscribe to records published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PublishedRecord>> {
        self.tx.subscribe()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total records published since creation.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// Shared output reference.
pub type SharedOutput = Arc<OutputPort>;

// =============================================================================
// Output Hub
// =============================================================================

/// Error registering an output.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OutputError {
    /// An output with this name is already registered.
    #[error("output '{0}' is already registered")]
    DuplicateName(String),
}

/// Directory of all registered outputs.
///
/// # Example
///
/// ```rust
/// use observation_proxy::domain::record::RecordSchema;
/// use observation_proxy::infrastructure::broadcast::OutputHub;
///
/// let hub = OutputHub::new(16);
/// let output = hub.register("output1", RecordSchema::default()).unwrap();
/// assert!(hub.register("output1", RecordSchema::default()).is_err());
/// assert_eq!(hub.get("output1").unwrap().name(), output.name());
/// ```
#[derive(Debug)]
pub struct OutputHub {
    capacity: usize,
    outputs: RwLock<BTreeMap<String, SharedOutput>>,
}

impl OutputHub {
    /// Create a hub whose outputs use the given broadcast capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            outputs: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create and register a new output.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::DuplicateName`] if the name is taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        schema: RecordSchema,
    ) -> Result<SharedOutput, OutputError> {
        let name = name.into();
        let mut outputs = self.outputs.write();
        if outputs.contains_key(&name) {
            return Err(OutputError::DuplicateName(name));
        }
        let output = Arc::new(OutputPort::new(name.clone(), schema, self.capacity));
        outputs.insert(name, Arc::clone(&output));
        Ok(output)
    }

    /// Remove an output. Returns the removed output, if it existed.
    pub fn unregister(&self, name: &str) -> Option<SharedOutput> {
        self.outputs.write().remove(name)
    }

    /// Look up an output by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<SharedOutput> {
        self.outputs.read().get(name).cloned()
    }

    /// Check whether a name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.outputs.read().contains_key(name)
    }

    /// Registered output names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.outputs.read().keys().cloned().collect()
    }

    /// Statistics about all outputs.
    #[must_use]
    pub fn stats(&self) -> Vec<OutputStats> {
        self.outputs
            .read()
            .values()
            .map(|o| OutputStats {
                name: o.name().to_string(),
                receivers: o.receiver_count(),
                published: o.published_count(),
                latest_time: o.latest().map(|r| r.time),
            })
            .collect()
    }
}

/// Shared hub reference.
pub type SharedOutputHub = Arc<OutputHub>;

/// Statistics about a single output.
#[derive(Debug, Clone, Serialize)]
pub struct OutputStats {
    /// Output name.
    pub name: String,
    /// Active subscribers.
    pub receivers: usize,
    /// Records published so far.
    pub published: u64,
    /// Time of the latest record.
    pub latest_time: Option<DateTime<Utc>>,
}

// =============================================================================
// Tests
// =============================================================================
