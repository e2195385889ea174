//! Database connectors
//!
//! Every query node owns one [`DbInterface`]. Concrete drivers live outside
//! this crate and are plugged in through a [`ConnectorRegistry`], which maps a
//! connector type name to a factory. [`MemoryInterface`] is an in-process
//! driver for fixtures and tests.

use async_trait::async_trait;
use querygraph_core::{Error, Frame, Result};
use querygraph_template::{Dialect, RenderedQuery};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// What an insert hands to a driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InsertPayload {
    /// A rendered insert statement
    Query(RenderedQuery),
    /// Rows to write
    Records(Frame),
}

/// Contract every database driver implements
#[async_trait]
pub trait DbInterface: Send + Sync {
    /// Dialect templates for this driver are rendered in
    fn dialect(&self) -> Dialect;

    /// Run a query, optionally keeping only the named fields
    async fn execute_query(&self, query: &RenderedQuery, fields: Option<&[String]>) -> Result<Frame>;

    /// Write rows or run an insert statement
    async fn execute_insert(&self, payload: &InsertPayload) -> Result<()>;
}

/// A named connector declaration: `name <- DbType(key='value', ...)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    pub name: String,
    pub db_type: String,
    pub options: BTreeMap<String, String>,
}

impl ConnectorSpec {
    pub fn new(name: impl Into<String>, db_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_type: db_type.into(),
            options: BTreeMap::new(),
        }
    }

    /// Builder: add a connection option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Fetch an option the driver cannot work without
    pub fn require(&self, key: &str) -> Result<&str> {
        self.option(key).ok_or_else(|| {
            Error::Configuration(format!(
                "connector '{}' ({}) is missing option '{}'",
                self.name, self.db_type, key
            ))
        })
    }
}

/// Builds a fresh driver instance from a connector declaration
pub type ConnectorFactory = Arc<dyn Fn(&ConnectorSpec) -> Result<Box<dyn DbInterface>> + Send + Sync>;

/// Connector type names mapped to driver factories
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; type names are case-insensitive
    pub fn register<F>(&mut self, db_type: &str, factory: F)
    where
        F: Fn(&ConnectorSpec) -> Result<Box<dyn DbInterface>> + Send + Sync + 'static,
    {
        self.factories
            .insert(db_type.to_ascii_lowercase(), Arc::new(factory));
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<F>(mut self, db_type: &str, factory: F) -> Self
    where
        F: Fn(&ConnectorSpec) -> Result<Box<dyn DbInterface>> + Send + Sync + 'static,
    {
        self.register(db_type, factory);
        self
    }

    pub fn contains(&self, db_type: &str) -> bool {
        self.factories.contains_key(&db_type.to_ascii_lowercase())
    }

    /// Registered type names, sorted
    pub fn db_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Create a new driver instance for a connector
    pub fn connect(&self, spec: &ConnectorSpec) -> Result<Box<dyn DbInterface>> {
        let factory = self
            .factories
            .get(&spec.db_type.to_ascii_lowercase())
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "unknown database type '{}' for connector '{}'",
                    spec.db_type, spec.name
                ))
            })?;
        debug!("Creating {} interface for connector {}", spec.db_type, spec.name);
        factory(spec)
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("db_types", &self.db_types())
            .finish()
    }
}

/// Answers a rendered query with a frame
pub type Responder = Arc<dyn Fn(&RenderedQuery) -> Result<Frame> + Send + Sync>;

/// Shared view of everything a [`MemoryInterface`] received
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    queries: Arc<Mutex<Vec<RenderedQuery>>>,
    inserts: Arc<Mutex<Vec<InsertPayload>>>,
}

impl MemoryRecorder {
    /// Every query received, in arrival order
    pub fn queries(&self) -> Vec<RenderedQuery> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    /// Every insert received, in arrival order
    pub fn inserts(&self) -> Vec<InsertPayload> {
        self.inserts.lock().map(|i| i.clone()).unwrap_or_default()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().map(|q| q.len()).unwrap_or(0)
    }
}

/// In-process driver answering from a closure or a fixed frame
#[derive(Clone)]
pub struct MemoryInterface {
    dialect: Dialect,
    responder: Responder,
    latency: Option<Duration>,
    recorder: MemoryRecorder,
}

impl MemoryInterface {
    /// Answer every query with the responder's frame
    pub fn new<F>(dialect: Dialect, responder: F) -> Self
    where
        F: Fn(&RenderedQuery) -> Result<Frame> + Send + Sync + 'static,
    {
        Self {
            dialect,
            responder: Arc::new(responder),
            latency: None,
            recorder: MemoryRecorder::default(),
        }
    }

    /// Answer every query with the same frame
    pub fn fixed(dialect: Dialect, frame: Frame) -> Self {
        Self::new(dialect, move |_| Ok(frame.clone()))
    }

    /// Fail every query with an execution error
    pub fn failing(dialect: Dialect, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(dialect, move |_| Err(Error::Execution(message.clone())))
    }

    /// Builder: delay every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// A handle that keeps observing calls after the interface is boxed
    pub fn recorder(&self) -> MemoryRecorder {
        self.recorder.clone()
    }

    /// Box for use as a node's interface
    pub fn boxed(self) -> Box<dyn DbInterface> {
        Box::new(self)
    }

    async fn wait(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl fmt::Debug for MemoryInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryInterface")
            .field("dialect", &self.dialect)
            .field("latency", &self.latency)
            .finish()
    }
}

#[async_trait]
impl DbInterface for MemoryInterface {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute_query(&self, query: &RenderedQuery, fields: Option<&[String]>) -> Result<Frame> {
        self.wait().await;
        if let Ok(mut queries) = self.recorder.queries.lock() {
            queries.push(query.clone());
        }
        let frame = (self.responder)(query)?;
        match fields {
            Some(fields) => frame.select(fields).map_err(|e| Error::Execution(e.to_string())),
            None => Ok(frame),
        }
    }

    async fn execute_insert(&self, payload: &InsertPayload) -> Result<()> {
        self.wait().await;
        let mut inserts = self
            .recorder
            .inserts
            .lock()
            .map_err(|_| Error::Execution("insert log is poisoned".to_string()))?;
        inserts.push(payload.clone());
        Ok(())
    }
}
