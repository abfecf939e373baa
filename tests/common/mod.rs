#![allow(dead_code)]

use std::sync::Arc;

use jobflow::config::EngineConfig;
use jobflow::data::{DataObjectHandle, DataStore, InMemoryDataStore};
use jobflow::engine::EngineContext;
use jobflow::job::{JobBody, JobCatalog};
use jobflow::jobs;
use jobflow::logging::MemorySink;
use serde_json::json;

pub struct Harness {
    pub engine: Arc<EngineContext>,
    pub store: Arc<InMemoryDataStore>,
    pub sink: Arc<MemorySink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default(), |_| {})
    }

    /// Built-in jobs plus whatever `extra` registers.
    pub fn with_config(config: EngineConfig, extra: impl FnOnce(&JobCatalog)) -> Self {
        let catalog = JobCatalog::new();
        jobs::register_builtins(&catalog);
        extra(&catalog);
        let store = Arc::new(InMemoryDataStore::new());
        let sink = Arc::new(MemorySink::new());
        let engine = EngineContext::with_sink(
            config,
            Arc::new(catalog),
            store.clone(),
            sink.clone(),
        );
        Self {
            engine,
            store,
            sink,
        }
    }

    pub fn with_body<F>(ctor: F) -> Self
    where
        F: Fn() -> Box<dyn JobBody> + Send + Sync + 'static,
    {
        Self::with_config(EngineConfig::default(), |c| c.register(ctor))
    }

    pub fn put(&self, name: &str, payload: serde_json::Value) -> DataObjectHandle {
        let handle = DataObjectHandle::new(name, payload);
        self.store.store(name, handle.clone());
        handle
    }

    /// A collection whose members are named `name_1`, `name_2`, ...
    pub fn put_collection(&self, name: &str, payloads: Vec<serde_json::Value>) -> DataObjectHandle {
        let members = payloads
            .into_iter()
            .enumerate()
            .map(|(i, p)| DataObjectHandle::new(format!("{name}_{}", i + 1), p))
            .collect();
        let handle = DataObjectHandle::collection(name, members);
        self.store.store(name, handle.clone());
        handle
    }
}

pub fn numbers(values: &[f64]) -> serde_json::Value {
    json!(values)
}
