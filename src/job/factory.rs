use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::body::JobBody;

/// Looks up a constructable job by name and version.
pub trait JobFactory: Send + Sync {
    fn create(&self, name: &str, version: u32) -> Option<Box<dyn JobBody>>;

    /// Highest registered version of `name`.
    fn latest_version(&self, name: &str) -> Option<u32>;
}

type Constructor = Arc<dyn Fn() -> Box<dyn JobBody> + Send + Sync>;

/// [`JobFactory`] backed by registered constructors.
#[derive(Default)]
pub struct JobCatalog {
    entries: RwLock<BTreeMap<(String, u32), Constructor>>,
}

impl JobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor under the name and version its bodies report.
    /// A later registration of the same pair replaces the earlier one.
    pub fn register<F>(&self, constructor: F)
    where
        F: Fn() -> Box<dyn JobBody> + Send + Sync + 'static,
    {
        let sample = constructor();
        let key = (sample.name().to_string(), sample.version());
        self.entries.write().insert(key, Arc::new(constructor));
    }

    /// `(name, version, summary)` for every registration, sorted.
    pub fn available(&self) -> Vec<(String, u32, String)> {
        self.entries
            .read()
            .iter()
            .map(|((name, version), ctor)| (name.clone(), *version, ctor().summary().to_string()))
            .collect()
    }
}

impl JobFactory for JobCatalog {
    fn create(&self, name: &str, version: u32) -> Option<Box<dyn JobBody>> {
        let ctor = self
            .entries
            .read()
            .get(&(name.to_string(), version))
            .cloned()?;
        Some(ctor())
    }

    fn latest_version(&self, name: &str) -> Option<u32> {
        self.entries
            .read()
            .keys()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .max()
    }
}
