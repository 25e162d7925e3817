use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

use crate::config::Config;
use crate::decode::{self, FormatRegistry};
use crate::locator::Locator;
use crate::reference::MapStore;

/// Process-wide state, built once at startup and shared read-only by every
/// request.
pub struct AppStateInner {
    pub config: Config,
    pub store: MapStore,
    pub formats: &'static FormatRegistry,
    /// Fixed-size pool for hash comparisons.
    pub compare_pool: ThreadPool,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn new(config: Config) -> Result<Self, ThreadPoolBuildError> {
        let compare_pool = ThreadPoolBuilder::new()
            .num_threads(config.compare_workers)
            .thread_name(|i| format!("compare-{i}"))
            .build()?;

        Ok(Self {
            store: MapStore::new(config.data_dir.clone()),
            formats: decode::register_formats(),
            compare_pool,
            config,
        })
    }

    pub fn locator(&self) -> Locator<'_> {
        Locator {
            formats: self.formats,
            store: &self.store,
            pool: &self.compare_pool,
        }
    }
}
