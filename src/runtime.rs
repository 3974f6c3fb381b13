use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::info;

use crate::config::{ConfigMap, GraphConfig};
use crate::error::Result;
use crate::io::{PageCache, PAGE_SIZE};

static ACTIVE: Mutex<Weak<Runtime>> = Mutex::new(Weak::new());

/// Process-wide I/O environment: resolved engine configuration plus the
/// shared page cache.
///
/// [`Runtime::init`] is reference-counted through `Arc`: while any handle is
/// alive, nested initializations return the same runtime, so library layers
/// that each call `init` compose. The environment is torn down when the last
/// handle drops.
pub struct Runtime {
    config: GraphConfig,
    cache: Arc<PageCache>,
}

impl Runtime {
    /// Creates a private environment from an explicit configuration,
    /// bypassing the process-global registry. Useful when embedding several
    /// independently configured engines in one process.
    pub fn new(config: GraphConfig) -> Arc<Runtime> {
        let cache = PageCache::new(config.cache_size / PAGE_SIZE);
        Arc::new(Runtime { config, cache })
    }

    pub fn init(map: &ConfigMap) -> Result<Arc<Runtime>> {
        let mut active = ACTIVE.lock();
        if let Some(existing) = active.upgrade() {
            return Ok(existing);
        }
        let config = GraphConfig::from_map(map)?;
        let cache = PageCache::new(config.cache_size / PAGE_SIZE);
        info!(
            num_threads = config.num_threads,
            num_nodes = config.num_nodes,
            cache_pages = cache.capacity(),
            "runtime initialized"
        );
        let runtime = Arc::new(Runtime { config, cache });
        *active = Arc::downgrade(&runtime);
        Ok(runtime)
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_init_shares_the_runtime() {
        let map = ConfigMap::new();
        let first = Runtime::init(&map).unwrap();
        let second = Runtime::init(&map).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
