//! Lazily opened, shared engine handle.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;
use xref_core::IdMapper;
use xref_error::Result;

use crate::config::XrefConfig;

/// Opens one engine on first use and hands out clones of it afterwards.
///
/// The handle is owned by the caller (typically a `static` or an application
/// context). A failed open is not cached; the next call tries again.
#[derive(Debug)]
pub struct SharedMapper {
    config: XrefConfig,
    mapper: OnceLock<Arc<IdMapper>>,
    init: Mutex<()>,
}

impl SharedMapper {
    #[must_use]
    pub const fn new(config: XrefConfig) -> Self {
        Self {
            config,
            mapper: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &XrefConfig {
        &self.config
    }

    /// The engine, if already opened.
    #[must_use]
    pub fn get(&self) -> Option<Arc<IdMapper>> {
        self.mapper.get().cloned()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.mapper.get().is_some()
    }

    /// The engine, opening it with this handle's config on first call.
    pub fn get_or_open(&self) -> Result<Arc<IdMapper>> {
        if let Some(mapper) = self.mapper.get() {
            return Ok(Arc::clone(mapper));
        }

        let _init = self.init.lock();
        if let Some(mapper) = self.mapper.get() {
            return Ok(Arc::clone(mapper));
        }

        let mapper = Arc::new(crate::open(&self.config)?);
        debug!(persist = self.config.persist, "opened shared mapper");
        Ok(Arc::clone(self.mapper.get_or_init(|| mapper)))
    }
}
