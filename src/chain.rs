//! Chain: a thin, non-thread-safe handle holding at most one
//! currently-acquired proxy, optionally prefixed by a gateway hop,
//! with release-on-drop.

use std::sync::Arc;
use std::time::Duration;

use crate::address::ProxyAddress;
use crate::error::Result;
use crate::pool::Pool;
use crate::registry::Registry;

/// How a Chain obtains its current address.
enum Mode {
    /// No pool: each `switch` draws a fresh uniformly-random address
    /// from the registry; nothing is acquired or released.
    Random(Arc<Registry>),
    /// Pooled: `switch` acquires/releases through the shared `Pool`.
    Pooled(Arc<Pool>, Option<Duration>),
}

pub struct Chain {
    gateway: Option<ProxyAddress>,
    mode: Mode,
    current: Option<ProxyAddress>,
    path_cache: Vec<ProxyAddress>,
}

impl Chain {
    /// Inline list convenience constructor: builds a private in-memory
    /// registry in `inline` mode.
    pub fn from_inline(addrs: Vec<String>, gateway: Option<ProxyAddress>) -> Self {
        use crate::persist::InMemoryMap;
        use crate::registry::{RegistryOptions, Source};

        let registry = Arc::new(Registry::new(
            Source::Inline(addrs),
            RegistryOptions::new(),
            Arc::new(InMemoryMap::new()),
            Arc::new(InMemoryMap::new()),
            Arc::new(InMemoryMap::new()),
        ));
        Self {
            gateway,
            mode: Mode::Random(registry),
            current: None,
            path_cache: Vec::new(),
        }
    }

    pub fn random_over(registry: Arc<Registry>, gateway: Option<ProxyAddress>) -> Self {
        Self {
            gateway,
            mode: Mode::Random(registry),
            current: None,
            path_cache: Vec::new(),
        }
    }

    pub fn pooled_over(pool: Arc<Pool>, gateway: Option<ProxyAddress>, acquire_timeout: Option<Duration>) -> Self {
        Self {
            gateway,
            mode: Mode::Pooled(pool, acquire_timeout),
            current: None,
            path_cache: Vec::new(),
        }
    }

    fn build_path(&self, proxy: &ProxyAddress) -> Vec<ProxyAddress> {
        let mut path = Vec::with_capacity(2);
        if let Some(gw) = &self.gateway {
            path.push(gw.clone());
        }
        path.push(proxy.clone());
        path
    }

    fn acquire_proxy(&mut self) -> Result<ProxyAddress> {
        match &self.mode {
            Mode::Random(registry) => registry
                .random_address()
                .ok_or(crate::error::ProxyError::NoFreeProxies { timeout: None }),
            Mode::Pooled(pool, timeout) => pool.acquire(*timeout),
        }
    }

    fn release_current(&mut self, bad: bool, holdout: Option<f64>, reason: Option<String>) {
        if let (Mode::Pooled(pool, _), Some(p)) = (&self.mode, self.current.take()) {
            pool.release(&p, bad, holdout, reason);
        } else {
            self.current = None;
        }
    }

    /// Lazily builds `[gateway?, current]`, acquiring on first access.
    pub fn path(&mut self) -> Result<&[ProxyAddress]> {
        if self.current.is_none() {
            let p = self.acquire_proxy()?;
            self.path_cache = self.build_path(&p);
            self.current = Some(p);
        }
        Ok(&self.path_cache)
    }

    pub fn current(&self) -> Option<&ProxyAddress> {
        self.current.as_ref()
    }

    /// Releases the held proxy with the given outcome, clears the
    /// cached path, and (unless `lazy`) immediately acquires a
    /// replacement.
    pub fn switch(&mut self, bad: bool, holdout: Option<f64>, reason: Option<String>, lazy: bool) -> Result<()> {
        self.path_cache.clear();
        self.release_current(bad, holdout, reason);
        if !lazy {
            self.path()?;
        }
        Ok(())
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        self.release_current(false, None, None);
    }
}
