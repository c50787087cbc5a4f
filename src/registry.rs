//! Proxy Registry: owns the authoritative proxy list, triggers
//! auto-refresh, and reconciles the persistent maps when the list
//! changes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};

use crate::address::{normalize, read_file, read_url, ProxyAddress, Slice};
use crate::error::Result;
use crate::persist::PersistentOrderedMap;
use crate::pool::{Pool, PoolConfig};

/// Where a registry's proxy list comes from.
#[derive(Debug, Clone)]
pub enum Source {
    Inline(Vec<String>),
    File(PathBuf),
    Url(String),
}

/// Options governing how a freshly-loaded list is normalized, and how
/// auto-refresh behaves.
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    pub slice: Option<Slice>,
    pub force_scheme: Option<String>,
    pub shuffle: bool,
    /// `url` sources only: reload if this much wall time has elapsed
    /// since the last successful refresh. `None` disables auto-refresh.
    pub auto_refresh_period: Option<Duration>,
    pub url_retries: u32,
    pub url_sleep_range: (u64, u64),
    pub url_timeout: Duration,
}

impl RegistryOptions {
    pub fn new() -> Self {
        Self {
            url_retries: 10,
            url_sleep_range: (2, 10),
            url_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }
}

#[derive(Default)]
enum LastRefresh {
    #[default]
    Never,
    At(SystemTime),
}

/// Per-address reliability stats.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PerProxyStats {
    pub uptime: (u64, u64),
    pub last_holdout: Option<f64>,
    pub last_good_holdout: Option<f64>,
}

pub type BlacklistMap = dyn PersistentOrderedMap<ProxyAddress, Option<String>>;
pub type CooldownMap = dyn PersistentOrderedMap<ProxyAddress, f64>;
pub type StatsMap = dyn PersistentOrderedMap<ProxyAddress, PerProxyStats>;

pub struct Registry {
    source: Source,
    options: RegistryOptions,

    entries: RwLock<Vec<ProxyAddress>>,
    generation: AtomicU64,
    last_refresh: Mutex<LastRefresh>,

    /// Serializes refreshes; a contended refresh is simply skipped.
    refresh_lock: Mutex<()>,
    /// Guards the lazy first load.
    load_lock: Mutex<()>,
    loaded: std::sync::atomic::AtomicBool,

    pub blacklist: Arc<BlacklistMap>,
    pub cooldown: Arc<CooldownMap>,
    pub stats: Arc<StatsMap>,

    pool: OnceLock<Arc<Pool>>,
}

impl Registry {
    pub fn new(
        source: Source,
        options: RegistryOptions,
        blacklist: Arc<BlacklistMap>,
        cooldown: Arc<CooldownMap>,
        stats: Arc<StatsMap>,
    ) -> Self {
        Self {
            source,
            options,
            entries: RwLock::new(Vec::new()),
            generation: AtomicU64::new(0),
            last_refresh: Mutex::new(LastRefresh::Never),
            refresh_lock: Mutex::new(()),
            load_lock: Mutex::new(()),
            loaded: std::sync::atomic::AtomicBool::new(false),
            blacklist,
            cooldown,
            stats,
            pool: OnceLock::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Latest reconciled list and its generation. Triggers the lazy
    /// first load if needed.
    pub fn current(&self) -> (Vec<ProxyAddress>, u64) {
        self.ensure_loaded();
        (self.entries.read().clone(), self.generation())
    }

    fn ensure_loaded(&self) {
        if self.loaded.load(Ordering::Acquire) {
            return;
        }
        let _guard = self.load_lock.lock();
        if self.loaded.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.reload() {
            tracing::warn!("[Registry] initial load failed: {}", e);
        }
        self.loaded.store(true, Ordering::Release);
    }

    /// Called opportunistically before every acquisition. Reloads the
    /// list if the source says it has changed; a contended refresh is
    /// silently skipped (the caller proceeds against the current list).
    pub fn maybe_refresh(&self) {
        self.ensure_loaded();

        let Some(_guard) = self.refresh_lock.try_lock() else {
            return;
        };

        let should_reload = match &self.source {
            Source::Inline(_) => false,
            Source::File(path) => match std::fs::metadata(path).and_then(|m| m.modified()) {
                Ok(mtime) => match &*self.last_refresh.lock() {
                    LastRefresh::Never => true,
                    LastRefresh::At(last) => mtime != *last,
                },
                Err(e) => {
                    tracing::warn!("[Registry] could not stat {}: {}", path.display(), e);
                    false
                }
            },
            Source::Url(_) => match self.options.auto_refresh_period {
                None => false,
                Some(period) => match &*self.last_refresh.lock() {
                    LastRefresh::Never => true,
                    LastRefresh::At(last) => {
                        SystemTime::now().duration_since(*last).unwrap_or_default() >= period
                    }
                },
            },
        };

        if should_reload {
            if let Err(e) = self.reload() {
                tracing::warn!("[Registry] refresh failed: {}", e);
            }
        }
    }

    /// Force an immediate reload regardless of mtime/period. Increments
    /// the generation and reconciles the persistent maps on success.
    pub fn reload(&self) -> Result<()> {
        let raw = self.load_raw()?;
        let normalized = normalize(
            raw,
            self.options.slice,
            self.options.force_scheme.as_deref(),
            self.options.shuffle,
        );

        *self.entries.write() = normalized;
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.reconcile_persistent_maps();

        let marker = match &self.source {
            Source::File(path) => std::fs::metadata(path)
                .and_then(|m| m.modified())
                .map(LastRefresh::At)
                .unwrap_or(LastRefresh::Never),
            _ => LastRefresh::At(SystemTime::now()),
        };
        *self.last_refresh.lock() = marker;

        Ok(())
    }

    fn load_raw(&self) -> Result<Vec<String>> {
        match &self.source {
            Source::Inline(list) => Ok(list.clone()),
            Source::File(path) => read_file(path),
            Source::Url(url) => read_url(
                url,
                self.options.url_retries,
                self.options.url_sleep_range,
                self.options.url_timeout,
            ),
        }
    }

    /// Drop blacklist/cooldown/stats keys not present in the new list.
    /// Idempotent, O(|maps| + |entries|).
    fn reconcile_persistent_maps(&self) {
        let current: HashSet<ProxyAddress> = self.entries.read().iter().cloned().collect();

        for (addr, _) in self.blacklist.iter() {
            if !current.contains(&addr) {
                self.blacklist.remove(&addr);
            }
        }
        for (addr, _) in self.cooldown.iter() {
            if !current.contains(&addr) {
                self.cooldown.remove(&addr);
            }
        }
        for (addr, _) in self.stats.iter() {
            if !current.contains(&addr) {
                self.stats.remove(&addr);
            }
        }
    }

    /// A uniformly random address from the current list, triggering
    /// `maybe_refresh` first. Used by non-pooled Chains.
    pub fn random_address(&self) -> Option<ProxyAddress> {
        self.maybe_refresh();
        let entries = self.entries.read();
        if entries.is_empty() {
            return None;
        }
        use rand::seq::SliceRandom;
        entries.choose(&mut rand::thread_rng()).cloned()
    }

    /// Lazily creates and returns this registry's `Pool` singleton.
    pub fn get_pool(self: &Arc<Self>, config: PoolConfig) -> Result<Arc<Pool>> {
        if let Some(pool) = self.pool.get() {
            return Ok(pool.clone());
        }
        let pool = Arc::new(Pool::new(self.clone(), config)?);
        Ok(self.pool.get_or_init(|| pool).clone())
    }
}
