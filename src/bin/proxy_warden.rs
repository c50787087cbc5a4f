//! Headless entry point: wires a JSON config file to a running Pool
//! and logs acquire/release activity.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use proxy_warden::config::{self, PersistentMapPaths};
use proxy_warden::persist::{InMemoryMap, JsonFileMap, PersistentOrderedMap};
use proxy_warden::registry::{BlacklistMap, CooldownMap, StatsMap};
use proxy_warden::{Registry, Source};

fn open_map<K, V>(path: &Option<PathBuf>) -> std::sync::Arc<dyn PersistentOrderedMap<K, V>>
where
    K: std::hash::Hash + Eq + Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
    V: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    match path {
        Some(p) => match JsonFileMap::open(p) {
            Ok(m) => Arc::new(m),
            Err(e) => {
                tracing::warn!("[proxy_warden] failed to open {}: {}, falling back to in-memory", p.display(), e);
                Arc::new(InMemoryMap::new())
            }
        },
        None => Arc::new(InMemoryMap::new()),
    }
}

fn main() {
    proxy_warden::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(1).cloned().unwrap_or_else(|| "proxy_warden.json".to_string());

    tracing::info!("[proxy_warden] starting, config={}", config_path);

    let raw = match std::fs::read_to_string(&config_path) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("[proxy_warden] failed to read {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    let parsed = match config::parse(&raw) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("[proxy_warden] invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let PersistentMapPaths { blacklist, cooldown, stats } = parsed.map_paths;
    let blacklist: Arc<BlacklistMap> = open_map(&blacklist);
    let cooldown: Arc<CooldownMap> = open_map(&cooldown);
    let stats: Arc<StatsMap> = open_map(&stats);

    let source: Source = parsed.source;
    let registry = Arc::new(Registry::new(source, parsed.registry_options, blacklist, cooldown, stats));
    let pool = match registry.get_pool(parsed.pool_config) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("[proxy_warden] failed to construct pool: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("[proxy_warden] pool running, press Ctrl+C to stop");
    loop {
        let (free, used, cooling, blacklisted) = pool.sizes();
        tracing::info!(
            "[proxy_warden] free={} used={} cooling={} blacklisted={}",
            free,
            used,
            cooling,
            blacklisted
        );
        std::thread::sleep(Duration::from_secs(30));
    }
}
