//! Integration scenarios exercising the public API across modules
//! (Registry + Pool + Chain + MultiChain together).

use std::sync::Arc;
use std::time::Duration;

use proxy_warden::chain::Chain;
use proxy_warden::multichain::MultiChain;
use proxy_warden::persist::InMemoryMap;
use proxy_warden::pool::PoolConfig;
use proxy_warden::registry::{Registry, RegistryOptions, Source};
use proxy_warden::ProxyAddress;

fn in_memory_registry(source: Source, options: RegistryOptions) -> Arc<Registry> {
    Arc::new(Registry::new(
        source,
        options,
        Arc::new(InMemoryMap::new()),
        Arc::new(InMemoryMap::new()),
        Arc::new(InMemoryMap::new()),
    ))
}

/// A file-sourced registry reconciles on mtime change — addresses
/// dropped from the file disappear from `used`/`free`, and newly-added
/// ones become acquirable, all without the caller doing anything but
/// calling `acquire` again.
#[test]
fn refresh_reconciliation_drops_and_adds_addresses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proxies.txt");
    std::fs::write(&path, "a\nb\nc\n").unwrap();

    let registry = in_memory_registry(Source::File(path.clone()), RegistryOptions::new());
    let pool = registry.get_pool(PoolConfig::default()).unwrap();

    let a = pool.acquire(Some(Duration::from_millis(200))).unwrap();
    assert_eq!(a, ProxyAddress::new("a"));

    std::thread::sleep(Duration::from_millis(20));
    std::fs::write(&path, "b\nc\nd\n").unwrap();
    // nudge mtime forward in case the filesystem's clock resolution is coarse
    {
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f).unwrap();
    }

    // next acquire observes the generation bump and reconciles
    let mut seen = std::collections::HashSet::new();
    for _ in 0..3 {
        let p = pool.acquire(Some(Duration::from_millis(200))).unwrap();
        seen.insert(p);
    }
    assert!(seen.contains(&ProxyAddress::new("d")));
    assert!(!seen.contains(&ProxyAddress::new("a")));

    // releasing the now-stale "a" handle is a silent no-op
    pool.release(&a, false, None, None);
    let sizes = pool.sizes();
    assert_eq!(sizes.0 + sizes.1, 3); // b, c, d accounted for; "a" is gone
}

/// MultiChain rotates to the next chain when the current one's pool is
/// exhausted, without waiting out the full configured timeout twice.
#[test]
fn multichain_rotates_past_an_exhausted_pool() {
    let reg_a = in_memory_registry(Source::Inline(vec!["a".into()]), RegistryOptions::new());
    let reg_b = in_memory_registry(Source::Inline(vec!["b".into()]), RegistryOptions::new());
    let pool_a = reg_a.get_pool(PoolConfig::default()).unwrap();
    let pool_b = reg_b.get_pool(PoolConfig::default()).unwrap();

    // hold pool_a's only proxy so chain 1 is exhausted from the start.
    let held = pool_a.acquire(None).unwrap();

    let chain_a = Chain::pooled_over(pool_a.clone(), None, Some(Duration::from_millis(300)));
    let chain_b = Chain::pooled_over(pool_b, None, Some(Duration::from_millis(300)));

    let mut multi = MultiChain::new(vec![chain_a, chain_b], Some(Duration::from_secs(2)));

    let start = std::time::Instant::now();
    let path = multi.path().unwrap();
    assert_eq!(path, vec![ProxyAddress::new("b")]);
    // the rotate-on-failure loop should cost roughly one pool's
    // acquire timeout (~300ms), not the multichain's overall 2s budget.
    assert!(start.elapsed() < Duration::from_secs(1));

    pool_a.release(&held, false, None, None);
}

/// Once both proxies are blacklisted, the one with the better track
/// record (higher ok // fail) is rescued first.
#[test]
fn blacklist_rescue_prefers_more_reliable_proxy() {
    let registry = in_memory_registry(
        Source::Inline(vec!["p1".into(), "p2".into()]),
        RegistryOptions::new(),
    );
    let pool = registry.get_pool(PoolConfig::default()).unwrap();

    let p1 = pool.acquire(None).unwrap();
    let p2 = pool.acquire(None).unwrap();

    // p2 earns one successful release (reliability becomes 1 // 1 once
    // it later also takes a fail) before either is blacklisted.
    pool.release(&p2, false, None, None);
    let p2 = pool.acquire(Some(Duration::from_millis(100))).unwrap();
    pool.release(&p2, true, None, Some("bad".into()));

    // p1 never had a successful release: reliability stays 0 // 1 = 0.
    pool.release(&p1, true, None, Some("bad".into()));

    let rescued = pool.acquire(Some(Duration::from_millis(100))).unwrap();
    assert_eq!(rescued, p2);
}
