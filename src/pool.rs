//! Pool: the core scheduler. Maintains the `{free, used, cooling,
//! blacklisted}` partition over a [`Registry`]'s address list and
//! implements the blocking `acquire`/`release` protocol plus the
//! smart-holdout algorithm.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};

use crate::address::ProxyAddress;
use crate::error::{ProxyError, Result};
use crate::registry::{PerProxyStats, Registry};

/// How long the pool re-checks `cooling` while waiting with nothing
/// else available. Not a timer wheel — a deliberate simplification; a
/// cleaner reimplementation could instead bound the wait by the next
/// cooling deadline.
const COOLING_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub smart_holdout: bool,
    pub smart_holdout_start: Option<f64>,
    pub smart_holdout_min: f64,
    pub smart_holdout_max: f64,
    pub default_holdout: Option<f64>,
    pub default_bad_holdout: Option<f64>,
    pub force_defaults: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            smart_holdout: false,
            smart_holdout_start: None,
            smart_holdout_min: 0.0,
            smart_holdout_max: f64::INFINITY,
            default_holdout: None,
            default_bad_holdout: None,
            force_defaults: false,
        }
    }
}

struct Inner {
    free: VecDeque<ProxyAddress>,
    used: HashSet<ProxyAddress>,
    cooling: IndexMap<ProxyAddress, f64>,
    blacklisted: IndexMap<ProxyAddress, Option<String>>,
    observed_generation: u64,
}

pub struct Pool {
    registry: Arc<Registry>,
    config: PoolConfig,
    state: Mutex<Inner>,
    cond: Condvar,
}

fn wallclock_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn clamp(v: f64, min: f64, max: f64) -> f64 {
    v.max(min).min(max)
}

impl Pool {
    pub fn new(registry: Arc<Registry>, config: PoolConfig) -> Result<Self> {
        if config.smart_holdout {
            match config.smart_holdout_start {
                Some(s) if s > 0.0 => {}
                _ => return Err(ProxyError::SmartHoldoutMisconfigured),
            }
        }

        let (entries, generation) = registry.current();
        let present: HashSet<ProxyAddress> = entries.iter().cloned().collect();

        // Seed cooling/blacklisted from the registry's persistent maps so
        // state survives a process restart; drop any entries the current
        // generation no longer carries.
        let cooling: IndexMap<ProxyAddress, f64> = registry
            .cooldown
            .iter()
            .filter(|(p, _)| present.contains(p))
            .collect();
        let blacklisted: IndexMap<ProxyAddress, Option<String>> = registry
            .blacklist
            .iter()
            .filter(|(p, _)| present.contains(p))
            .collect();

        let free: VecDeque<ProxyAddress> = entries
            .into_iter()
            .filter(|p| !blacklisted.contains_key(p) && !cooling.contains_key(p))
            .collect();

        Ok(Self {
            registry,
            config,
            state: Mutex::new(Inner {
                free,
                used: HashSet::new(),
                cooling,
                blacklisted,
                observed_generation: generation,
            }),
            cond: Condvar::new(),
        })
    }

    /// Snapshot sizes of the four partitions, for monitoring.
    pub fn sizes(&self) -> (usize, usize, usize, usize) {
        let g = self.state.lock();
        (g.free.len(), g.used.len(), g.cooling.len(), g.blacklisted.len())
    }

    pub fn acquire(&self, timeout: Option<Duration>) -> Result<ProxyAddress> {
        let start = Instant::now();
        let mut guard = self.state.lock();

        loop {
            self.registry.maybe_refresh();
            if self.registry.generation() != guard.observed_generation {
                self.reconcile_with_registry(&mut guard);
            }
            self.promote_cooled(&mut guard);

            if let Some(p) = guard.free.pop_front() {
                guard.used.insert(p.clone());
                return Ok(p);
            }

            if !guard.blacklisted.is_empty() {
                if let Some(p) = self.rescue_from_blacklist(&mut guard) {
                    guard.used.insert(p.clone());
                    return Ok(p);
                }
            }

            let wait_for = if !guard.cooling.is_empty() {
                COOLING_POLL_INTERVAL
            } else {
                match timeout {
                    Some(t) => {
                        let elapsed = start.elapsed();
                        if elapsed >= t {
                            return Err(ProxyError::NoFreeProxies { timeout });
                        }
                        t - elapsed
                    }
                    None => Duration::from_secs(u64::MAX / 2),
                }
            };

            let _ = self.cond.wait_for(&mut guard, wait_for);

            if let Some(t) = timeout {
                if start.elapsed() > t {
                    return Err(ProxyError::NoFreeProxies { timeout });
                }
            }
        }
    }

    pub fn release(&self, p: &ProxyAddress, bad: bool, holdout: Option<f64>, reason: Option<String>) {
        let mut guard = self.state.lock();

        if !guard.used.remove(p) {
            return;
        }

        let mut holdout = holdout;
        if holdout.is_none() || self.config.force_defaults {
            holdout = if bad {
                self.config.default_bad_holdout
            } else {
                self.config.default_holdout
            };
        }

        if self.config.smart_holdout {
            let computed = self.compute_smart_holdout(p, bad, holdout);
            holdout = Some(clamp(computed, self.config.smart_holdout_min, self.config.smart_holdout_max));
        }

        if let Some(h) = holdout {
            let deadline = wallclock_now() + h;
            guard.cooling.insert(p.clone(), deadline);
            self.registry.cooldown.put(p.clone(), deadline);
        }

        if bad {
            guard.blacklisted.insert(p.clone(), reason.clone());
            self.registry.blacklist.put(p.clone(), reason);
        } else if holdout.is_none() {
            guard.free.push_back(p.clone());
            self.cond.notify_one();
        }

        self.update_stats(p, bad, holdout);
    }

    fn compute_smart_holdout(&self, p: &ProxyAddress, bad: bool, caller_holdout: Option<f64>) -> f64 {
        let stats = self.registry.stats.get(p);
        let lo = stats.as_ref().and_then(|s| s.last_holdout);

        match lo {
            // First call for this address (no recorded holdout yet):
            // use the caller's holdout if any, else smart_holdout_start.
            // Neither branch below (double / retreat-partway) applies —
            // there is nothing yet to double or retreat from.
            None => caller_holdout.unwrap_or_else(|| {
                self.config
                    .smart_holdout_start
                    .expect("validated non-zero in Pool::new when smart_holdout is enabled")
            }),
            Some(lo) if bad => {
                let g = stats.as_ref().and_then(|s| s.last_good_holdout);
                match g {
                    Some(g) if lo < g => g,
                    _ => lo * 2.0,
                }
            }
            Some(lo) => lo * 0.75,
        }
    }

    fn update_stats(&self, p: &ProxyAddress, bad: bool, holdout: Option<f64>) {
        let mut stats = self.registry.stats.get(p).unwrap_or_default();
        if bad {
            stats.uptime.1 += 1;
        } else {
            stats.uptime.0 += 1;
        }
        stats.last_holdout = holdout;

        match (bad, holdout) {
            (false, h) => stats.last_good_holdout = h,
            (true, Some(h)) => {
                if h >= stats.last_good_holdout.unwrap_or(f64::NEG_INFINITY) {
                    stats.last_good_holdout = Some(h);
                }
            }
            (true, None) => {}
        }

        self.registry.stats.put(p.clone(), stats);
    }

    fn reliability(&self, p: &ProxyAddress) -> f64 {
        match self.registry.stats.get(p) {
            None => f64::INFINITY,
            Some(s) => {
                let (ok, fail) = s.uptime;
                if fail > 0 {
                    (ok / fail) as f64
                } else {
                    ok as f64
                }
            }
        }
    }

    /// Rescue the most reliable blacklisted proxy that is not cooling.
    /// Stable sort by reliability descending, tie-break by insertion
    /// order (the blacklist's natural iteration order).
    fn rescue_from_blacklist(&self, guard: &mut Inner) -> Option<ProxyAddress> {
        let mut candidates: Vec<(ProxyAddress, f64)> = guard
            .blacklisted
            .keys()
            .filter(|p| !guard.cooling.contains_key(*p))
            .map(|p| (p.clone(), self.reliability(p)))
            .collect();

        if candidates.is_empty() {
            return None;
        }

        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let chosen = candidates[0].0.clone();
        guard.blacklisted.shift_remove(&chosen);
        self.registry.blacklist.remove(&chosen);
        Some(chosen)
    }

    fn reconcile_with_registry(&self, guard: &mut Inner) {
        let (entries, generation) = self.registry.current();
        let set: HashSet<ProxyAddress> = entries.iter().cloned().collect();

        guard.blacklisted.retain(|k, _| set.contains(k));
        guard.cooling.retain(|k, _| set.contains(k));
        guard.used.retain(|k| set.contains(k));

        for (addr, _) in self.registry.stats.iter() {
            if !set.contains(&addr) {
                self.registry.stats.remove(&addr);
            }
        }
        for (addr, _) in self.registry.blacklist.iter() {
            if !set.contains(&addr) {
                self.registry.blacklist.remove(&addr);
            }
        }
        for (addr, _) in self.registry.cooldown.iter() {
            if !set.contains(&addr) {
                self.registry.cooldown.remove(&addr);
            }
        }

        guard.free = entries
            .into_iter()
            .filter(|a| !guard.used.contains(a) && !guard.blacklisted.contains_key(a) && !guard.cooling.contains_key(a))
            .collect();

        guard.observed_generation = generation;
    }

    fn promote_cooled(&self, guard: &mut Inner) {
        let now = wallclock_now();
        let expired: Vec<ProxyAddress> = guard
            .cooling
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(p, _)| p.clone())
            .collect();

        for p in expired {
            guard.cooling.shift_remove(&p);
            self.registry.cooldown.remove(&p);
            if !guard.blacklisted.contains_key(&p) {
                guard.free.push_back(p);
            }
        }
    }
}
