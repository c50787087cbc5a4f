//! MultiChain: round-robins over several [`Chain`]s, transparently
//! rotating past ones whose pool is currently exhausted.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::address::ProxyAddress;
use crate::chain::Chain;
use crate::error::{ProxyError, Result};

pub struct MultiChain {
    ring: VecDeque<Chain>,
    pool_acquire_timeout: Option<Duration>,
}

impl MultiChain {
    pub fn new(chains: Vec<Chain>, pool_acquire_timeout: Option<Duration>) -> Self {
        assert!(!chains.is_empty(), "MultiChain requires at least one chain");
        Self {
            ring: chains.into(),
            pool_acquire_timeout,
        }
    }

    /// Move the current chain (the ring's back) to the front, bringing
    /// the next one into "current" position.
    fn rotate(&mut self) {
        if let Some(c) = self.ring.pop_back() {
            self.ring.push_front(c);
        }
    }

    /// Builds a path from the current chain, rotating past any chain
    /// that reports `NoFreeProxies`, bounded overall by
    /// `pool_acquire_timeout`. If a full rotation completes with no
    /// overall timeout configured (so there is nothing left to bound
    /// further waiting on), fails with `AliveProxiesNotFound` instead
    /// of looping forever.
    pub fn path(&mut self) -> Result<Vec<ProxyAddress>> {
        let start = Instant::now();
        let ring_len = self.ring.len();
        let mut rotations = 0usize;

        loop {
            if let Some(t) = self.pool_acquire_timeout {
                if start.elapsed() >= t {
                    return Err(ProxyError::NoFreeProxies { timeout: Some(t) });
                }
            }

            let current = self.ring.back_mut().expect("ring is never empty");
            match current.path() {
                Ok(p) => return Ok(p.to_vec()),
                Err(ProxyError::NoFreeProxies { .. }) => {
                    self.rotate();
                    rotations += 1;
                    if self.pool_acquire_timeout.is_none() && rotations >= ring_len {
                        return Err(ProxyError::AliveProxiesNotFound);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Releases on the current chain (lazily — no immediate
    /// re-acquire), rotates the ring, then enforces a non-lazy path
    /// build on the new current chain.
    pub fn switch(&mut self, bad: bool, holdout: Option<f64>, reason: Option<String>) -> Result<Vec<ProxyAddress>> {
        {
            let current = self.ring.back_mut().expect("ring is never empty");
            current.switch(bad, holdout, reason, true)?;
        }
        self.rotate();
        self.path()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
