//! Failure-aware node selection for hoprelay.
//!
//! A [`Selector`] filters a candidate list down to the nodes that are
//! currently eligible according to its [`FailureTable`], then lets a
//! strategy policy pick one of them. Four strategies are built in:
//! round-robin, random, fail-over and hash.
//!
//! The selector performs no I/O. Callers report the outcome of each dial
//! through [`Selector::mark_success`] and [`Selector::mark_failure`].

pub mod failure;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use failure::{Clock, FailMarker, FailureTable, ManualClock, SystemClock};

// ── Errors ──

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error("no eligible node among {candidates} candidates")]
    NoEligibleNode { candidates: usize },
}

// ── Strategy enum (for serde config) ──

/// Selection strategy identifier, used in configuration files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    #[serde(alias = "round", alias = "round_robin", alias = "rr")]
    RoundRobin,
    #[serde(alias = "rand")]
    Random,
    #[serde(alias = "fifo", alias = "failover", alias = "fail_over")]
    FailOver,
    Hash,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Strategy::RoundRobin => "round-robin",
            Strategy::Random => "random",
            Strategy::FailOver => "fail-over",
            Strategy::Hash => "hash",
        })
    }
}

// ── Policy trait ──

/// Picks an index in `0..len` among the currently eligible candidates.
///
/// `len` is always non-zero. `key` is the routing context's hash source.
pub trait SelectPolicy: Send + Sync + 'static {
    fn pick(&self, len: usize, key: Option<&str>) -> usize;
}

/// Anything a selector can choose between.
pub trait Selectable {
    /// Identity under which failures are tracked.
    fn id(&self) -> &str;
}

impl<T: Selectable + ?Sized> Selectable for Arc<T> {
    fn id(&self) -> &str {
        (**self).id()
    }
}

impl<T: Selectable + ?Sized> Selectable for &T {
    fn id(&self) -> &str {
        (**self).id()
    }
}

// ── Selector ──

/// Tuning knobs of a [`Selector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorOptions {
    pub strategy: Strategy,
    /// Consecutive failures before a node is skipped. 0 is treated as 1.
    pub max_fails: u32,
    pub fail_timeout: Duration,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::RoundRobin,
            max_fails: 1,
            fail_timeout: Duration::from_secs(10),
        }
    }
}

/// Strategy policy plus the failure state it consults.
pub struct Selector {
    options: SelectorOptions,
    policy: Box<dyn SelectPolicy>,
    failures: Arc<FailureTable>,
}

impl Selector {
    pub fn new(options: SelectorOptions) -> Self {
        Self::with_failures(options, Arc::new(FailureTable::new()))
    }

    /// Build a selector sharing an existing failure table (and its clock).
    pub fn with_failures(mut options: SelectorOptions, failures: Arc<FailureTable>) -> Self {
        options.max_fails = options.max_fails.max(1);
        let policy: Box<dyn SelectPolicy> = match options.strategy {
            Strategy::RoundRobin => Box::new(RoundRobin::new()),
            Strategy::Random => Box::new(Random),
            Strategy::FailOver => Box::new(FailOver),
            Strategy::Hash => Box::new(HashPolicy::new()),
        };
        Self::with_policy(options, policy, failures)
    }

    /// Build a selector around a custom policy.
    pub fn with_policy(
        mut options: SelectorOptions,
        policy: Box<dyn SelectPolicy>,
        failures: Arc<FailureTable>,
    ) -> Self {
        options.max_fails = options.max_fails.max(1);
        Self {
            options,
            policy,
            failures,
        }
    }

    /// Choose one eligible candidate.
    pub fn select<'a, T: Selectable>(
        &self,
        candidates: &'a [T],
        key: Option<&str>,
    ) -> Result<&'a T, SelectError> {
        let eligible: Vec<&'a T> = candidates
            .iter()
            .filter(|c| self.is_eligible(c.id()))
            .collect();
        if eligible.is_empty() {
            return Err(SelectError::NoEligibleNode {
                candidates: candidates.len(),
            });
        }
        let idx = self.policy.pick(eligible.len(), key) % eligible.len();
        Ok(eligible[idx])
    }

    pub fn is_eligible(&self, id: &str) -> bool {
        self.failures
            .is_eligible(id, self.options.max_fails, self.options.fail_timeout)
    }

    pub fn mark_failure(&self, id: &str) {
        let failures = self.failures.mark_failure(id);
        if failures >= self.options.max_fails {
            debug!(
                node = id,
                failures,
                fail_timeout = ?self.options.fail_timeout,
                "node taken out of rotation"
            );
        }
    }

    pub fn mark_success(&self, id: &str) {
        self.failures.mark_success(id);
    }

    pub fn failures(&self) -> &Arc<FailureTable> {
        &self.failures
    }

    pub fn options(&self) -> &SelectorOptions {
        &self.options
    }

    pub fn strategy(&self) -> Strategy {
        self.options.strategy
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::new(SelectorOptions::default())
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("options", &self.options)
            .field("failures", &self.failures)
            .finish()
    }
}

// ── Built-in policies ──

/// Round-robin policy: a shared cursor taken modulo the eligible count.
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectPolicy for RoundRobin {
    fn pick(&self, len: usize, _key: Option<&str>) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

/// Uniform random pick.
pub struct Random;

impl SelectPolicy for Random {
    fn pick(&self, len: usize, _key: Option<&str>) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Always the first eligible candidate in declared order.
pub struct FailOver;

impl SelectPolicy for FailOver {
    fn pick(&self, _len: usize, _key: Option<&str>) -> usize {
        0
    }
}

/// Deterministic pick keyed by the hash source; round-robin without a key.
pub struct HashPolicy {
    fallback: RoundRobin,
}

impl HashPolicy {
    pub fn new() -> Self {
        Self {
            fallback: RoundRobin::new(),
        }
    }
}

impl Default for HashPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectPolicy for HashPolicy {
    fn pick(&self, len: usize, key: Option<&str>) -> usize {
        match key {
            Some(key) if !key.is_empty() => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() as usize) % len
            }
            _ => self.fallback.pick(len, None),
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, PartialEq)]
    struct Node(String);

    impl Selectable for Node {
        fn id(&self) -> &str {
            &self.0
        }
    }

    fn nodes(n: usize) -> Vec<Node> {
        (0..n).map(|i| Node(format!("node-{}", i))).collect()
    }

    fn selector(strategy: Strategy, clock: Arc<ManualClock>) -> Selector {
        Selector::with_failures(
            SelectorOptions {
                strategy,
                max_fails: 1,
                fail_timeout: Duration::from_secs(10),
            },
            Arc::new(FailureTable::with_clock(clock)),
        )
    }

    fn pick(sel: &Selector, nodes: &[Node]) -> String {
        sel.select(nodes, None).unwrap().0.clone()
    }

    // ── RoundRobin ──

    #[test]
    fn round_robin_visits_each_once_per_cycle() {
        let sel = selector(Strategy::RoundRobin, Arc::new(ManualClock::new()));
        let nodes = nodes(4);
        for _ in 0..3 {
            let seen: HashSet<String> = (0..4).map(|_| pick(&sel, &nodes)).collect();
            assert_eq!(seen.len(), 4);
        }
    }

    #[test]
    fn round_robin_wraps_over_eligible_only() {
        let sel = selector(Strategy::RoundRobin, Arc::new(ManualClock::new()));
        let nodes = nodes(3);
        sel.mark_failure("node-1");
        let picks: Vec<String> = (0..4).map(|_| pick(&sel, &nodes)).collect();
        assert_eq!(picks, vec!["node-0", "node-2", "node-0", "node-2"]);
    }

    // ── Random ──

    #[test]
    fn random_only_returns_eligible() {
        let sel = selector(Strategy::Random, Arc::new(ManualClock::new()));
        let nodes = nodes(3);
        sel.mark_failure("node-0");
        sel.mark_failure("node-2");
        for _ in 0..50 {
            assert_eq!(pick(&sel, &nodes), "node-1");
        }
    }

    #[test]
    fn random_distributes() {
        let sel = selector(Strategy::Random, Arc::new(ManualClock::new()));
        let nodes = nodes(3);
        let seen: HashSet<String> = (0..200).map(|_| pick(&sel, &nodes)).collect();
        assert!(seen.len() > 1);
    }

    // ── FailOver ──

    #[test]
    fn fail_over_prefers_first_then_recovers() {
        let clock = Arc::new(ManualClock::new());
        let sel = selector(Strategy::FailOver, clock.clone());
        let nodes = nodes(3);
        assert_eq!(pick(&sel, &nodes), "node-0");

        sel.mark_failure("node-0");
        assert_eq!(pick(&sel, &nodes), "node-1");

        clock.advance(Duration::from_secs(10));
        assert_eq!(pick(&sel, &nodes), "node-0");
    }

    #[test]
    fn fail_over_respects_max_fails() {
        let sel = Selector::new(SelectorOptions {
            strategy: Strategy::FailOver,
            max_fails: 3,
            fail_timeout: Duration::from_secs(60),
        });
        let nodes = nodes(2);
        sel.mark_failure("node-0");
        sel.mark_failure("node-0");
        assert_eq!(pick(&sel, &nodes), "node-0");
        sel.mark_failure("node-0");
        assert_eq!(pick(&sel, &nodes), "node-1");
        sel.mark_success("node-0");
        assert_eq!(pick(&sel, &nodes), "node-0");
    }

    // ── Hash ──

    #[test]
    fn hash_is_stable_per_key() {
        let sel = selector(Strategy::Hash, Arc::new(ManualClock::new()));
        let nodes = nodes(5);
        let first = sel.select(&nodes, Some("192.168.1.100")).unwrap();
        for _ in 0..20 {
            assert_eq!(sel.select(&nodes, Some("192.168.1.100")).unwrap(), first);
        }
    }

    #[test]
    fn hash_distributes_keys() {
        let sel = selector(Strategy::Hash, Arc::new(ManualClock::new()));
        let nodes = nodes(3);
        let seen: HashSet<String> = (0..100)
            .map(|i| {
                let key = format!("10.0.0.{}", i);
                sel.select(&nodes, Some(key.as_str())).unwrap().0.clone()
            })
            .collect();
        assert!(seen.len() > 1);
    }

    #[test]
    fn hash_without_key_round_robins() {
        let sel = selector(Strategy::Hash, Arc::new(ManualClock::new()));
        let nodes = nodes(2);
        assert_eq!(pick(&sel, &nodes), "node-0");
        assert_eq!(pick(&sel, &nodes), "node-1");
    }

    // ── Edge cases ──

    #[test]
    fn empty_candidates_error() {
        let sel = Selector::default();
        let empty: Vec<Node> = Vec::new();
        assert_eq!(
            sel.select(&empty, None),
            Err(SelectError::NoEligibleNode { candidates: 0 })
        );
    }

    #[test]
    fn all_ineligible_error() {
        let sel = selector(Strategy::RoundRobin, Arc::new(ManualClock::new()));
        let nodes = nodes(2);
        sel.mark_failure("node-0");
        sel.mark_failure("node-1");
        assert!(sel.select(&nodes, None).is_err());
    }

    #[test]
    fn zero_max_fails_behaves_as_one() {
        let sel = Selector::new(SelectorOptions {
            strategy: Strategy::FailOver,
            max_fails: 0,
            fail_timeout: Duration::from_secs(60),
        });
        assert_eq!(sel.options().max_fails, 1);
        let nodes = nodes(2);
        assert_eq!(pick(&sel, &nodes), "node-0");
    }

    #[test]
    fn strategy_names() {
        let parse = |s: &str| serde_json::from_str::<Strategy>(&format!("\"{}\"", s)).unwrap();
        assert_eq!(parse("round-robin"), Strategy::RoundRobin);
        assert_eq!(parse("round"), Strategy::RoundRobin);
        assert_eq!(parse("rand"), Strategy::Random);
        assert_eq!(parse("fail-over"), Strategy::FailOver);
        assert_eq!(parse("fifo"), Strategy::FailOver);
        assert_eq!(parse("hash"), Strategy::Hash);
        assert_eq!(Strategy::FailOver.to_string(), "fail-over");
    }

    #[test]
    fn send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Selector>();
    }
}
