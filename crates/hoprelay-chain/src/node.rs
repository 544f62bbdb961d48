//! Chain, hop and node model.

use std::fmt;
use std::sync::Arc;

use hoprelay_core::Bypass;
use hoprelay_selector::{SelectError, Selectable, Selector};
use serde::{Deserialize, Serialize};

use crate::transport::{Connector, Dialer};

/// One proxy endpoint. Immutable after construction; its failure state
/// lives in the owning hop's selector.
pub struct Node {
    name: String,
    addr: String,
    bypass: Option<Arc<dyn Bypass>>,
    dialer: Arc<dyn Dialer>,
    connector: Arc<dyn Connector>,
}

impl Node {
    /// An empty `name` falls back to `addr`.
    pub fn new(
        name: impl Into<String>,
        addr: impl Into<String>,
        dialer: Arc<dyn Dialer>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let addr = addr.into();
        let mut name = name.into();
        if name.is_empty() {
            name = addr.clone();
        }
        Self {
            name,
            addr,
            bypass: None,
            dialer,
            connector,
        }
    }

    pub fn with_bypass(mut self, bypass: Arc<dyn Bypass>) -> Self {
        self.bypass = Some(bypass);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn dialer(&self) -> &Arc<dyn Dialer> {
        &self.dialer
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn bypasses(&self, addr: &str) -> bool {
        self.bypass.as_ref().is_some_and(|b| b.contains(addr))
    }
}

impl Selectable for Node {
    fn id(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("bypass", &self.bypass.is_some())
            .finish()
    }
}

/// Named group of interchangeable nodes.
pub struct Hop {
    name: String,
    nodes: Vec<Arc<Node>>,
    selector: Selector,
    bypass: Option<Arc<dyn Bypass>>,
}

impl Hop {
    pub fn new(name: impl Into<String>, nodes: Vec<Arc<Node>>, selector: Selector) -> Self {
        Self {
            name: name.into(),
            nodes,
            selector,
            bypass: None,
        }
    }

    pub fn with_bypass(mut self, bypass: Arc<dyn Bypass>) -> Self {
        self.bypass = Some(bypass);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Pick a node, skipping the ones in `exclude`.
    pub fn select(
        &self,
        key: Option<&str>,
        exclude: &[Arc<Node>],
    ) -> Result<Arc<Node>, SelectError> {
        let candidates: Vec<&Arc<Node>> = self
            .nodes
            .iter()
            .filter(|n| !exclude.iter().any(|e| Arc::ptr_eq(e, n)))
            .collect();
        self.selector
            .select(&candidates, key)
            .map(|node| Arc::clone(*node))
    }

    /// Whether the hop itself or `node` bypasses `addr`.
    pub fn bypasses(&self, node: &Node, addr: &str) -> bool {
        self.bypass.as_ref().is_some_and(|b| b.contains(addr)) || node.bypasses(addr)
    }

    pub fn mark_failure(&self, node: &Node) {
        self.selector.mark_failure(node.name());
    }

    pub fn mark_success(&self, node: &Node) {
        self.selector.mark_success(node.name());
    }
}

impl fmt::Debug for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hop")
            .field("name", &self.name)
            .field("nodes", &self.nodes)
            .field("selector", &self.selector)
            .field("bypass", &self.bypass.is_some())
            .finish()
    }
}

/// What the bypass rules of a hop are evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BypassTarget {
    /// Every hop checks the final destination.
    #[default]
    Destination,
    /// Each hop checks the address it forwards to: the next hop's node, or
    /// the destination for the last hop.
    NextHop,
}

/// Ordered sequence of hops. Traversal order is fixed at construction.
#[derive(Debug, Default)]
pub struct Chain {
    name: String,
    hops: Vec<Hop>,
    bypass_target: BypassTarget,
}

impl Chain {
    pub fn new(name: impl Into<String>, hops: Vec<Hop>) -> Self {
        Self {
            name: name.into(),
            hops,
            bypass_target: BypassTarget::default(),
        }
    }

    /// A chain without hops: the destination is dialed directly.
    pub fn direct() -> Self {
        Self::new("direct", Vec::new())
    }

    pub fn with_bypass_target(mut self, target: BypassTarget) -> Self {
        self.bypass_target = target;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn bypass_target(&self) -> BypassTarget {
        self.bypass_target
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }
}
