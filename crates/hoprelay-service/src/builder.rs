//! Turns a validated [`Config`] into runnable services.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hoprelay_chain::transport::{ForwardConnector, HttpConnector, TcpDialer};
use hoprelay_chain::{
    BypassTarget, Chain, Connector, Dialer, Hop, Network, Node, Router, RouterOptions,
};
use hoprelay_config::{
    BypassScope, ChainConfig, Config, ConnectorConfig, DialerConfig, HandlerKind, ListenNetwork,
    SelectorConfig, ServiceConfig,
};
use hoprelay_core::{Admission, Bypass, RateLimiter};
use hoprelay_selector::{Selector, SelectorOptions};
use tracing::{debug, info};

use crate::error::BuildError;
use crate::handler::{ForwardHandler, Handler, Target};
use crate::listener::{Listener, TcpListener};
use crate::matcher::MatcherSet;
use crate::rate_limit::WindowRateLimiter;
use crate::recorder::{FileRecorder, RecordKind, Recorder, RecorderObject};
use crate::service::{ConnectionTracker, Service};
use crate::udp::UdpListener;

pub fn selector_options(cfg: &SelectorConfig) -> SelectorOptions {
    SelectorOptions {
        strategy: cfg.strategy,
        max_fails: cfg.max_fails,
        fail_timeout: Duration::from_secs(cfg.fail_timeout_secs),
    }
}

/// Named objects shared between services.
struct Registry {
    admissions: HashMap<String, Arc<MatcherSet>>,
    bypasses: HashMap<String, Arc<MatcherSet>>,
    limiters: HashMap<String, Arc<WindowRateLimiter>>,
    recorders: HashMap<String, Arc<FileRecorder>>,
    chains: HashMap<String, Arc<Chain>>,
}

fn lookup<'a, T>(
    map: &'a HashMap<String, T>,
    kind: &'static str,
    name: &str,
) -> Result<&'a T, BuildError> {
    map.get(name).ok_or_else(|| BuildError::UnknownReference {
        kind,
        name: name.to_string(),
    })
}

impl Registry {
    fn new(config: &Config) -> Result<Self, BuildError> {
        let mut admissions = HashMap::new();
        for set in &config.admissions {
            let m = MatcherSet::new(&set.name, set.whitelist, &set.matchers)?;
            admissions.insert(set.name.clone(), Arc::new(m));
        }

        let mut bypasses = HashMap::new();
        for set in &config.bypasses {
            let m = MatcherSet::new(&set.name, set.whitelist, &set.matchers)?;
            bypasses.insert(set.name.clone(), Arc::new(m));
        }

        let mut limiters = HashMap::new();
        for cfg in &config.limiters {
            let limiter =
                WindowRateLimiter::new(cfg.requests, Duration::from_secs(cfg.window_secs));
            limiter.start_cleanup_task(Duration::from_secs(cfg.cleanup_interval_secs.max(1)));
            limiters.insert(cfg.name.clone(), Arc::new(limiter));
        }

        let recorders = config
            .recorders
            .iter()
            .map(|cfg| {
                let rec = FileRecorder::new(&cfg.file.path, &cfg.file.separator);
                (cfg.name.clone(), Arc::new(rec))
            })
            .collect();

        let mut registry = Self {
            admissions,
            bypasses,
            limiters,
            recorders,
            chains: HashMap::new(),
        };
        for cfg in &config.chains {
            let chain = registry.build_chain(cfg)?;
            debug!(chain = %cfg.name, hops = chain.len(), "chain built");
            registry.chains.insert(cfg.name.clone(), Arc::new(chain));
        }
        Ok(registry)
    }

    fn bypass(&self, name: &Option<String>) -> Result<Option<Arc<dyn Bypass>>, BuildError> {
        match name {
            Some(name) => {
                let set = lookup(&self.bypasses, "bypass", name)?;
                Ok(Some(Arc::clone(set) as Arc<dyn Bypass>))
            }
            None => Ok(None),
        }
    }

    fn build_chain(&self, cfg: &ChainConfig) -> Result<Chain, BuildError> {
        let mut hops = Vec::with_capacity(cfg.hops.len());
        for hop_cfg in &cfg.hops {
            let mut nodes = Vec::with_capacity(hop_cfg.nodes.len());
            for node_cfg in &hop_cfg.nodes {
                let mut node = Node::new(
                    &node_cfg.name,
                    &node_cfg.addr,
                    build_dialer(&node_cfg.dialer),
                    build_connector(&node_cfg.connector),
                );
                if let Some(bypass) = self.bypass(&node_cfg.bypass)? {
                    node = node.with_bypass(bypass);
                }
                nodes.push(Arc::new(node));
            }

            let selector = Selector::new(selector_options(&hop_cfg.selector));
            let mut hop = Hop::new(&hop_cfg.name, nodes, selector);
            if let Some(bypass) = self.bypass(&hop_cfg.bypass)? {
                hop = hop.with_bypass(bypass);
            }
            hops.push(hop);
        }

        let target = match cfg.bypass_target {
            BypassScope::Destination => BypassTarget::Destination,
            BypassScope::NextHop => BypassTarget::NextHop,
        };
        Ok(Chain::new(&cfg.name, hops).with_bypass_target(target))
    }

    fn build_handler(&self, svc: &ServiceConfig) -> Result<Arc<dyn Handler>, BuildError> {
        let chain = match &svc.chain {
            Some(name) => Arc::clone(lookup(&self.chains, "chain", name)?),
            None => Arc::new(Chain::direct()),
        };
        let router = Router::new(RouterOptions {
            attempts_per_hop: svc.handler.retries,
            timeout: (svc.handler.route_timeout_secs > 0)
                .then(|| Duration::from_secs(svc.handler.route_timeout_secs)),
        });

        match svc.handler.kind {
            HandlerKind::Forward => {
                let forwarder = svc
                    .forwarder
                    .as_ref()
                    .filter(|f| !f.targets.is_empty())
                    .ok_or_else(|| BuildError::NoTargets {
                        name: svc.name.clone(),
                    })?;
                let targets = forwarder
                    .targets
                    .iter()
                    .map(|addr| Target::new(addr.as_str()))
                    .collect();
                let selector = Selector::new(selector_options(&forwarder.selector));
                let network = match svc.network {
                    ListenNetwork::Tcp => Network::Tcp,
                    ListenNetwork::Udp => Network::Udp,
                };
                let mut handler = ForwardHandler::new(&svc.name, targets, selector, chain, router)
                    .with_network(network)
                    .with_retries(svc.handler.retries)
                    .with_buffer_size(svc.handler.relay_buffer_size)
                    .with_datagram_buffer_size(svc.handler.datagram_buffer_size);
                if let Some(bypass) = self.bypass(&svc.bypass)? {
                    handler = handler.with_bypass(bypass);
                }
                Ok(Arc::new(handler))
            }
        }
    }

    fn build_service(
        &self,
        svc: &ServiceConfig,
        tracker: &ConnectionTracker,
    ) -> Result<Service, BuildError> {
        let addr: SocketAddr = svc
            .addr
            .parse()
            .map_err(|_| BuildError::InvalidAddress(svc.addr.clone()))?;
        let handler = self.build_handler(svc)?;
        let bound = match svc.network {
            ListenNetwork::Tcp => {
                TcpListener::bind(addr, svc.backlog).map(|l| Arc::new(l) as Arc<dyn Listener>)
            }
            ListenNetwork::Udp => UdpListener::bind(addr).map(|l| {
                let ttl = Duration::from_secs(svc.udp_ttl_secs);
                Arc::new(l.with_ttl(ttl)) as Arc<dyn Listener>
            }),
        };
        let listener = bound.map_err(|source| BuildError::Bind {
            addr: svc.addr.clone(),
            source,
        })?;

        let mut service =
            Service::new(&svc.name, listener, handler).with_tracker(tracker.clone());

        if let Some(name) = &svc.admission {
            let set = lookup(&self.admissions, "admission", name)?;
            service = service.with_admission(Arc::clone(set) as Arc<dyn Admission>);
        }
        if let Some(name) = &svc.limiter {
            let limiter = lookup(&self.limiters, "limiter", name)?;
            service = service.with_rate_limiter(Arc::clone(limiter) as Arc<dyn RateLimiter>);
        }
        for attached in &svc.recorders {
            let kind: RecordKind = attached
                .record
                .parse()
                .map_err(BuildError::UnsupportedRecord)?;
            let recorder = lookup(&self.recorders, "recorder", &attached.name)?;
            service = service.with_recorder(RecorderObject {
                name: attached.name.clone(),
                kind,
                recorder: Arc::clone(recorder) as Arc<dyn Recorder>,
            });
        }

        info!(
            service = %svc.name,
            addr = %addr,
            network = ?svc.network,
            chain = svc.chain.as_deref().unwrap_or("direct"),
            "service built"
        );
        Ok(service)
    }
}

fn build_dialer(cfg: &DialerConfig) -> Arc<dyn Dialer> {
    match cfg {
        DialerConfig::Tcp {
            connect_timeout_secs,
            no_delay,
        } => Arc::new(TcpDialer {
            connect_timeout: Duration::from_secs(*connect_timeout_secs),
            no_delay: *no_delay,
            ..TcpDialer::default()
        }),
    }
}

fn build_connector(cfg: &ConnectorConfig) -> Arc<dyn Connector> {
    match cfg {
        ConnectorConfig::Forward => Arc::new(ForwardConnector),
        ConnectorConfig::Http { username, password } => {
            let connector = match username {
                Some(user) => {
                    HttpConnector::new().with_basic_auth(user, password.as_deref().unwrap_or(""))
                }
                None => HttpConnector::new(),
            };
            Arc::new(connector)
        }
    }
}

/// Build every service in `config`, binding their listeners.
///
/// All services share `tracker` so the caller can drain them together.
/// Must run inside a tokio runtime.
pub fn build_services(
    config: &Config,
    tracker: &ConnectionTracker,
) -> Result<Vec<Service>, BuildError> {
    let registry = Registry::new(config)?;
    config
        .services
        .iter()
        .map(|svc| registry.build_service(svc, tracker))
        .collect()
}
