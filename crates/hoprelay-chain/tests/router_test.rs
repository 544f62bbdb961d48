//! Router behavior against scripted dialers and connectors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hoprelay_chain::transport::ForwardConnector;
use hoprelay_chain::{
    BypassTarget, Chain, Connector, DialContext, DialError, Dialer, Hop, Network, Node,
    RouteError, Router, RouterOptions,
};
use hoprelay_core::Bypass;
use hoprelay_core::io::BoxStream;
use hoprelay_selector::{FailureTable, ManualClock, Selector, SelectorOptions, Strategy};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

type Log = Arc<Mutex<Vec<String>>>;

fn stream() -> BoxStream {
    let (a, _b) = tokio::io::duplex(64);
    Box::new(a)
}

struct ScriptedDialer {
    name: String,
    log: Log,
    fail_dial: AtomicBool,
    fail_handshake: AtomicBool,
    hang: bool,
}

impl ScriptedDialer {
    fn new(name: &str, log: &Log) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: log.clone(),
            fail_dial: AtomicBool::new(false),
            fail_handshake: AtomicBool::new(false),
            hang: false,
        })
    }

    fn failing(name: &str, log: &Log) -> Arc<Self> {
        let d = Self::new(name, log);
        d.fail_dial.store(true, Ordering::SeqCst);
        d.fail_handshake.store(true, Ordering::SeqCst);
        d
    }

    fn hanging(name: &str, log: &Log) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: log.clone(),
            fail_dial: AtomicBool::new(false),
            fail_handshake: AtomicBool::new(false),
            hang: true,
        })
    }
}

fn refused() -> DialError {
    DialError::Io(std::io::ErrorKind::ConnectionRefused.into())
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self, _ctx: &DialContext, addr: &str) -> Result<BoxStream, DialError> {
        self.log.lock().unwrap().push(format!("dial {} {}", self.name, addr));
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail_dial.load(Ordering::SeqCst) {
            return Err(refused());
        }
        Ok(stream())
    }

    async fn handshake(&self, _ctx: &DialContext, s: BoxStream) -> Result<BoxStream, DialError> {
        self.log.lock().unwrap().push(format!("handshake {}", self.name));
        if self.fail_handshake.load(Ordering::SeqCst) {
            return Err(DialError::Handshake("scripted".into()));
        }
        Ok(s)
    }
}

struct ScriptedConnector {
    name: String,
    log: Log,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _ctx: &DialContext,
        s: BoxStream,
        network: Network,
        addr: &str,
    ) -> Result<BoxStream, DialError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("connect {} {} {}", self.name, network, addr));
        Ok(s)
    }
}

fn node(name: &str, dialer: Arc<ScriptedDialer>, log: &Log) -> Arc<Node> {
    Arc::new(Node::new(
        name,
        format!("{}:1080", name),
        dialer,
        Arc::new(ScriptedConnector {
            name: name.to_string(),
            log: log.clone(),
        }),
    ))
}

fn selector(strategy: Strategy, clock: &Arc<ManualClock>) -> Selector {
    Selector::with_failures(
        SelectorOptions {
            strategy,
            max_fails: 1,
            fail_timeout: Duration::from_secs(10),
        },
        Arc::new(FailureTable::with_clock(clock.clone())),
    )
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

struct Matches(&'static str);

impl Bypass for Matches {
    fn contains(&self, addr: &str) -> bool {
        addr.starts_with(self.0)
    }
}

#[tokio::test]
async fn empty_chain_dials_directly() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(async move {
        let (mut s, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4];
        s.read_exact(&mut buf).await.unwrap();
        s.write_all(&buf).await.unwrap();
    });

    let mut s = Router::default()
        .route(&DialContext::new(), Network::Tcp, &addr, &Chain::direct())
        .await
        .unwrap();
    s.write_all(b"echo").await.unwrap();
    let mut buf = [0u8; 4];
    s.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"echo");
    server.await.unwrap();
}

#[tokio::test]
async fn empty_chain_direct_failure_is_dial_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = Router::default()
        .route(&DialContext::new(), Network::Tcp, &addr, &Chain::direct())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RouteError::Dial { .. }));
}

#[tokio::test]
async fn one_hop_one_node_dials_once_and_connects_once() {
    let log = Log::default();
    let clock = Arc::new(ManualClock::new());
    let a = node("a", ScriptedDialer::new("a", &log), &log);
    let hop = Hop::new("h0", vec![a], selector(Strategy::RoundRobin, &clock));
    let chain = Chain::new("c", vec![hop]);

    Router::default()
        .route(&DialContext::new(), Network::Tcp, "dest:443", &chain)
        .await
        .unwrap();

    assert_eq!(entries(&log), vec!["dial a a:1080", "connect a tcp dest:443"]);
}

#[tokio::test]
async fn two_hops_tunnel_through_previous_connector() {
    let log = Log::default();
    let clock = Arc::new(ManualClock::new());
    let a = node("a", ScriptedDialer::new("a", &log), &log);
    let b = node("b", ScriptedDialer::new("b", &log), &log);
    let chain = Chain::new(
        "c",
        vec![
            Hop::new("h0", vec![a], selector(Strategy::RoundRobin, &clock)),
            Hop::new("h1", vec![b], selector(Strategy::RoundRobin, &clock)),
        ],
    );

    Router::default()
        .route(&DialContext::new(), Network::Udp, "dest:53", &chain)
        .await
        .unwrap();

    assert_eq!(
        entries(&log),
        vec![
            "dial a a:1080",
            "connect a tcp b:1080",
            "handshake b",
            "connect b udp dest:53",
        ]
    );
}

#[tokio::test]
async fn hop_bypass_skips_all_dialing() {
    let log = Log::default();
    let clock = Arc::new(ManualClock::new());
    let a = node("a", ScriptedDialer::new("a", &log), &log);
    let chain = Chain::new(
        "c",
        vec![Hop::new("h0", vec![a], selector(Strategy::RoundRobin, &clock))
            .with_bypass(Arc::new(Matches("internal.")))],
    );

    let err = Router::default()
        .route(&DialContext::new(), Network::Tcp, "internal.corp:80", &chain)
        .await
        .err()
        .unwrap();
    match err {
        RouteError::Bypassed { hop, addr } => {
            assert_eq!(hop, "h0");
            assert_eq!(addr, "internal.corp:80");
        }
        other => panic!("unexpected {other}"),
    }
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn node_bypass_on_later_hop_stops_before_that_hop() {
    let log = Log::default();
    let clock = Arc::new(ManualClock::new());
    let a = node("a", ScriptedDialer::new("a", &log), &log);
    let b = Arc::new(
        Node::new(
            "b",
            "b:1080",
            ScriptedDialer::new("b", &log),
            Arc::new(ScriptedConnector {
                name: "b".into(),
                log: log.clone(),
            }),
        )
        .with_bypass(Arc::new(Matches("dest"))),
    );
    let chain = Chain::new(
        "c",
        vec![
            Hop::new("h0", vec![a], selector(Strategy::RoundRobin, &clock)),
            Hop::new("h1", vec![b], selector(Strategy::RoundRobin, &clock)),
        ],
    );

    let err = Router::default()
        .route(&DialContext::new(), Network::Tcp, "dest:443", &chain)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RouteError::Bypassed { ref hop, .. } if hop == "h1"));
    // Hop 0 was reached; nothing was attempted for hop 1.
    assert_eq!(entries(&log), vec!["dial a a:1080"]);
}

#[tokio::test]
async fn next_hop_bypass_target_checks_following_node() {
    let log = Log::default();
    let clock = Arc::new(ManualClock::new());
    let a = node("a", ScriptedDialer::new("a", &log), &log);
    let b = node("b", ScriptedDialer::new("b", &log), &log);
    let chain = Chain::new(
        "c",
        vec![
            Hop::new("h0", vec![a], selector(Strategy::RoundRobin, &clock))
                .with_bypass(Arc::new(Matches("b:"))),
            Hop::new("h1", vec![b], selector(Strategy::RoundRobin, &clock)),
        ],
    )
    .with_bypass_target(BypassTarget::NextHop);

    let err = Router::default()
        .route(&DialContext::new(), Network::Tcp, "dest:443", &chain)
        .await
        .err()
        .unwrap();
    match err {
        RouteError::Bypassed { hop, addr } => {
            assert_eq!(hop, "h0");
            assert_eq!(addr, "b:1080");
        }
        other => panic!("unexpected {other}"),
    }
    assert_eq!(entries(&log), vec!["dial a a:1080"]);
}

#[tokio::test]
async fn failed_node_is_replaced_within_hop() {
    let log = Log::default();
    let clock = Arc::new(ManualClock::new());
    let a = node("a", ScriptedDialer::failing("a", &log), &log);
    let b = node("b", ScriptedDialer::new("b", &log), &log);
    let hop = Hop::new("h0", vec![a, b], selector(Strategy::FailOver, &clock));
    let chain = Chain::new("c", vec![hop]);

    Router::default()
        .route(&DialContext::new(), Network::Tcp, "dest:443", &chain)
        .await
        .unwrap();

    assert_eq!(
        entries(&log),
        vec!["dial a a:1080", "dial b b:1080", "connect b tcp dest:443"]
    );
    let failures = chain.hops()[0].selector().failures();
    assert_eq!(failures.marker("a").failures, 1);
    assert_eq!(failures.marker("b").failures, 0);
}

#[tokio::test]
async fn retry_at_later_hop_rebuilds_prefix_with_same_node() {
    let log = Log::default();
    let clock = Arc::new(ManualClock::new());
    let a = node("a", ScriptedDialer::new("a", &log), &log);
    let a2 = node("a2", ScriptedDialer::new("a2", &log), &log);
    let x = node("x", ScriptedDialer::failing("x", &log), &log);
    let y = node("y", ScriptedDialer::new("y", &log), &log);
    let chain = Chain::new(
        "c",
        vec![
            Hop::new("h0", vec![a, a2], selector(Strategy::FailOver, &clock)),
            Hop::new("h1", vec![x, y], selector(Strategy::FailOver, &clock)),
        ],
    );

    Router::default()
        .route(&DialContext::new(), Network::Tcp, "dest:443", &chain)
        .await
        .unwrap();

    assert_eq!(
        entries(&log),
        vec![
            "dial a a:1080",
            "connect a tcp x:1080",
            "handshake x",
            "dial a a:1080",
            "connect a tcp y:1080",
            "handshake y",
            "connect y tcp dest:443",
        ]
    );
}

#[tokio::test]
async fn fail_over_scenario_recovers_after_fail_timeout() {
    let log = Log::default();
    let clock = Arc::new(ManualClock::new());
    let dialer_a = ScriptedDialer::failing("a", &log);
    let a = node("a", dialer_a.clone(), &log);
    let b = node("b", ScriptedDialer::failing("b", &log), &log);
    let chain = Chain::new(
        "c",
        vec![Hop::new("h0", vec![a, b], selector(Strategy::FailOver, &clock))],
    );
    let router = Router::default();
    let ctx = DialContext::new();

    let err = router
        .route(&ctx, Network::Tcp, "dest:443", &chain)
        .await
        .err()
        .unwrap();
    match err {
        RouteError::RouteFailed { hop, cause } => {
            assert_eq!(hop, "h0");
            assert!(matches!(cause, DialError::Io(_)));
        }
        other => panic!("unexpected {other}"),
    }

    // Both nodes are out of rotation now.
    let err = router
        .route(&ctx, Network::Tcp, "dest:443", &chain)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RouteError::NoEligibleNode { .. }));

    dialer_a.fail_dial.store(false, Ordering::SeqCst);
    clock.advance(Duration::from_secs(10));
    router
        .route(&ctx, Network::Tcp, "dest:443", &chain)
        .await
        .unwrap();
    assert_eq!(chain.hops()[0].selector().failures().marker("a").failures, 0);
}

#[tokio::test]
async fn attempts_per_hop_bounds_retries() {
    let log = Log::default();
    let clock = Arc::new(ManualClock::new());
    let nodes: Vec<Arc<Node>> = ["a", "b", "c"]
        .iter()
        .map(|n| node(n, ScriptedDialer::failing(n, &log), &log))
        .collect();
    let chain = Chain::new(
        "c",
        vec![Hop::new("h0", nodes, selector(Strategy::FailOver, &clock))],
    );
    let router = Router::new(RouterOptions {
        attempts_per_hop: 2,
        timeout: None,
    });

    let err = router
        .route(&DialContext::new(), Network::Tcp, "dest:443", &chain)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RouteError::RouteFailed { .. }));
    assert_eq!(entries(&log), vec!["dial a a:1080", "dial b b:1080"]);
}

#[tokio::test]
async fn cancellation_aborts_dial() {
    let log = Log::default();
    let clock = Arc::new(ManualClock::new());
    let a = node("a", ScriptedDialer::hanging("a", &log), &log);
    let chain = Chain::new(
        "c",
        vec![Hop::new("h0", vec![a], selector(Strategy::RoundRobin, &clock))],
    );
    let cancel = CancellationToken::new();
    let ctx = DialContext::new().with_cancel(cancel.clone());

    let router = Router::default();
    let route = router.route(&ctx, Network::Tcp, "dest:443", &chain);
    tokio::pin!(route);
    tokio::select! {
        _ = &mut route => panic!("hanging dial completed"),
        _ = tokio::time::sleep(Duration::from_millis(20)) => {}
    }
    cancel.cancel();
    let err = route.await.err().unwrap();
    assert!(matches!(err, RouteError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn route_timeout() {
    let log = Log::default();
    let clock = Arc::new(ManualClock::new());
    let a = node("a", ScriptedDialer::hanging("a", &log), &log);
    let chain = Chain::new(
        "c",
        vec![Hop::new("h0", vec![a], selector(Strategy::RoundRobin, &clock))],
    );
    let router = Router::new(RouterOptions {
        attempts_per_hop: 1,
        timeout: Some(Duration::from_secs(5)),
    });

    let err = router
        .route(&DialContext::new(), Network::Tcp, "dest:443", &chain)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RouteError::Timeout(d) if d == Duration::from_secs(5)));
}

#[tokio::test]
async fn hash_source_pins_node() {
    let log = Log::default();
    let clock = Arc::new(ManualClock::new());
    let nodes: Vec<Arc<Node>> = ["a", "b", "c", "d"]
        .iter()
        .map(|n| {
            Arc::new(Node::new(
                *n,
                format!("{}:1080", n),
                ScriptedDialer::new(n, &log),
                Arc::new(ForwardConnector),
            ))
        })
        .collect();
    let chain = Chain::new(
        "c",
        vec![Hop::new("h0", nodes, selector(Strategy::Hash, &clock))],
    );
    let router = Router::default();
    let ctx = DialContext::new().with_hash_source("203.0.113.7");

    for _ in 0..5 {
        router.route(&ctx, Network::Tcp, "dest:443", &chain).await.unwrap();
    }
    let dials = entries(&log);
    assert_eq!(dials.len(), 5);
    assert!(dials.iter().all(|d| d == &dials[0]));
}
