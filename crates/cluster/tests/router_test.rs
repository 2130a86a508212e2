use cluster::backend::serve_connection;
use cluster::{
    ClusterConfig, ClusterError, DeadNodeEvent, NodeHealth, OpLog, ReportSink, Router, Store,
};
use corelib::NodeId;
use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use wire::{Command, Connection, FrameCodec, Reply, Request, Value, WireError};

fn config() -> ClusterConfig {
    ClusterConfig {
        request_timeout_ms: 100,
        ..ClusterConfig::default()
    }
}

/// Attach an in-memory backend to `router` and return its id and store.
async fn attach(router: &Router<DuplexStream>, addr: &str) -> (NodeId, Arc<Store>) {
    let (router_side, node_side) = duplex(64 * 1024);
    let store = Arc::new(Store::new());
    let node_store = Arc::clone(&store);
    tokio::spawn(async move {
        let mut conn = Connection::new(node_side, FrameCodec::default());
        conn.receive_node_id().await?;
        serve_connection(conn, node_store, Arc::new(AtomicBool::new(true))).await
    });
    let id = router.register_node(router_side, addr).await.unwrap();
    (id, store)
}

/// Attach a backend that takes its id and then never answers.
async fn attach_silent(router: &Router<DuplexStream>) -> (NodeId, DuplexStream) {
    let (router_side, node_side) = duplex(64 * 1024);
    let id = router.register_node(router_side, "silent").await.unwrap();
    (id, node_side)
}

/// Attach a backend that holds back its first reply for `delay` and answers
/// everything after that at once.
async fn attach_slow_start(router: &Router<DuplexStream>, delay: Duration) -> NodeId {
    let (router_side, node_side) = duplex(64 * 1024);
    tokio::spawn(async move {
        let mut conn = Connection::new(node_side, FrameCodec::default());
        conn.receive_node_id().await?;
        let store = Store::new();
        let mut first = true;
        while let Some(request) = conn.read_request().await? {
            if let Request::Command(cmd) = request {
                if std::mem::take(&mut first) {
                    tokio::time::sleep(delay).await;
                }
                conn.write_reply(&store.apply(&cmd)).await?;
            }
        }
        Ok::<_, WireError>(())
    });
    router.register_node(router_side, "slow").await.unwrap()
}

#[derive(Default)]
struct RecordingLog {
    commands: Mutex<Vec<Command>>,
}

impl OpLog for RecordingLog {
    fn record(&self, command: &Command) {
        self.commands.lock().push(command.clone());
    }
}

#[tokio::test]
async fn test_empty_ring_rejects_commands() {
    let router: Router<DuplexStream> = Router::new(config()).unwrap();
    assert!(matches!(router.get("x").await, Err(ClusterError::EmptyRing)));
    assert_eq!(router.stats().query_count, 0);
}

#[tokio::test]
async fn test_registration_assigns_sequential_ids() {
    let router = Router::new(config()).unwrap();
    let (a, _) = attach(&router, "a").await;
    let (b, _) = attach(&router, "b").await;
    let (c, _) = attach(&router, "c").await;

    assert_eq!((a, b, c), (NodeId(0), NodeId(1), NodeId(2)));
    assert_eq!(router.ring().node_count(), 3);
    assert_eq!(router.ring().token_count(), 15);
    assert_eq!(router.registry().active(), vec![a, b, c]);
}

#[tokio::test]
async fn test_value_lives_on_owning_node() {
    let router = Router::new(config()).unwrap();
    let mut stores = Vec::new();
    for addr in ["a", "b", "c"] {
        stores.push(attach(&router, addr).await);
    }

    router.set("x", 1i64).await.unwrap();
    let owner = router.ring().lookup(b"x").unwrap();
    for (id, store) in &stores {
        assert_eq!(store.len(), usize::from(*id == owner));
    }
    assert_eq!(router.get("x").await.unwrap(), Some(Value::Int(1)));
}

#[tokio::test]
async fn test_stats_accounting() {
    let router = Router::new(config()).unwrap();
    for addr in ["a", "b", "c"] {
        attach(&router, addr).await;
    }
    for i in 0..10i64 {
        router.set(format!("k{}", i), i).await.unwrap();
    }
    // Writes are not queries.
    assert_eq!(router.stats().query_count, 0);

    for i in 0..10 {
        assert!(router.get(format!("k{}", i)).await.unwrap().is_some());
    }
    for i in 0..5 {
        assert!(router.get(format!("missing{}", i)).await.unwrap().is_none());
    }

    let stats = router.stats();
    assert_eq!(stats.query_count, 15);
    assert_eq!(stats.cache_hits, 10);
    assert_eq!(stats.cache_misses(), 5);
    assert!((stats.hit_ratio.unwrap() - 10.0 / 15.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_counters_and_delete() {
    let router = Router::new(config()).unwrap();
    attach(&router, "a").await;

    assert_eq!(router.increment("hits").await.unwrap(), 1);
    assert_eq!(router.add("hits", 10).await.unwrap(), 11);
    assert_eq!(router.decrement("hits").await.unwrap(), 10);

    router.set("name", "cache").await.unwrap();
    assert!(matches!(router.increment("name").await, Err(ClusterError::Rejected(_))));

    assert!(router.delete("name").await.unwrap());
    assert!(!router.delete("name").await.unwrap());
}

#[tokio::test]
async fn test_empty_key_never_routed() {
    let log = Arc::new(RecordingLog::default());
    let router: Router<DuplexStream> = Router::with_oplog(config(), log.clone()).unwrap();
    attach(&router, "a").await;

    let forged = Command::Get { key: String::new() };
    assert!(matches!(
        router.route(forged).await,
        Err(ClusterError::Wire(WireError::InvalidCommand(_)))
    ));
    assert!(log.commands.lock().is_empty());
}

#[tokio::test]
async fn test_commands_are_logged() {
    let log = Arc::new(RecordingLog::default());
    let router = Router::with_oplog(config(), log.clone()).unwrap();
    attach(&router, "a").await;

    router.set("k", 1i64).await.unwrap();
    router.get("k").await.unwrap();
    router.delete("k").await.unwrap();

    let kinds: Vec<&str> = log.commands.lock().iter().map(|c| c.kind()).collect();
    assert_eq!(kinds, vec!["set", "get", "del"]);
}

#[tokio::test]
async fn test_unresponsive_node_times_out() {
    let router = Router::new(config()).unwrap();
    let (id, _node_side) = attach_silent(&router).await;

    let started = std::time::Instant::now();
    let err = router.route(Command::get("x").unwrap()).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    match err {
        ClusterError::NodeUnreachable { node, source } => {
            assert_eq!(node, id);
            assert!(matches!(source, WireError::Timeout(_)));
        }
        other => panic!("unexpected error: {}", other),
    }

    // The first reply is still owed, so the next command waits on it.
    assert!(matches!(
        router.route(Command::get("x").unwrap()).await,
        Err(ClusterError::NodeUnreachable {
            source: WireError::Timeout(_),
            ..
        })
    ));
    // Timeouts alone never evict.
    assert!(router.ring().contains(&id));
    assert_eq!(router.registry().get(&id).map(|e| e.health), Some(NodeHealth::Healthy));

    // Failed gets are queries that missed.
    let stats = router.stats();
    assert_eq!(stats.query_count, 2);
    assert_eq!(stats.cache_hits, 0);
}

#[tokio::test]
async fn test_slow_node_recovers_after_timeout() {
    let router = Router::new(config()).unwrap();
    let id = attach_slow_start(&router, Duration::from_millis(250)).await;

    assert!(matches!(
        router.get("a").await,
        Err(ClusterError::NodeUnreachable {
            source: WireError::Timeout(_),
            ..
        })
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The late miss for "a" is skipped, not handed to these commands.
    router.set("b", "v").await.unwrap();
    assert_eq!(router.get("b").await.unwrap(), Some(Value::Text("v".into())));
    for i in 0..5i64 {
        router.set(format!("n{}", i), i).await.unwrap();
        assert_eq!(router.get(format!("n{}", i)).await.unwrap(), Some(Value::Int(i)));
    }

    assert!(router.ring().contains(&id));
    assert!(router.registry().quarantined().is_empty());
    let stats = router.stats();
    assert_eq!(stats.query_count, 7);
    assert_eq!(stats.cache_hits, 6);
}

#[tokio::test]
async fn test_failed_get_counts_as_miss() {
    let router = Router::new(config()).unwrap();
    attach(&router, "a").await;
    let (silent, _node_side) = attach_silent(&router).await;

    let key = (0..)
        .map(|i| format!("key{}", i))
        .find(|key| router.ring().lookup(key.as_bytes()).unwrap() == silent)
        .unwrap();
    assert!(router.get(key.as_str()).await.is_err());
    assert!(router.set(key.as_str(), 1i64).await.is_err());

    let stats = router.stats();
    assert_eq!(stats.query_count, 1);
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(stats.hit_ratio, Some(0.0));
}

#[tokio::test]
async fn test_closed_node_fails_fast() {
    let router = Router::new(config()).unwrap();
    let (id, node_side) = attach_silent(&router).await;
    drop(node_side);

    assert!(matches!(
        router.set("x", 1i64).await,
        Err(ClusterError::NodeUnreachable { .. })
    ));

    // A connection that can carry no more traffic takes the node out of the ring.
    assert!(!router.ring().contains(&id));
    assert_eq!(router.registry().quarantined(), vec![id]);
    assert!(matches!(router.get("x").await, Err(ClusterError::EmptyRing)));
}

#[tokio::test]
async fn test_concurrent_routes_get_their_own_replies() {
    let config = ClusterConfig {
        request_timeout_ms: 5_000,
        ..ClusterConfig::default()
    };
    let router: Arc<Router<DuplexStream>> = Arc::new(Router::new(config).unwrap());
    let (_, store) = attach(&router, "a").await;

    let mut tasks = JoinSet::new();
    for i in 0..50i64 {
        let router = Arc::clone(&router);
        tasks.spawn(async move {
            let key = format!("key{}", i);
            router.set(key.as_str(), i).await.unwrap();
            let value = router.get(key.as_str()).await.unwrap();
            (i, value)
        });
    }

    let mut seen = 0;
    while let Some(joined) = tasks.join_next().await {
        let (i, value) = joined.unwrap();
        assert_eq!(value, Some(Value::Int(i)), "wrong reply for key{}", i);
        seen += 1;
    }
    assert_eq!(seen, 50);
    assert_eq!(store.len(), 50);
    assert_eq!(router.stats().cache_hits, 50);
}

#[tokio::test]
async fn test_evict_is_idempotent() {
    let router = Router::new(config()).unwrap();
    let (a, _) = attach(&router, "a").await;
    let (b, _) = attach(&router, "b").await;

    assert!(router.evict_node(a));
    assert!(!router.evict_node(a));
    assert!(!router.ring().contains(&a));
    assert!(!router.registry().contains(&a));
    assert_eq!(router.ring().token_count(), 5);

    // Every key now lands on the survivor.
    for i in 0..20 {
        assert_eq!(router.ring().lookup(format!("key{}", i).as_bytes()).unwrap(), b);
    }
}

#[tokio::test]
async fn test_repeated_reports_are_harmless() {
    let router = Router::new(config()).unwrap();
    let (a, _) = attach(&router, "a").await;
    let (b, _) = attach(&router, "b").await;

    assert!(router.deliver(&[a]).await.unwrap());
    assert!(router.deliver(&[a]).await.unwrap());
    assert!(router.deliver(&[a, NodeId(99)]).await.unwrap());
    assert_eq!(router.registry().active(), vec![b]);
}

#[tokio::test]
async fn test_dead_node_event_quarantines() {
    let router: Arc<Router<DuplexStream>> = Arc::new(Router::new(config()).unwrap());
    let (a, _) = attach(&router, "a").await;
    let (b, _) = attach(&router, "b").await;

    let (tx, rx) = mpsc::unbounded_channel();
    let consumer = router.consume_dead_nodes(rx);
    tx.send(DeadNodeEvent {
        node_id: a,
        addr: "a".to_string(),
        missed_probes: 3,
    })
    .unwrap();
    drop(tx);
    consumer.await.unwrap();

    assert!(!router.ring().contains(&a));
    assert_eq!(router.registry().get(&a).map(|e| e.health), Some(NodeHealth::Unhealthy));
    assert_eq!(router.registry().quarantined(), vec![a]);
    assert_eq!(router.registry().active(), vec![b]);

    // A later eviction cleans up what quarantine left behind.
    assert!(router.evict_node(a));
    assert!(router.registry().quarantined().is_empty());
}

#[tokio::test]
async fn test_reply_error_surfaces_as_rejected() {
    let router = Router::new(config()).unwrap();
    attach(&router, "a").await;
    router.set("s", "text").await.unwrap();
    assert_eq!(
        router.route(Command::add("s", 1).unwrap()).await.unwrap(),
        Reply::Error("value of s is not an integer".to_string())
    );
}
