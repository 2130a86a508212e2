//! Command-line configuration and the two process roles.

use crate::commands::{self, Command, CommandResult};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use cluster::oplog::LogHeader;
use cluster::{
    CacheNode, ClusterConfig, FileOpLog, HealthMonitor, NullOpLog, OpLog, ReportSink, Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "shardcache", version, about = "Sharded in-memory cache")]
pub struct CliConfig {
    /// JSON config file; flags override its values.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub role: Role,
}

#[derive(Subcommand, Debug)]
pub enum Role {
    /// Run the router and the health monitor, with an operator console on stdin.
    Serve,
    /// Run a backend cache node that joins a running router.
    Node {
        /// Do not connect to the health monitor.
        #[arg(long)]
        no_health: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct Overrides {
    #[arg(long, global = true)]
    pub router_addr: Option<SocketAddr>,

    #[arg(long, global = true)]
    pub health_addr: Option<SocketAddr>,

    #[arg(long, global = true)]
    pub virtual_replicas: Option<u32>,

    #[arg(long, global = true)]
    pub probe_interval_ms: Option<u64>,

    #[arg(long, global = true)]
    pub probe_timeout_ms: Option<u64>,

    #[arg(long, global = true)]
    pub dead_threshold: Option<u32>,

    #[arg(long, global = true)]
    pub request_timeout_ms: Option<u64>,

    /// Append every routed command to this file.
    #[arg(long, global = true)]
    pub log_path: Option<PathBuf>,
}

impl Overrides {
    fn apply(&self, config: &mut ClusterConfig) {
        if let Some(addr) = self.router_addr {
            config.router_addr = addr;
        }
        if let Some(addr) = self.health_addr {
            config.health_addr = addr;
        }
        if let Some(n) = self.virtual_replicas {
            config.virtual_replicas = n;
        }
        if let Some(ms) = self.probe_interval_ms {
            config.probe_interval_ms = ms;
        }
        if let Some(ms) = self.probe_timeout_ms {
            config.probe_timeout_ms = ms;
        }
        if let Some(n) = self.dead_threshold {
            config.dead_threshold = n;
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout_ms = ms;
        }
        if let Some(path) = &self.log_path {
            config.log_path = Some(path.clone());
        }
    }
}

impl CliConfig {
    /// Config file (or defaults) with flags applied on top.
    pub fn cluster_config(&self) -> anyhow::Result<ClusterConfig> {
        let mut config = match &self.config {
            Some(path) => ClusterConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClusterConfig::default(),
        };
        self.overrides.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn run(self) -> anyhow::Result<()> {
        let config = self.cluster_config()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("starting tokio runtime")?;

        match self.role {
            Role::Serve => runtime.block_on(serve(config)),
            Role::Node { no_health } => runtime.block_on(node(config, !no_health)),
        }
    }
}

async fn serve(config: ClusterConfig) -> anyhow::Result<()> {
    let oplog: Arc<dyn OpLog> = match &config.log_path {
        Some(path) => {
            let header = LogHeader {
                virtual_replicas: config.virtual_replicas,
                expire_secs: config.expire_secs,
            };
            let log = FileOpLog::open(path, header)
                .with_context(|| format!("opening {}", path.display()))?;
            Arc::new(log)
        }
        None => Arc::new(NullOpLog),
    };

    let router: Arc<Router> = Arc::new(Router::with_oplog(config.clone(), oplog)?);
    let router_listener = TcpListener::bind(config.router_addr)
        .await
        .with_context(|| format!("binding router to {}", config.router_addr))?;
    tokio::spawn(Arc::clone(&router).serve(router_listener));

    let (monitor, dead_nodes) = HealthMonitor::new(&config)?;
    let health_listener = TcpListener::bind(config.health_addr)
        .await
        .with_context(|| format!("binding health monitor to {}", config.health_addr))?;
    tokio::spawn(Arc::clone(&monitor).serve(health_listener));

    router.consume_dead_nodes(dead_nodes);
    monitor.spawn_summary();
    let sink: Arc<dyn ReportSink> = router.clone();
    monitor.spawn_reporter(sink, config.report_interval());

    info!("Type `help` for the list of commands");
    console(&router).await
}

async fn console(router: &Router) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let cmd = match line.parse::<Command>() {
            Ok(cmd) => cmd,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        match commands::execute(router, cmd).await {
            Ok(CommandResult::Quit) => break,
            Ok(result) => println!("{}", result),
            Err(e) => {
                warn!("{}", e);
                println!("error: {}", e);
            }
        }
    }
    Ok(())
}

async fn node(config: ClusterConfig, with_health: bool) -> anyhow::Result<()> {
    let node = if with_health {
        CacheNode::connect(&config).await
    } else {
        CacheNode::connect_without_health(&config).await
    }
    .with_context(|| format!("joining router at {}", config.router_addr))?;

    info!("Serving as node {}", node.id());
    node.wait().await;
    info!("Router went away; shutting down");
    Ok(())
}
