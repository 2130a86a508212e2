//! Console commands accepted by `shardcache serve`.

use anyhow::{anyhow, bail, Context};
use cluster::{NodeEntry, Router, Stats};
use corelib::NodeId;
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite};
use wire::{Reply, Value};

pub const HELP: &str = "\
commands:
  stats                 query count and hit ratio
  nodes                 registered nodes and their health
  ring                  share of the key space per node
  evict <id>            remove a node from the ring and the registry
  get <key>
  set <key> <value>     integers are stored as integers, anything else as text
  del <key>
  add <key> <delta>
  incr <key>
  decr <key>
  help
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Stats,
    Nodes,
    Ring,
    Evict(NodeId),
    Cache(wire::Command),
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| anyhow!("empty command"))?;
        let args: Vec<&str> = words.collect();

        let cmd = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("stats", []) => Command::Stats,
            ("nodes", []) => Command::Nodes,
            ("ring", []) => Command::Ring,
            ("help", []) => Command::Help,
            ("quit" | "exit", []) => Command::Quit,
            ("evict", [id]) => {
                let id: u64 = id.parse().with_context(|| format!("invalid node id {:?}", id))?;
                Command::Evict(NodeId(id))
            }
            ("get", [key]) => Command::Cache(wire::Command::get(*key)?),
            ("set", [key, value @ ..]) if !value.is_empty() => {
                Command::Cache(wire::Command::set(*key, parse_value(&value.join(" ")))?)
            }
            ("del" | "delete", [key]) => Command::Cache(wire::Command::delete(*key)?),
            ("add", [key, delta]) => {
                let delta: i64 = delta
                    .parse()
                    .with_context(|| format!("invalid delta {:?}", delta))?;
                Command::Cache(wire::Command::add(*key, delta)?)
            }
            ("incr", [key]) => Command::Cache(wire::Command::add(*key, 1)?),
            ("decr", [key]) => Command::Cache(wire::Command::add(*key, -1)?),
            _ => bail!("unrecognized command {:?}; try `help`", line.trim()),
        };
        Ok(cmd)
    }
}

fn parse_value(text: &str) -> Value {
    match text.parse::<i64>() {
        Ok(n) => Value::Int(n),
        Err(_) => Value::Text(text.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Stats(Stats),
    Nodes(Vec<NodeEntry>),
    Ring(Vec<(NodeId, f64)>),
    Evicted { node: NodeId, existed: bool },
    Reply(Reply),
    Help,
    Quit,
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Stats(stats) => write!(f, "{}", stats),
            CommandResult::Nodes(nodes) if nodes.is_empty() => write!(f, "no nodes registered"),
            CommandResult::Nodes(nodes) => {
                for (i, entry) in nodes.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{:>4}  {:<22} {}", entry.id.0, entry.addr, entry.health)?;
                }
                Ok(())
            }
            CommandResult::Ring(shares) if shares.is_empty() => write!(f, "ring is empty"),
            CommandResult::Ring(shares) => {
                for (i, (id, share)) in shares.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{:>4}  {:>6.2}%", id.0, share * 100.0)?;
                }
                Ok(())
            }
            CommandResult::Evicted { node, existed: true } => write!(f, "evicted node {}", node),
            CommandResult::Evicted { node, existed: false } => {
                write!(f, "node {} is not registered", node)
            }
            CommandResult::Reply(reply) => write!(f, "{}", reply),
            CommandResult::Help => write!(f, "{}", HELP),
            CommandResult::Quit => write!(f, "bye"),
        }
    }
}

/// Run one console command against `router`.
pub async fn execute<S>(router: &Router<S>, cmd: Command) -> anyhow::Result<CommandResult>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let result = match cmd {
        Command::Stats => CommandResult::Stats(router.stats()),
        Command::Nodes => CommandResult::Nodes(router.nodes()),
        Command::Ring => CommandResult::Ring(router.ring().ownership()),
        Command::Evict(node) => CommandResult::Evicted {
            node,
            existed: router.evict_node(node),
        },
        Command::Cache(cmd) => CommandResult::Reply(router.route(cmd).await?),
        Command::Help => CommandResult::Help,
        Command::Quit => CommandResult::Quit,
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster::ClusterConfig;
    use tokio::io::DuplexStream;

    #[test]
    fn test_parse_admin_commands() {
        assert_eq!("stats".parse::<Command>().unwrap(), Command::Stats);
        assert_eq!("  NODES ".parse::<Command>().unwrap(), Command::Nodes);
        assert_eq!("evict 3".parse::<Command>().unwrap(), Command::Evict(NodeId(3)));
        assert!("evict three".parse::<Command>().is_err());
        assert!("evict".parse::<Command>().is_err());
    }

    #[test]
    fn test_parse_cache_commands() {
        assert_eq!(
            "set x 42".parse::<Command>().unwrap(),
            Command::Cache(wire::Command::set("x", 42i64).unwrap())
        );
        assert_eq!(
            "set greeting hello world".parse::<Command>().unwrap(),
            Command::Cache(wire::Command::set("greeting", "hello world").unwrap())
        );
        assert_eq!(
            "decr hits".parse::<Command>().unwrap(),
            Command::Cache(wire::Command::add("hits", -1).unwrap())
        );
        assert!("set x".parse::<Command>().is_err());
        assert!("add x lots".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
        assert!("flush".parse::<Command>().is_err());
    }

    #[tokio::test]
    async fn test_execute_on_empty_router() {
        let router: Router<DuplexStream> = Router::new(ClusterConfig::default()).unwrap();

        let stats = execute(&router, Command::Stats).await.unwrap();
        assert_eq!(stats.to_string(), "total queries: 0, hit ratio: undefined");

        let evicted = execute(&router, Command::Evict(NodeId(9))).await.unwrap();
        assert_eq!(
            evicted,
            CommandResult::Evicted {
                node: NodeId(9),
                existed: false
            }
        );

        let get = "get x".parse::<Command>().unwrap();
        assert!(execute(&router, get).await.is_err());
    }
}
