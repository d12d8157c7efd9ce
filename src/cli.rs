//! CLI argument and console command parsing

use agent_mesh::config::NodeConfig;
use agent_mesh::mesh::AgentRole;
use agent_mesh::utils::parse_size;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

/// Default listen address when `--swarm` is given without a value
pub const DEFAULT_SWARM_LISTEN: &str = "/ip4/0.0.0.0/tcp/0";

#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub verbose: bool,
    pub namespace: Option<String>,
    pub search_url: Option<String>,
    pub corpus_dir: Option<PathBuf>,
    /// One-shot: route a task of this many bytes and exit
    pub route: Option<u64>,
    /// One-shot: route this layer index and exit
    pub layer: Option<usize>,
    /// One-shot: print the capability summary and exit
    pub capability: bool,
    /// Swarm mode: None = disabled, Some(listen address) = enabled
    pub swarm: Option<String>,
    pub peers: Vec<String>,
}

impl CliArgs {
    pub fn is_one_shot(&self) -> bool {
        self.route.is_some() || self.layer.is_some() || self.capability
    }

    /// Flags override config files and environment
    pub fn apply(&self, config: &mut NodeConfig) {
        if let Some(ns) = &self.namespace {
            config.namespace = ns.clone();
        }
        if let Some(url) = &self.search_url {
            config.search_url = Some(url.clone());
        }
        if let Some(dir) = &self.corpus_dir {
            config.corpus_dir = Some(dir.clone());
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "agent-mesh")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Coordination core for a mesh of cooperating autonomous agents")]
struct Args {
    /// Config file; wins over the cascading .agent-mesh.config files
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, default_value = "false")]
    verbose: bool,

    /// Delta topic namespace (default: mesh.kv_cache)
    #[arg(long)]
    namespace: Option<String>,

    /// Remote search endpoint
    #[arg(long)]
    search_url: Option<String>,

    /// Directory scanned when remote search fails
    #[arg(long)]
    corpus_dir: Option<PathBuf>,

    /// Print the execution target for a task size (e.g. "32MiB") and exit
    #[arg(long, value_name = "SIZE")]
    route: Option<String>,

    /// Print the execution target for a model layer index and exit
    #[arg(long, value_name = "N")]
    layer: Option<usize>,

    /// Print this node's capability summary and exit
    #[arg(long, default_value = "false")]
    capability: bool,

    /// Join the P2P swarm, optionally on a given listen multiaddr
    #[arg(long, num_args = 0..=1, default_missing_value = DEFAULT_SWARM_LISTEN)]
    swarm: Option<String>,

    /// Bootstrap peer multiaddr for swarm mode (repeatable)
    #[arg(long = "peer", value_name = "MULTIADDR")]
    peers: Vec<String>,
}

/// Parse CLI arguments
pub fn parse_args() -> Result<CliArgs> {
    from_args(Args::parse())
}

#[cfg(test)]
fn parse_args_from<I, T>(iter: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    from_args(Args::try_parse_from(iter)?)
}

fn from_args(args: Args) -> Result<CliArgs> {
    let route = args
        .route
        .as_deref()
        .map(parse_size)
        .transpose()
        .context("Invalid --route size")?;

    Ok(CliArgs {
        config: args.config,
        verbose: args.verbose,
        namespace: args.namespace,
        search_url: args.search_url,
        corpus_dir: args.corpus_dir,
        route,
        layer: args.layer,
        capability: args.capability,
        swarm: args.swarm,
        peers: args.peers,
    })
}

pub const CONSOLE_HELP: &str = "\
[Mesh Console Commands]
  /register <id> [op|st] [cap,...]          - Register an agent
  /action <id> <type> [intent] [reasoning]  - Execute an agent action
  /metrics <id> <latency_ms> <tokens> <gbs> - Record performance metrics
  /result <id> <ok|fail> <label> [tools]    - Record a task result
  /contrib <source> <target> <score>        - Credit a contribution
  /agent <id>                               - Show an agent record
  /stats                                    - Per-agent performance summary
  /lock <id> | /release <id>                - Strategic lock
  /state <id>                               - Last saved action
  /route <size> | /layer <n>                - Routing decision
  /infer <id> <prompt>                      - Simulated inference
  /search <id> <query>                      - Deduplicated search
  /delta <id> <text>                        - Broadcast a state delta
  /capability                               - Hardware capability summary
  /peers                                    - Swarm status
  /quit                                     - Exit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Register {
        id: String,
        role: AgentRole,
        capabilities: Vec<String>,
    },
    Action {
        id: String,
        action_type: String,
        intent: String,
        reasoning: String,
    },
    Metrics {
        id: String,
        latency_ms: f32,
        tokens: u32,
        throughput_gbs: f32,
    },
    Result {
        id: String,
        success: bool,
        label: String,
        tool_calls: u32,
    },
    Contribution {
        source: String,
        target: String,
        score: f64,
    },
    Agent { id: String },
    Stats,
    Lock { id: String },
    Release { id: String },
    State { id: String },
    Route { size: u64 },
    Layer { index: usize },
    Infer { id: String, prompt: String },
    Search { id: String, query: String },
    Delta { id: String, payload: String },
    Capability,
    Peers,
    Help,
    Quit,
}

fn arg<'a>(parts: &[&'a str], idx: usize, usage: &str) -> Result<&'a str> {
    parts
        .get(idx)
        .copied()
        .ok_or_else(|| anyhow!("Usage: {}", usage))
}

fn number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("Invalid {}: {}", what, value))
}

fn rest(parts: &[&str], from: usize) -> String {
    parts.get(from..).map(|p| p.join(" ")).unwrap_or_default()
}

impl ConsoleCommand {
    /// Parse one console line; `None` for blank input
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = match parts[0] {
            "/register" => {
                let usage = "/register <id> [op|st] [cap,...]";
                let id = arg(&parts, 1, usage)?.to_string();
                let role = match parts.get(2) {
                    Some(role) => role.parse::<AgentRole>().map_err(|e| anyhow!("{}", e))?,
                    None => AgentRole::Operational,
                };
                let capabilities = parts
                    .get(3)
                    .map(|caps| {
                        caps.split(',')
                            .filter(|c| !c.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                ConsoleCommand::Register {
                    id,
                    role,
                    capabilities,
                }
            }
            "/action" => {
                let usage = "/action <id> <type> [intent] [reasoning]";
                ConsoleCommand::Action {
                    id: arg(&parts, 1, usage)?.to_string(),
                    action_type: arg(&parts, 2, usage)?.to_string(),
                    intent: parts.get(3).map(|s| s.to_string()).unwrap_or_default(),
                    reasoning: rest(&parts, 4),
                }
            }
            "/metrics" => {
                let usage = "/metrics <id> <latency_ms> <tokens> <gbs>";
                ConsoleCommand::Metrics {
                    id: arg(&parts, 1, usage)?.to_string(),
                    latency_ms: number(arg(&parts, 2, usage)?, "latency")?,
                    tokens: number(arg(&parts, 3, usage)?, "token count")?,
                    throughput_gbs: number(arg(&parts, 4, usage)?, "throughput")?,
                }
            }
            "/result" => {
                let usage = "/result <id> <ok|fail> <label> [tools]";
                let success = match arg(&parts, 2, usage)? {
                    "ok" | "success" | "true" => true,
                    "fail" | "failure" | "false" => false,
                    other => return Err(anyhow!("Invalid outcome: {} (use ok or fail)", other)),
                };
                ConsoleCommand::Result {
                    id: arg(&parts, 1, usage)?.to_string(),
                    success,
                    label: arg(&parts, 3, usage)?.to_string(),
                    tool_calls: match parts.get(4) {
                        Some(n) => number(n, "tool call count")?,
                        None => 0,
                    },
                }
            }
            "/contrib" => {
                let usage = "/contrib <source> <target> <score>";
                ConsoleCommand::Contribution {
                    source: arg(&parts, 1, usage)?.to_string(),
                    target: arg(&parts, 2, usage)?.to_string(),
                    score: number(arg(&parts, 3, usage)?, "score")?,
                }
            }
            "/agent" => ConsoleCommand::Agent {
                id: arg(&parts, 1, "/agent <id>")?.to_string(),
            },
            "/stats" => ConsoleCommand::Stats,
            "/lock" => ConsoleCommand::Lock {
                id: arg(&parts, 1, "/lock <id>")?.to_string(),
            },
            "/release" => ConsoleCommand::Release {
                id: arg(&parts, 1, "/release <id>")?.to_string(),
            },
            "/state" => ConsoleCommand::State {
                id: arg(&parts, 1, "/state <id>")?.to_string(),
            },
            "/route" => ConsoleCommand::Route {
                size: parse_size(arg(&parts, 1, "/route <size>")?)?,
            },
            "/layer" => ConsoleCommand::Layer {
                index: number(arg(&parts, 1, "/layer <n>")?, "layer index")?,
            },
            "/infer" => {
                let usage = "/infer <id> <prompt>";
                let id = arg(&parts, 1, usage)?.to_string();
                arg(&parts, 2, usage)?;
                ConsoleCommand::Infer {
                    id,
                    prompt: rest(&parts, 2),
                }
            }
            "/search" => {
                let usage = "/search <id> <query>";
                ConsoleCommand::Search {
                    id: arg(&parts, 1, usage)?.to_string(),
                    query: rest(&parts, 2),
                }
            }
            "/delta" => {
                let usage = "/delta <id> <text>";
                ConsoleCommand::Delta {
                    id: arg(&parts, 1, usage)?.to_string(),
                    payload: rest(&parts, 2),
                }
            }
            "/capability" | "/cap" => ConsoleCommand::Capability,
            "/peers" | "/status" => ConsoleCommand::Peers,
            "/help" | "/?" | "?" => ConsoleCommand::Help,
            "/quit" | "/exit" | "/q" => ConsoleCommand::Quit,
            other => return Err(anyhow!("Unknown command: {}. Try /help", other)),
        };

        Ok(Some(cmd))
    }
}
