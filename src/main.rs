mod cli;

use agent_mesh::config::NodeConfig;
use agent_mesh::config_loader;
use agent_mesh::inference::InferenceRequest;
use agent_mesh::logger;
use agent_mesh::mesh::{AgentAction, LockOutcome};
use agent_mesh::scheinfer::ScheInfer;
use agent_mesh::search::SearchRequest;
use agent_mesh::utils::format_size;
use agent_mesh::MeshNode;
use anyhow::Result;
use cli::{CliArgs, ConsoleCommand, CONSOLE_HELP};
use std::io::{IsTerminal, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args()?;

    logger::init(args.verbose);

    info!("agent-mesh v{}", env!("CARGO_PKG_VERSION"));

    let file = config_loader::load_cascading_config(args.config.as_deref())?;
    let mut config = NodeConfig::from_file(&file)?;
    config.apply_env();
    args.apply(&mut config);
    config.validate()?;

    if args.is_one_shot() {
        run_one_shot(&args, &config)?;
        return Ok(());
    }

    if args.swarm.is_some() {
        #[cfg(feature = "swarm")]
        {
            return run_swarm_mode(args, config).await;
        }

        #[cfg(not(feature = "swarm"))]
        {
            agent_mesh::swarm::swarm_not_available();
            std::process::exit(1);
        }
    }

    let node = MeshNode::new(config)?;
    run_console(node, None).await
}

fn run_one_shot(args: &CliArgs, config: &NodeConfig) -> Result<()> {
    let scheduler = ScheInfer::new(config.hardware_profile()?);

    if args.capability {
        println!("{}", scheduler.mesh_capability());
    }
    if let Some(size) = args.route {
        println!("{}", scheduler.route_task(size));
    }
    if let Some(layer) = args.layer {
        println!("{}", scheduler.route_layer(layer));
    }
    Ok(())
}

#[cfg(feature = "swarm")]
async fn run_swarm_mode(args: CliArgs, config: NodeConfig) -> Result<()> {
    use agent_mesh::swarm::{spawn_swarm, NodeEvent, SwarmConfig};
    use std::sync::Arc;

    let capability = ScheInfer::new(config.hardware_profile()?).mesh_capability();
    let mut swarm_config = SwarmConfig::new(config.namespace.clone(), capability);
    if let Some(listen) = &args.swarm {
        swarm_config.listen_addr = listen.clone();
    }
    swarm_config.bootstrap_peers = args.peers.clone();

    let (broadcaster, mut event_rx) = spawn_swarm(swarm_config)?;
    let broadcaster = Arc::new(broadcaster);
    let node = MeshNode::with_broadcaster(config, broadcaster.clone())?;

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                NodeEvent::PeerDiscovered { peer_id } => println!("\n[+] Peer discovered: {}", peer_id),
                NodeEvent::PeerLeft { peer_id } => println!("\n[-] Peer left: {}", peer_id),
                NodeEvent::NodeAnnounced(announcement) => println!(
                    "\n[*] Node {} ({}, {} agents)",
                    announcement.node_id, announcement.capability, announcement.agent_count
                ),
                NodeEvent::NodeLeft { node_id } => println!("\n[*] Node left: {}", node_id),
            }
        }
    });

    let result = run_console(node, Some(broadcaster.clone())).await;
    let _ = broadcaster.shutdown().await;
    result
}

#[cfg(feature = "swarm")]
type SwarmHandle = std::sync::Arc<agent_mesh::swarm::SwarmDeltaBroadcaster>;
#[cfg(not(feature = "swarm"))]
type SwarmHandle = ();

fn prompt(interactive: bool) {
    if interactive {
        print!("> ");
        std::io::stdout().flush().ok();
    }
}

/// Line console over stdin; ends on /quit, EOF or Ctrl+C
async fn run_console(node: MeshNode, swarm: Option<SwarmHandle>) -> Result<()> {
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            trigger.cancel();
        }
    });

    let interactive = std::io::stdin().is_terminal();
    if interactive {
        println!("{}", CONSOLE_HELP);
        println!();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt(interactive);

        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break, // EOF
            Err(e) => {
                warn!("Stdin error: {}", e);
                break;
            }
        };

        let cmd = match ConsoleCommand::parse(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        if cmd == ConsoleCommand::Quit {
            break;
        }

        if let Err(e) = execute(&node, cmd, swarm.as_ref(), &shutdown).await {
            if e.is_cancellation() {
                println!("Cancelled");
                break;
            }
            println!("Error: {}", e);
        }
    }

    Ok(())
}

async fn execute(
    node: &MeshNode,
    cmd: ConsoleCommand,
    swarm: Option<&SwarmHandle>,
    cancel: &CancellationToken,
) -> agent_mesh::Result<()> {
    match cmd {
        ConsoleCommand::Register {
            id,
            role,
            capabilities,
        } => {
            let handshake = node.handshake(&id, role, capabilities)?;
            let neighbors = node
                .registry()
                .agent(&id)
                .map(|a| a.neighbors)
                .unwrap_or_default();
            println!(
                "Registered {} as {}: session={} approved={} neighbors=[{}]",
                id,
                role,
                handshake.session_id,
                handshake.approved,
                neighbors.join(", ")
            );
            #[cfg(feature = "swarm")]
            if let Some(swarm) = swarm {
                let _ = swarm.set_agent_count(node.registry().agent_count()).await;
            }
        }

        ConsoleCommand::Action {
            id,
            action_type,
            intent,
            reasoning,
        } => {
            let action = AgentAction::new(id.clone(), action_type)
                .with_intent(intent)
                .with_reasoning(reasoning);
            let response = node.execute_action(action)?;
            println!(
                "{} -> {} (promotion_suggested={}, needs_snapshot={})",
                id, response.required_role, response.promotion_suggested, response.needs_snapshot
            );
        }

        ConsoleCommand::Metrics {
            id,
            latency_ms,
            tokens,
            throughput_gbs,
        } => {
            node.registry()
                .record_metrics(&id, latency_ms, tokens, throughput_gbs)?;
            println!("Recorded metrics for {}", id);
        }

        ConsoleCommand::Result {
            id,
            success,
            label,
            tool_calls,
        } => {
            node.registry()
                .record_task_result(&id, success, &label, tool_calls);
            println!("Recorded {} result for {}", if success { "ok" } else { "fail" }, id);
        }

        ConsoleCommand::Contribution {
            source,
            target,
            score,
        } => {
            node.registry().record_contribution(&source, &target, score)?;
            let detail = node.registry().contribution_detail(&source);
            println!(
                "{} -> {}: {:.2}",
                source,
                target,
                detail.get(&target).copied().unwrap_or_default()
            );
        }

        ConsoleCommand::Agent { id } => match node.registry().agent(&id) {
            Some(record) => println!(
                "{}",
                serde_json::to_string_pretty(&record).unwrap_or_else(|_| format!("{:?}", record))
            ),
            None => println!("Unknown agent: {}", id),
        },

        ConsoleCommand::Stats => {
            let mut stats = node.registry().stats_summary();
            stats.sort_by(|a, b| a.id.cmp(&b.id));
            if stats.is_empty() {
                println!("No agents registered");
            }
            for s in stats {
                println!(
                    "{}: requests={} tokens={} avg_latency={:.1}ms",
                    s.id, s.requests, s.tokens, s.avg_latency
                );
            }
        }

        ConsoleCommand::Lock { id } => match node.request_strategic_lock(&id) {
            LockOutcome::Granted => println!("Strategic lock granted to {}", id),
            LockOutcome::Denied { holder } => println!("Denied: lock held by {}", holder),
        },

        ConsoleCommand::Release { id } => {
            node.release_lock(&id);
            match node.arbiter().holder() {
                Some(holder) => println!("Lock held by {}", holder),
                None => println!("Lock is free"),
            }
        }

        ConsoleCommand::State { id } => match node.reconstitute(&id) {
            Some(action) => println!(
                "{}",
                serde_json::to_string_pretty(&action).unwrap_or_else(|_| format!("{:?}", action))
            ),
            None => println!("No saved state for {}", id),
        },

        ConsoleCommand::Route { size } => {
            println!("{} -> {}", format_size(size), node.route_task(size));
        }

        ConsoleCommand::Layer { index } => {
            println!("layer {} -> {}", index, node.route_layer(index));
        }

        ConsoleCommand::Infer { id, prompt } => {
            let response = node
                .infer(&InferenceRequest::new(id, prompt), &cancel.child_token())
                .await?;
            println!("{}", response.text);
            println!(
                "  tokens={} latency={:.1}ms throughput={}GB/s",
                response.tokens_used, response.latency_ms, response.throughput_gbs
            );
        }

        ConsoleCommand::Search { id, query } => {
            let mut request = SearchRequest::new(id, query);
            request.max_results = 0;
            let response = node.search(&request, &cancel.child_token()).await?;
            println!("{}", response.reasoning_context);
            for result in response.results {
                println!("  [{:.2}] {}: {}", result.score, result.source, result.content);
            }
        }

        ConsoleCommand::Delta { id, payload } => {
            node.broadcast_delta(&id, payload.into_bytes()).await?;
            println!("Delta published for {}", id);
        }

        ConsoleCommand::Capability => println!("{}", node.mesh_capability()),

        ConsoleCommand::Peers => {
            #[cfg(feature = "swarm")]
            if let Some(swarm) = swarm {
                let status = swarm.status().await?;
                println!("[Status] {} ({})", status.node_id, status.peer_id);
                println!("  Peers: {}", status.peer_count);
                for peer in status.known_nodes {
                    println!("  {}: {}", peer.node_id, peer.capability);
                }
                return Ok(());
            }
            let _ = swarm;
            println!("Swarm mode is not active");
        }

        ConsoleCommand::Help => println!("{}", CONSOLE_HELP),

        ConsoleCommand::Quit => {}
    }

    Ok(())
}
