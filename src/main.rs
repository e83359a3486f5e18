// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Mutex as AsyncMutex;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};

use orb_behavior::{BehaviorMatcher, FallbackBehavior, Orchestrator};
use orb_bridge::{BrainCerebellumBridge, CommandBroadcaster};
use orb_config::CoreConfig;
use orb_core::{AgentLoop, ContextBuilder, HookRegistry, SessionStore};
use orb_memory::{MemoryStream, RankerWeights};
use orb_model::{MockProvider, ModelProvider};
use orb_tools::builtin::{MemoryGetTool, MemorySearchTool, MemoryWriteTool, ShellJobTool, ShellMode, ShellTool};
use orb_tools::{ToolExecutor, ToolPolicy, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(Commands::ShowConfig) = &cli.command {
        let config = orb_config::load(cli.config.as_deref())?;
        println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
        return Ok(());
    }
    if let Some(Commands::Completions { shell }) = &cli.command {
        cli::print_completions(*shell);
        return Ok(());
    }

    let config = orb_config::load(cli.config.as_deref()).context("loading configuration")?;
    let runtime = Runtime::build(&cli.agent_id, config).await?;

    match cli.command {
        Some(Commands::Process { text }) => {
            let input = match text {
                Some(t) => t,
                None => read_all_stdin()?,
            };
            let result = runtime.orchestrator.process(input.trim()).await;
            print_result(&result);
        }
        Some(Commands::Serve) | None => {
            run_stdin_loop(&runtime).await?;
        }
        Some(Commands::EmergencyStop) => {
            let cancelled = runtime.orchestrator.emergency_stop().await;
            println!("cancelled {cancelled} in-flight command(s)");
        }
        Some(Commands::ShowConfig) | Some(Commands::Completions { .. }) => unreachable!("handled above"),
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();
}

fn read_all_stdin() -> anyhow::Result<String> {
    let mut buf = String::new();
    io::stdin().lock().read_line(&mut buf)?;
    Ok(buf)
}

fn print_result(result: &orb_behavior::ProcessResult) {
    println!("{}", result.chat_response);
    if !result.ros2_commands.is_empty() {
        let types: Vec<&str> = result.ros2_commands.iter().map(|c| c.command_type.as_str()).collect();
        eprintln!("commands dispatched: {}", types.join(", "));
    }
    if let Some(err) = &result.error {
        eprintln!("error: {err}");
    }
}

async fn run_stdin_loop(runtime: &Runtime) -> anyhow::Result<()> {
    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            print!("> ");
            io::stdout().flush().ok();
            continue;
        }
        let result = runtime.orchestrator.process(line.trim()).await;
        print_result(&result);
        print!("> ");
        io::stdout().flush().ok();
    }
    Ok(())
}

/// Everything the harness wires together: one session store, one agent loop,
/// one behavior matcher/fallback, one bridge, and (if not in mock mode) one
/// broadcaster, all scoped to a single agent id and its main session.
struct Runtime {
    orchestrator: Orchestrator,
}

impl Runtime {
    async fn build(agent_id: &str, config: CoreConfig) -> anyhow::Result<Self> {
        let session_root = orb_config::state_dir_for(agent_id).join("sessions");
        let session_store = Arc::new(SessionStore::new(session_root)?);

        let context_builder = Arc::new(ContextBuilder::new(config.context_builder.clone(), config.memory_ranker.clone()));

        let provider: Arc<dyn ModelProvider> = match config.llm.provider.as_str() {
            "mock" => Arc::new(MockProvider),
            other => {
                tracing::warn!(provider = other, "no vendor provider wired into this harness, falling back to the mock provider");
                Arc::new(MockProvider)
            }
        };

        let memories = Arc::new(AsyncMutex::new(MemoryStream::new()));
        let ranker_weights = RankerWeights {
            recency: config.memory_ranker.recency,
            importance: config.memory_ranker.importance,
            relevance: config.memory_ranker.relevance,
            frequency: config.memory_ranker.frequency,
            context_affinity: config.memory_ranker.context_affinity,
        };

        let shell_mode = match config.tool_policy.shell.mode.as_str() {
            "allowlist" => ShellMode::Allowlist,
            "full" => ShellMode::Full,
            _ => ShellMode::Deny,
        };
        let shell_tool = ShellTool::new(shell_mode)
            .with_allowlist(config.tool_policy.shell.allowlist.clone())
            .with_deny(config.tool_policy.shell.deny.clone());
        let shell_jobs = shell_tool.jobs.clone();

        let mut tool_registry = ToolRegistry::new();
        tool_registry.register(shell_tool);
        tool_registry.register(ShellJobTool::new(shell_jobs));
        tool_registry.register(MemoryWriteTool::new(memories.clone()));
        tool_registry.register(MemorySearchTool::new(memories.clone(), ranker_weights));
        tool_registry.register(MemoryGetTool::new(memories.clone()));
        let tool_registry = Arc::new(tool_registry);

        let policy = ToolPolicy::new(config.tool_policy.allow.clone(), config.tool_policy.deny.clone(), config.tool_policy.profile.clone());
        let tool_executor = Arc::new(ToolExecutor::new(tool_registry.clone(), policy));

        let agent_loop = Arc::new(AgentLoop::new(
            config.agent.clone(),
            config.compactor.clone(),
            session_store.clone(),
            context_builder,
            provider,
            tool_registry,
            tool_executor,
            HookRegistry::new(),
        ));

        // Additional domain-specific behaviors would be `matcher.register(...)`-ed
        // here; the fallback alone is enough for this harness to be useful.
        let matcher = BehaviorMatcher::new(config.behavior.match_threshold, Arc::new(FallbackBehavior::new(Some(agent_loop), config.behavior.fallback_confidence)));

        let broadcaster = if config.bridge.mock {
            None
        } else {
            let broadcaster = Arc::new(CommandBroadcaster::new(config.bridge.broadcaster_host.clone(), config.bridge.broadcaster_port));
            if let Err(e) = broadcaster.start().await {
                tracing::warn!(error = %e, "command broadcaster failed to start, continuing without it");
            }
            Some(broadcaster)
        };
        let mut bridge = BrainCerebellumBridge::new(config.bridge.mock);
        if let Some(broadcaster) = &broadcaster {
            bridge = bridge.with_broadcaster(broadcaster.clone());
        }
        let bridge = Arc::new(bridge);

        let session_key = format!("agent:{agent_id}:main");
        let orchestrator = Orchestrator::new(
            matcher,
            bridge,
            broadcaster,
            memories,
            session_store,
            config.session_store.reset_policy.clone(),
            agent_id.to_string(),
            session_key,
        );

        Ok(Self { orchestrator })
    }
}
