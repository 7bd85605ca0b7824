//! Smithers CLI - binary entry point.
//!
//! # Architecture
//!
//! The binary wires together the durable store, tool registry, and
//! provider credentials, then drives [`smithers_engine::TurnController`]
//! at a fixed cadence. Rendering and keystroke handling are out of scope
//! here (they belong to a terminal front end); this binary is the
//! reference driver that proves the engine runs end to end against real
//! stdin/stdout.
//!
//! # Event Loop
//!
//! Uses a fixed 8ms tick cadence:
//!
//! 1. Wait for the tick interval
//! 2. Drain queued stdin lines (non-blocking, fed by a dedicated reader task)
//! 3. Advance the controller (`controller.tick()`)
//! 4. Drain and print engine events

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use smithers_core::{AppConfig, EnvironmentContext};
use smithers_engine::TurnController;
use smithers_store::SqliteStore;
use smithers_tools::{EditFileTool, MapToolRegistry, ReadFileTool, RunCommandTool, WriteFileTool};

const TICK_DURATION: Duration = Duration::from_millis(8);

fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn smithers_db_path() -> PathBuf {
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("smithers").join("smithers.db")
}

fn open_store(path: &PathBuf) -> SqliteStore {
    if let Some(parent) = path.parent()
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        tracing::warn!(%err, path = %parent.display(), "failed to create data directory, falling back to an in-memory store");
        return SqliteStore::open_in_memory().expect("in-memory sqlite store always opens");
    }

    match SqliteStore::open(path) {
        Ok(store) => store,
        Err(err) => {
            tracing::warn!(%err, path = %path.display(), "failed to open durable store, falling back to an in-memory store");
            SqliteStore::open_in_memory().expect("in-memory sqlite store always opens")
        }
    }
}

fn build_registry() -> Arc<dyn smithers_tools::ToolRegistry> {
    let mut registry = MapToolRegistry::new();
    registry.register(Box::new(ReadFileTool));
    registry.register(Box::new(WriteFileTool));
    registry.register(Box::new(EditFileTool));
    registry.register(Box::new(RunCommandTool));
    Arc::new(registry)
}

/// Spawns a blocking stdin reader and forwards complete lines over an
/// unbounded channel, so the tick loop can drain input non-blockingly.
fn spawn_stdin_pump() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_event(event: &smithers_types::AgentEvent) {
    use smithers_types::AgentEvent;
    match event {
        AgentEvent::AgentStart => println!("\n--- turn start ---"),
        AgentEvent::TurnStart { turn_no } => println!("[round {turn_no}]"),
        AgentEvent::MessageStart { .. } => {}
        AgentEvent::MessageUpdate { delta_text, .. } => {
            print!("{delta_text}");
            let _ = std::io::Write::flush(&mut std::io::stdout());
        }
        AgentEvent::MessageEnd { .. } => println!(),
        AgentEvent::ToolStart { name, call_id, .. } => println!("[tool {name} ({call_id}) running]"),
        AgentEvent::ToolEnd { name, result, is_error, .. } => {
            let status = if *is_error { "failed" } else { "ok" };
            println!("[tool {name} {status}] {}", result.content);
        }
        AgentEvent::TurnEnd { .. } => {}
        AgentEvent::AgentEnd => println!("--- turn end ---"),
        AgentEvent::AgentError { message } => eprintln!("error: {message}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env();
    init_tracing(&config.tracing_filter);

    let db_path = smithers_db_path();
    let store = open_store(&db_path);
    let registry = build_registry();
    let environment = EnvironmentContext::gather();
    let system_prompt = environment.render(&format!("{}/{}", config.model.provider().display_name(), config.model.model_id()));

    let mut controller = TurnController::new(
        store,
        registry,
        config.model,
        Arc::new(|key: &str| std::env::var(key).ok()),
        config.compaction,
        Some(system_prompt),
    );
    controller.recover_on_startup().context("crash recovery sweep failed")?;

    println!("smithers ready. Type a message and press enter; \"/cancel\" interrupts an in-flight turn.");

    let mut stdin_rx = spawn_stdin_pump();
    let mut ticks = tokio::time::interval(TICK_DURATION);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticks.tick() => {}
            line = stdin_rx.recv() => {
                match line {
                    Some(line) if line.trim() == "/cancel" => controller.cancel(),
                    Some(line) if !line.trim().is_empty() => controller.submit(line),
                    Some(_) => {}
                    None => break,
                }
            }
        }

        controller.tick(std::time::Instant::now());
        for event in controller.drain_events() {
            print_event(&event);
        }
    }

    Ok(())
}
