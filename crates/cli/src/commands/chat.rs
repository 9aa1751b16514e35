//! `dawpilot chat`: talk to the assistant from the terminal.
//!
//! No executor is attached, so DAW actions time out; `get_session_state`
//! and `search_library` still answer locally.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::bail;
use dawpilot_agent::{AgentStreamEvent, Orchestrator};
use dawpilot_core::event::EventBus;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::load_config;

pub async fn run(config_path: Option<&Path>, message: Option<String>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured for '{}'.", config.default_provider);
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    ANTHROPIC_API_KEY=sk-ant-...");
        eprintln!("    OPENAI_API_KEY=sk-...        (with DAWPILOT_PROVIDER=openai)");
        eprintln!();
        eprintln!("  Or add it to {}", config_location(config_path));
        eprintln!();
        bail!("no API key found");
    }

    let provider = dawpilot_providers::build_provider(&config, &config.default_provider)?;
    let orchestrator = Orchestrator::from_config(&config, provider, Arc::new(EventBus::default()));

    if let Some(message) = message {
        return run_turn(&orchestrator, message).await;
    }

    println!();
    println!("  dawpilot chat ({} / {})", config.default_provider, config.default_model);
    println!("  Type your message and press Enter. 'clear' starts over, 'exit' quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "exit" | "quit" => break,
            "clear" => {
                orchestrator.clear();
                println!("  (conversation cleared)");
            }
            text => {
                if let Err(e) = run_turn(&orchestrator, text.to_string()).await {
                    eprintln!("  {e}");
                }
            }
        }
    }

    Ok(())
}

/// Run one turn, printing events as they arrive.
async fn run_turn(orchestrator: &Orchestrator, message: String) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel(256);
    let printer = tokio::spawn(async move {
        let mut failure = None;
        while let Some(event) = rx.recv().await {
            if let Some(error) = print_event(&event) {
                failure = Some(error);
            }
        }
        failure
    });

    let outcome = orchestrator.run_turn(message, &tx).await;
    drop(tx);
    let failure = printer.await?;

    if let Some(error) = failure {
        bail!(error);
    }
    let outcome = outcome?;
    let cost = orchestrator.cost_summary();
    eprintln!(
        "  [{} round(s), {} tool call(s), {} tokens, ${:.4}]",
        outcome.rounds, outcome.tool_calls, cost.total_tokens, cost.total_cost_usd
    );
    Ok(())
}

/// Print one event. Returns the message of an `error` event.
fn print_event(event: &AgentStreamEvent) -> Option<String> {
    match event {
        AgentStreamEvent::Text { content } => {
            print!("{content}");
            let _ = std::io::stdout().flush();
        }
        AgentStreamEvent::ToolUse { name, input, .. } => {
            eprintln!("\n  -> {name} {input}");
        }
        AgentStreamEvent::ActionResult { name, result, is_error, .. } => {
            if *is_error {
                eprintln!("  <- {name} failed: {result}");
            } else {
                eprintln!("  <- {name} ok");
            }
        }
        AgentStreamEvent::TokenUsage { .. } => {}
        AgentStreamEvent::Done { .. } => println!(),
        AgentStreamEvent::Error { kind, message } => {
            println!();
            return Some(format!("{kind}: {message}"));
        }
    }
    None
}

fn config_location(explicit: Option<&Path>) -> String {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| dawpilot_config::AppConfig::config_dir().join("config.toml"))
        .display()
        .to_string()
}
