//! `deltaflow chat` — Interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use deltaflow_agent::{AgentStreamEvent, RoundLoop};
use deltaflow_config::AppConfig;
use deltaflow_core::message::ConversationId;
use deltaflow_core::tool::ToolRegistry;
use deltaflow_memory::InMemoryConversationStore;
use deltaflow_providers::OpenAiCompatProvider;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    message: Option<String>,
    partial: bool,
    model: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(model) = model {
        config.model = model;
    }
    if partial {
        config.agent.stream_partial_content = true;
    }

    // Check for API key early — give a clear error
    if !config.has_api_key() && config.api_url.contains("api.openai.com") {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    DELTAFLOW_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = Arc::new(OpenAiCompatProvider::from_config(&config)?);
    let round_loop = RoundLoop::from_config(
        &config,
        provider,
        Arc::new(ToolRegistry::new()),
        Arc::new(InMemoryConversationStore::new()),
    );
    let conversation_id = ConversationId::new();
    tracing::debug!(conversation_id = %conversation_id, model = %config.model, "Chat session started");

    if let Some(msg) = message {
        // Single message mode
        let ok = print_turn(&round_loop, &conversation_id, msg).await?;
        if !ok {
            return Err("Turn did not complete".into());
        }
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  deltaflow — interactive mode");
    println!();
    println!("  Endpoint:  {}", config.api_url);
    println!("  Model:     {}", config.model);
    println!(
        "  Streaming: {}",
        if config.agent.stream_partial_content {
            "partial"
        } else {
            "final answers only"
        }
    );
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        println!();
        print!("  Assistant > ");
        std::io::stdout().flush()?;
        print_turn(&round_loop, &conversation_id, line.to_string()).await?;
        println!();
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Run one turn and print its events. Returns whether the turn succeeded.
async fn print_turn(
    round_loop: &RoundLoop,
    conversation_id: &ConversationId,
    message: String,
) -> Result<bool, Box<dyn std::error::Error>> {
    let mut rx = round_loop.run_turn_stream(conversation_id.clone(), message);
    let mut ok = false;

    while let Some(event) = rx.recv().await {
        match event {
            AgentStreamEvent::Chunk { content } => {
                print!("{content}");
                std::io::stdout().flush()?;
            }
            AgentStreamEvent::ToolCalls { calls, .. } => {
                for call in calls {
                    eprintln!("\n  [tool] {}({})", call.name, call.arguments);
                }
            }
            AgentStreamEvent::ToolResult { name, success, .. } => {
                let status = if success { "ok" } else { "failed" };
                eprintln!("  [tool] {name} {status}");
            }
            AgentStreamEvent::FinalAnswer { .. } => {
                println!();
                ok = true;
            }
            AgentStreamEvent::DirectOutput { content, .. } => {
                println!("{content}");
                ok = true;
            }
            AgentStreamEvent::Error { message, .. } => {
                eprintln!("\n  [Error] {message}");
            }
        }
    }

    Ok(ok)
}
