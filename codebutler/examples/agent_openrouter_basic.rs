//! Minimal agent run against OpenRouter.
//!
//! ```sh
//! OPENROUTER_API_KEY=sk-or-... cargo run --example agent_openrouter_basic
//! ```

use std::sync::Arc;

use codebutler::prelude::*;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codebutler=debug".into()),
        )
        .init();

    let api_key = std::env::var("OPENROUTER_API_KEY")
        .map_err(|_| Error::validation("set OPENROUTER_API_KEY to run this example"))?;

    let provider = Arc::new(OpenRouterProvider::new(api_key));
    let config = AgentConfig::new(
        Role::Researcher,
        "anthropic/claude-sonnet-4.5",
        "You are a concise assistant.",
    )
    .with_max_turns(4);

    // No tools: the model must answer directly.
    let runner = AgentRunner::new(config, provider, Arc::new(ToolRegistry::new()));
    let cancel = CancellationToken::new();
    let task = Task::new(
        "In two sentences, what makes an agent loop resumable?",
        "example",
        "example-thread",
    );

    let result = runner.run(&cancel, &task).await;
    println!("state: {:?}", result.state);
    println!("turns: {}", result.turns_used);
    println!("tokens: {}", result.token_usage.total_tokens);
    println!("\n{}", result.response);
    Ok(())
}
