//! Basic usage: one completion and one stream through the same client
//!
//! Run with: OPENAI_API_KEY=... cargo run --example basic_usage
//! Set RUST_LOG=ullm_core=debug to watch resolution and retries.

use futures::StreamExt;
use tracing_subscriber::EnvFilter;
use ullm_core::{Client, CompletionRequest, Message};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ullm_core=info")),
        )
        .init();

    let model = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openai/gpt-4o-mini".to_string());
    let client = Client::new()?;

    let request = CompletionRequest::new(
        model.as_str(),
        vec![
            Message::system("You answer in one short sentence."),
            Message::user("What is a borrow checker?"),
        ],
    )
    .with_max_tokens(64);

    let response = client.acomplete(&request).await?;
    println!("[{}] {}", response.qualified_model(), response.content().unwrap_or(""));
    if let Some(usage) = &response.usage {
        println!("tokens: {} in / {} out", usage.prompt_tokens, usage.completion_tokens);
    }

    let mut stream = client
        .acomplete_stream(&CompletionRequest::new(
            model.as_str(),
            vec![Message::user("Count from one to five.")],
        ))
        .await?;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if let Some(text) = chunk.delta.content.as_deref() {
            print!("{}", text);
        }
        if let Some(reason) = chunk.finish_reason {
            println!("\n(finished: {})", reason);
        }
    }

    Ok(())
}
