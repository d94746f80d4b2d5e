//! Stream a workflow run to stdout, answering interrupts from stdin.
//!
//! Run with:
//! ```bash
//! WORKFLOW_API_TOKEN=pat_... WORKFLOW_ID=74... cargo run --example stream_workflow -- "your input"
//! ```

use std::error::Error;
use std::io::{self, BufRead, Write};

use serde_json::json;
use workflow_client::{Client, StreamOutcome, WorkflowEventStream};

async fn drain(stream: WorkflowEventStream) -> Result<StreamOutcome, Box<dyn Error>> {
    let outcome = stream.collect().await?;
    println!("{}", outcome.content);
    if let Some(err) = &outcome.error {
        eprintln!("workflow error {}: {}", err.error_code, err.error_message);
    }
    Ok(outcome)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let input = std::env::args().nth(1).unwrap_or_else(|| "hello".to_string());
    let client = Client::from_env()?;
    let workflows = client.workflows();

    // Quick one-shot run first.
    let once = workflows
        .run::<_, serde_json::Value>(&json!({ "input": input }))
        .await?;
    println!("=== Run ===");
    println!("code={} data={:?}", once.code, once.data);
    if !once.debug_url.is_empty() {
        println!("debug: {}", once.debug_url);
    }

    println!("=== Stream ===");
    let mut outcome = drain(workflows.run_stream(&json!({ "input": input })).await?).await?;

    while let Some(interrupt) = outcome.interrupt.take() {
        print!("[{}] > ", interrupt.node_title);
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        outcome = drain(
            workflows
                .resume_interrupt(&interrupt, answer.trim().to_string())
                .await?,
        )
        .await?;
    }

    Ok(())
}
