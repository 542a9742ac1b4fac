use redpanda_agents::{runtime, Agent, OutputSchema};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum Status {
    Green,
    Yellow,
    Red,
}

/// Project health report.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct Output {
    summary: String,
    status: Status,
}

const INSTRUCTIONS: &str = "You are an internal agent for the Redpanda organization. \
Your job is to analyze the status of various projects and provide a summary of its current state. \
You have access to an internal drive where the status of various projects is stored.";

#[tokio::main]
async fn main() -> redpanda_agents::Result<()> {
    let agent = Agent::new("Redleader", "openai/gpt-4.1-mini")
        .with_instructions(INSTRUCTIONS)
        .with_output_schema(OutputSchema::of::<Output>()?);

    runtime::serve(agent).await
}
