use redpanda_agents::{runtime, Agent, FunctionTool, ToolOutput};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize, JsonSchema)]
struct WeatherQuery {
    /// City name, e.g. "Amsterdam".
    city: String,
}

fn current_weather() -> redpanda_agents::Result<FunctionTool> {
    FunctionTool::typed(
        "current_weather",
        "Look up the current weather for a city.",
        |query: WeatherQuery| async move {
            // Fixed reading; swap in a real weather API for production use.
            Ok(ToolOutput::Value(json!({
                "city": query.city,
                "conditions": "partly cloudy",
                "celsius": 17,
            })))
        },
    )
}

#[tokio::main]
async fn main() -> redpanda_agents::Result<()> {
    let agent = Agent::new("WeatherAgent", "openai/gpt-4o")
        .with_instructions("You are a helpful AI agent for finding out about the weather.")
        .with_tool(current_weather()?);

    runtime::serve(agent).await
}
