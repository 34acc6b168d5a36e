//! Built-in tools.
//!
//! Two handlers ship by default: a pure clock lookup and a network weather
//! lookup, one of each shape the dispatcher supervises.

use crate::dispatch::Tool;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Every built-in tool, in registration order.
pub fn builtin() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(CurrentTimeTool), Arc::new(WeatherTool)]
}

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

// --- Clock ---

/// Arguments for the clock tool.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct CurrentTimeArgs {
    /// Offset from UTC in minutes; defaults to UTC when omitted.
    #[schemars(description = "Offset from UTC in minutes, e.g. -300 for New York in winter")]
    pub utc_offset_minutes: Option<i32>,
}

/// Reports the current wall-clock time.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &'static str {
        "get_current_time"
    }

    fn description(&self) -> &'static str {
        "Get the current date and time, optionally in a caller-local UTC offset."
    }

    fn parameters(&self) -> Value {
        schema_of::<CurrentTimeArgs>()
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        let args: CurrentTimeArgs = serde_json::from_value(args).context("invalid arguments")?;
        let offset_minutes = args.utc_offset_minutes.unwrap_or(0);
        let offset = FixedOffset::east_opt(offset_minutes * 60)
            .context("utc_offset_minutes out of range")?;
        let now = Utc::now().with_timezone(&offset);
        Ok(json!({
            "iso8601": now.to_rfc3339(),
            "unix": now.timestamp(),
        }))
    }
}

// --- Weather ---

/// Arguments for the weather tool.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct WeatherArgs {
    #[schemars(description = "Latitude in decimal degrees")]
    pub latitude: f64,
    #[schemars(description = "Longitude in decimal degrees")]
    pub longitude: f64,
}

/// Looks up current conditions from the open-meteo forecast API.
pub struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &'static str {
        "get_weather"
    }

    fn description(&self) -> &'static str {
        "Get the current weather at a latitude/longitude."
    }

    fn parameters(&self) -> Value {
        schema_of::<WeatherArgs>()
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        let args: WeatherArgs = serde_json::from_value(args).context("invalid arguments")?;
        let url = format!(
            "https://api.open-meteo.com/v1/forecast?latitude={}&longitude={}&current_weather=true",
            args.latitude, args.longitude
        );
        let body: Value = reqwest::get(&url)
            .await
            .context("weather request failed")?
            .error_for_status()
            .context("weather service rejected the request")?
            .json()
            .await
            .context("weather response was not JSON")?;
        Ok(json!({
            "current_weather": body.get("current_weather").cloned().unwrap_or(Value::Null),
        }))
    }
}
