//! `weather` tool — current conditions from the Open-Meteo API.

use async_trait::async_trait;
use serde::Deserialize;

use skippy_core::config::WeatherToolConfig;

use crate::{args, Tool, ToolResult};

pub struct WeatherTool {
    client: reqwest::Client,
    config: Option<WeatherToolConfig>,
}

impl WeatherTool {
    pub fn new(config: Option<WeatherToolConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WeatherArgs {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    async fn run(&self, input: serde_json::Value) -> ToolResult {
        let parsed: WeatherArgs = match args::parse(&input) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let (lat, lon) = match (parsed.latitude, parsed.longitude, &self.config) {
            (Some(lat), Some(lon), _) => (lat, lon),
            (_, _, Some(cfg)) => (cfg.latitude, cfg.longitude),
            _ => {
                return ToolResult::error(
                    "no location: pass latitude/longitude or set tools.weather in Skippy.json",
                )
            }
        };

        let url = format!(
            "https://api.open-meteo.com/v1/forecast?latitude={lat}&longitude={lon}\
             &current=temperature_2m,apparent_temperature,precipitation,wind_speed_10m,weather_code"
        );
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("weather request failed: {e}")),
        };
        if !resp.status().is_success() {
            return ToolResult::error(format!("weather endpoint returned {}", resp.status()));
        }
        match resp.json::<serde_json::Value>().await {
            Ok(body) => {
                ToolResult::success(serde_json::json!({ "current": body.get("current") }))
            }
            Err(e) => ToolResult::error(format!("unreadable weather response: {e}")),
        }
    }

    fn context(&self) -> String {
        r#"Operations:
- {latitude?, longitude?} -> {current: {temperature_2m, apparent_temperature, precipitation, wind_speed_10m, weather_code}}
Falls back to the configured home location when no coordinates are given."#
            .to_string()
    }
}
