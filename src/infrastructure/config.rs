use crate::domain::variable::{Color, VariableProperties, VariableProperty};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone)]
pub struct InfluxConfig {
    pub influx: InfluxSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InfluxSettings {
    pub host: String,
    pub token: String,
    pub database: String,
    pub retention_policy: String,
    #[serde(default = "default_measurement")]
    pub measurement: String,
    #[serde(default = "default_max_points")]
    pub max_points: usize,
    /// When set, samples are averaged into buckets of this many seconds.
    pub bucket_seconds: Option<u64>,
    #[serde(default)]
    pub queries: QueryTemplates,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryTemplates {
    #[serde(default = "default_raw_query")]
    pub raw: String,
    #[serde(default = "default_aggregated_query")]
    pub aggregated: String,
    #[serde(default = "default_stations_query")]
    pub stations: String,
}

impl Default for QueryTemplates {
    fn default() -> Self {
        Self {
            raw: default_raw_query(),
            aggregated: default_aggregated_query(),
            stations: default_stations_query(),
        }
    }
}

fn default_measurement() -> String {
    "weather_station".to_string()
}

fn default_max_points() -> usize {
    1440
}

fn default_raw_query() -> String {
    "SELECT \"value\" FROM ${measurement} WHERE \"station\"='${station}' \
     AND time >= ${start}ms AND time < ${end}ms GROUP BY \"variable\""
        .to_string()
}

fn default_aggregated_query() -> String {
    "SELECT mean(\"value\") FROM ${measurement} WHERE \"station\"='${station}' \
     AND time >= ${start}ms AND time < ${end}ms GROUP BY time(${bucket}s), \"variable\" fill(null)"
        .to_string()
}

fn default_stations_query() -> String {
    "SHOW TAG VALUES FROM ${measurement} WITH KEY = \"station\"".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct VariablesConfig {
    #[serde(default)]
    pub variables: HashMap<String, VariableConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VariableConfig {
    pub display_name: String,
    #[serde(default)]
    pub units: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub color: Option<String>,
    #[serde(default = "default_used")]
    pub used: bool,
    pub order: Option<u32>,
}

fn default_used() -> bool {
    true
}

impl VariablesConfig {
    pub fn into_properties(self) -> VariableProperties {
        let properties = self
            .variables
            .into_iter()
            .map(|(key, config)| {
                let color = config.color.as_deref().and_then(|text| {
                    let parsed = Color::parse_hex(text);
                    if parsed.is_none() {
                        tracing::warn!("Ignoring invalid color {:?} for variable {}", text, key);
                    }
                    parsed
                });
                let property = VariableProperty {
                    display_name: config.display_name,
                    units: config.units,
                    min: config.min,
                    max: config.max,
                    color,
                    used: config.used,
                    order: config.order,
                };
                (key, property)
            })
            .collect();
        VariableProperties::new(properties)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_hours")]
    pub default_hours: i64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            default_hours: default_hours(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_hours() -> i64 {
    6
}

pub fn load_influx_config() -> anyhow::Result<InfluxConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/influx"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

pub fn load_variables_config() -> anyhow::Result<VariablesConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/variables"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

pub fn load_server_config() -> anyhow::Result<ServerConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/server").required(false))
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Replace template variables in a query string
pub fn prepare_query(query: &str, vars: &HashMap<String, String>) -> String {
    let mut result = query.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}
