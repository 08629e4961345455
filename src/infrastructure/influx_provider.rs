// InfluxDB station data provider
use crate::application::station_provider::{ProviderError, StationDataProvider};
use crate::domain::series::{CompressedColumn, StationInstance, TimeSeriesPoint, VariableSeries};
use crate::domain::station::WeatherStation;
use crate::domain::time_range::TimeRange;
use crate::infrastructure::config::{prepare_query, InfluxSettings};
use serde::Deserialize;
use std::collections::HashMap;

const VARIABLE_TAG: &str = "variable";

#[derive(Debug, Clone)]
pub struct InfluxProvider {
    settings: InfluxSettings,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    results: Vec<InfluxQLResult>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    #[allow(dead_code)]
    name: String,
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    tags: Option<HashMap<String, String>>,
}

impl InfluxQLSeries {
    fn variable_key(&self) -> Option<&str> {
        self.tags
            .as_ref()
            .and_then(|tags| tags.get(VARIABLE_TAG))
            .map(String::as_str)
    }

    /// Rows as `(time_ms, value)`; rows with an unparseable time are dropped.
    fn rows(&self) -> Vec<(i64, Option<f64>)> {
        let time_idx = self.columns.iter().position(|c| c == "time").unwrap_or(0);
        let value_idx = self
            .columns
            .iter()
            .position(|c| c == "mean" || c == "value")
            .unwrap_or(1);

        self.values
            .iter()
            .filter_map(|row| {
                let time_str = row.get(time_idx)?.as_str()?;
                let time = chrono::DateTime::parse_from_rfc3339(time_str).ok()?;
                let value = row.get(value_idx).and_then(|v| v.as_f64());
                Some((time.timestamp_millis(), value))
            })
            .collect()
    }
}

/// Escape a value for use inside a single-quoted InfluxQL string literal.
fn escape_string_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl InfluxProvider {
    pub fn new(mut settings: InfluxSettings) -> Self {
        settings.host = settings.host.trim_end_matches('/').to_string();
        Self { settings }
    }

    fn build_query_url(&self, query: &str) -> String {
        let encoded_query = urlencoding::encode(query);
        format!(
            "{}/query?db={}&rp={}&q={}",
            self.settings.host, self.settings.database, self.settings.retention_policy, encoded_query
        )
    }

    fn execute_query(&self, query: &str) -> Result<InfluxQLResponse, ProviderError> {
        let url = self.build_query_url(query);
        tracing::debug!("Executing InfluxQL query: {}", query);

        let client = reqwest::blocking::Client::new();
        let response = client
            .get(&url)
            .header("Authorization", format!("Token {}", self.settings.token))
            .header("Accept", "application/json")
            .send()?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let body = response.text()?;
        let data: InfluxQLResponse = serde_json::from_str(&body)?;

        // Check for errors in the response
        if let Some(result) = data.results.first() {
            if let Some(error) = &result.error {
                return Err(ProviderError::Query(error.clone()));
            }
        }

        Ok(data)
    }

    fn query_vars(&self, station: &WeatherStation, range: &TimeRange) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("measurement".to_string(), self.settings.measurement.clone());
        vars.insert("station".to_string(), escape_string_literal(&station.id));
        vars.insert("start".to_string(), range.start_ms.to_string());
        vars.insert("end".to_string(), range.end_ms.to_string());
        if let Some(bucket) = self.settings.bucket_seconds {
            vars.insert("bucket".to_string(), bucket.to_string());
        }
        vars
    }

    fn series_of(response: &InfluxQLResponse) -> &[InfluxQLSeries] {
        response
            .results
            .first()
            .and_then(|r| r.series.as_deref())
            .unwrap_or(&[])
    }

    /// One expanded instance with every variable, each downsampled to at
    /// most `max_points`.
    fn expanded_instance(
        response: &InfluxQLResponse,
        station_id: &str,
        max_points: usize,
    ) -> StationInstance {
        let series = Self::series_of(response)
            .iter()
            .filter_map(|s| {
                let key = s.variable_key()?;
                let points: Vec<TimeSeriesPoint> = s
                    .rows()
                    .into_iter()
                    .filter_map(|(time_ms, value)| value.map(|v| TimeSeriesPoint::new(time_ms, v)))
                    .collect();
                Some(VariableSeries::new(
                    key.to_string(),
                    Self::downsample_points(points, max_points),
                ))
            })
            .collect();

        StationInstance::expanded(station_id.to_string(), series)
    }

    /// One compressed instance on the bucket grid shared by all variables.
    fn compressed_instance(
        response: &InfluxQLResponse,
        station_id: &str,
        step_ms: i64,
    ) -> StationInstance {
        let keyed_rows: Vec<(&str, Vec<(i64, Option<f64>)>)> = Self::series_of(response)
            .iter()
            .filter_map(|s| Some((s.variable_key()?, s.rows())))
            .collect();

        let start_ms = keyed_rows
            .iter()
            .filter_map(|(_, rows)| rows.first().map(|(t, _)| *t))
            .min()
            .unwrap_or(0);

        let columns = keyed_rows
            .into_iter()
            .map(|(key, rows)| {
                let mut values: Vec<Option<f64>> = Vec::with_capacity(rows.len());
                for (time_ms, value) in rows {
                    let slot = ((time_ms - start_ms) / step_ms.max(1)) as usize;
                    if slot >= values.len() {
                        values.resize(slot + 1, None);
                    }
                    values[slot] = value;
                }
                CompressedColumn {
                    key: key.to_string(),
                    values,
                }
            })
            .collect();

        StationInstance::compressed(station_id.to_string(), start_ms, step_ms, columns)
    }

    /// Downsample time series points using bucket averaging
    fn downsample_points(points: Vec<TimeSeriesPoint>, max_points: usize) -> Vec<TimeSeriesPoint> {
        if points.is_empty() || max_points == 0 || points.len() <= max_points {
            return points;
        }

        let bucket_size = (points.len() as f64 / max_points as f64).ceil() as usize;
        let mut downsampled = Vec::with_capacity(max_points);

        for chunk in points.chunks(bucket_size) {
            // Use middle point's timestamp and average value
            let mid_idx = chunk.len() / 2;
            let avg_value = chunk.iter().map(|p| p.value).sum::<f64>() / chunk.len() as f64;

            downsampled.push(TimeSeriesPoint::new(chunk[mid_idx].time_ms, avg_value));
        }

        downsampled
    }
}

impl StationDataProvider for InfluxProvider {
    fn list_station_ids(&self) -> Result<Vec<String>, ProviderError> {
        let mut vars = HashMap::new();
        vars.insert("measurement".to_string(), self.settings.measurement.clone());
        let query = prepare_query(&self.settings.queries.stations, &vars);
        let response = self.execute_query(&query)?;

        let mut stations = Vec::new();
        for s in Self::series_of(&response) {
            for value_row in &s.values {
                if let Some(station) = value_row.get(1).and_then(|v| v.as_str()) {
                    stations.push(station.to_string());
                }
            }
        }

        Ok(stations)
    }

    fn fetch_instances_for_range(
        &self,
        station: &WeatherStation,
        range: &TimeRange,
    ) -> Result<Vec<StationInstance>, ProviderError> {
        let vars = self.query_vars(station, range);

        let instance = match self.settings.bucket_seconds {
            Some(bucket) => {
                let query = prepare_query(&self.settings.queries.aggregated, &vars);
                let response = self.execute_query(&query)?;
                Self::compressed_instance(&response, &station.id, bucket as i64 * 1000)
            }
            None => {
                let query = prepare_query(&self.settings.queries.raw, &vars);
                let response = self.execute_query(&query)?;
                Self::expanded_instance(&response, &station.id, self.settings.max_points)
            }
        };

        tracing::debug!(
            "Loaded {:?} for {} (compressed: {})",
            range,
            station.id,
            instance.is_compressed()
        );
        Ok(vec![instance])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::QueryTemplates;

    const RESPONSE: &str = r#"{
        "results": [{
            "statement_id": 0,
            "series": [
                {
                    "name": "weather_station",
                    "tags": {"variable": "outdoor_temp"},
                    "columns": ["time", "mean"],
                    "values": [
                        ["1970-01-01T00:01:00Z", 10.0],
                        ["1970-01-01T00:02:00Z", null],
                        ["1970-01-01T00:03:00Z", 12.0]
                    ]
                },
                {
                    "name": "weather_station",
                    "tags": {"variable": "humidity"},
                    "columns": ["time", "mean"],
                    "values": [
                        ["1970-01-01T00:02:00Z", 55.0]
                    ]
                }
            ]
        }]
    }"#;

    fn settings() -> InfluxSettings {
        InfluxSettings {
            host: "http://localhost:8086/".to_string(),
            token: "secret".to_string(),
            database: "weather".to_string(),
            retention_policy: "autogen".to_string(),
            measurement: "weather_station".to_string(),
            max_points: 100,
            bucket_seconds: None,
            queries: QueryTemplates::default(),
        }
    }

    #[test]
    fn test_build_query_url_trims_host() {
        let provider = InfluxProvider::new(settings());
        let url = provider.build_query_url("SHOW DATABASES");
        assert_eq!(
            url,
            "http://localhost:8086/query?db=weather&rp=autogen&q=SHOW%20DATABASES"
        );
    }

    #[test]
    fn test_query_vars_fill_raw_template() {
        let provider = InfluxProvider::new(settings());
        let station = WeatherStation::new("bu_roof".to_string());
        let vars = provider.query_vars(&station, &TimeRange::new(1_000, 2_000));
        let query = prepare_query(&provider.settings.queries.raw, &vars);

        assert_eq!(
            query,
            "SELECT \"value\" FROM weather_station WHERE \"station\"='bu_roof' \
             AND time >= 1000ms AND time < 2000ms GROUP BY \"variable\""
        );
    }

    #[test]
    fn test_station_id_cannot_leave_its_string_literal() {
        let provider = InfluxProvider::new(settings());
        let station = WeatherStation::new(r#"x' OR "station"=~/.*/ OR 'a'='a"#.to_string());
        let vars = provider.query_vars(&station, &TimeRange::new(1_000, 2_000));
        let query = prepare_query(&provider.settings.queries.raw, &vars);

        assert_eq!(
            query,
            r#"SELECT "value" FROM weather_station WHERE "station"='x\' OR "station"=~/.*/ OR \'a\'=\'a' AND time >= 1000ms AND time < 2000ms GROUP BY "variable""#
        );
        assert_eq!(escape_string_literal(r"a\b"), r"a\\b");
        assert_eq!(escape_string_literal("bu_roof"), "bu_roof");
    }

    #[test]
    fn test_expanded_instance_skips_null_samples() {
        let response: InfluxQLResponse = serde_json::from_str(RESPONSE).unwrap();
        let series = InfluxProvider::expanded_instance(&response, "bu_roof", 100).into_series();

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].key, "outdoor_temp");
        assert_eq!(
            series[0].points,
            vec![
                TimeSeriesPoint::new(60_000, 10.0),
                TimeSeriesPoint::new(180_000, 12.0),
            ]
        );
    }

    #[test]
    fn test_compressed_instance_aligns_columns_on_grid() {
        let response: InfluxQLResponse = serde_json::from_str(RESPONSE).unwrap();
        let instance = InfluxProvider::compressed_instance(&response, "bu_roof", 60_000);
        assert!(instance.is_compressed());

        let series = instance.into_series();
        assert_eq!(series[0].points.len(), 2);
        assert_eq!(series[1].key, "humidity");
        assert_eq!(series[1].points, vec![TimeSeriesPoint::new(120_000, 55.0)]);
    }

    #[test]
    fn test_downsample_points_averages_buckets() {
        let points: Vec<TimeSeriesPoint> = (0..10)
            .map(|i| TimeSeriesPoint::new(i * 1_000, i as f64))
            .collect();

        let downsampled = InfluxProvider::downsample_points(points, 5);
        assert_eq!(downsampled.len(), 5);
        assert_eq!(downsampled[0], TimeSeriesPoint::new(1_000, 0.5));
        assert_eq!(downsampled[4], TimeSeriesPoint::new(9_000, 8.5));
    }

    #[test]
    fn test_query_error_is_reported() {
        let response: InfluxQLResponse =
            serde_json::from_str(r#"{"results": [{"error": "database not found: weather"}]}"#)
                .unwrap();
        assert_eq!(
            response.results[0].error.as_deref(),
            Some("database not found: weather")
        );
        assert!(InfluxProvider::series_of(&response).is_empty());
    }
}
