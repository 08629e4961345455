// Provider trait for weather station data access
use crate::domain::series::StationInstance;
use crate::domain::station::WeatherStation;
use crate::domain::time_range::TimeRange;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request to data store failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("data store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("data store query error: {0}")]
    Query(String),
    #[error("could not decode data store response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Blocking access to station data. Calls may perform I/O and should be
/// kept off async executor threads.
pub trait StationDataProvider: Send + Sync {
    /// List all available station IDs
    fn list_station_ids(&self) -> Result<Vec<String>, ProviderError>;

    /// Fetch every instance of `station` that overlaps `range`
    fn fetch_instances_for_range(
        &self,
        station: &WeatherStation,
        range: &TimeRange,
    ) -> Result<Vec<StationInstance>, ProviderError>;
}
