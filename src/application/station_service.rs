// Station service - Use case for listing weather stations
use crate::application::station_provider::StationDataProvider;
use crate::domain::station::WeatherStation;
use std::sync::Arc;

#[derive(Clone)]
pub struct StationService {
    provider: Arc<dyn StationDataProvider>,
}

impl StationService {
    pub fn new(provider: Arc<dyn StationDataProvider>) -> Self {
        Self { provider }
    }

    pub async fn list_stations(&self) -> anyhow::Result<Vec<WeatherStation>> {
        let provider = self.provider.clone();
        let ids = tokio::task::spawn_blocking(move || provider.list_station_ids()).await??;
        Ok(ids.into_iter().map(WeatherStation::new).collect())
    }
}
