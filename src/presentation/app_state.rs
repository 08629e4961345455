// Application state for HTTP handlers
use crate::application::chart_view_service::ChartViewService;
use crate::application::station_service::StationService;

#[derive(Clone)]
pub struct AppState {
    pub station_service: StationService,
    pub chart_views: ChartViewService,
}
