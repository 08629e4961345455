// Main entry point - Dependency injection and server setup
use std::{net::SocketAddr, sync::Arc};
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use weather_plot::application::chart_view_service::ChartViewService;
use weather_plot::application::clock::SystemClock;
use weather_plot::application::station_service::StationService;
use weather_plot::infrastructure::config::{load_influx_config, load_server_config, load_variables_config};
use weather_plot::infrastructure::influx_provider::InfluxProvider;
use weather_plot::presentation::app_state::AppState;
use weather_plot::presentation::handlers::{
    acknowledge, close_view, get_view, health_check, list_stations, list_variables, open_view,
    set_current_time, set_range, set_selection, set_shown, set_source, stream_events,
    variable_properties,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let influx_config = load_influx_config()?;
    let variables_config = load_variables_config()?;
    let server_config = load_server_config()?;

    // Create provider (infrastructure layer)
    let provider = Arc::new(InfluxProvider::new(influx_config.influx));
    let properties = Arc::new(variables_config.into_properties());

    // Create services (application layer)
    let station_service = StationService::new(provider.clone());
    let chart_views = ChartViewService::new(
        provider,
        Arc::new(SystemClock),
        properties,
        server_config.server.default_hours,
    );

    // Create application state
    let state = Arc::new(AppState {
        station_service,
        chart_views,
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/stations", get(list_stations))
        .route("/variables", get(list_variables))
        .route("/variables/:key", get(variable_properties))
        .route("/views", post(open_view))
        .route("/views/:id", get(get_view).delete(close_view))
        .route("/views/:id/source", put(set_source))
        .route("/views/:id/range", put(set_range))
        .route("/views/:id/shown", put(set_shown))
        .route("/views/:id/selection", put(set_selection))
        .route("/views/:id/current-time", put(set_current_time))
        .route("/views/:id/ack", post(acknowledge))
        .route("/views/:id/events", get(stream_events))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = server_config.server.bind.parse()?;
    tracing::info!("Starting weather-plot service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
