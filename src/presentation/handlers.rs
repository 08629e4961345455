// HTTP request handlers
use crate::application::chart_view_service::{ViewError, ViewId, ViewUpdate};
use crate::domain::time_range::TimeRange;
use crate::domain::variable::{Color, VariableProperties};
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;

impl IntoResponse for ViewError {
    fn into_response(self) -> Response {
        let status = match &self {
            ViewError::NotFound(_) => StatusCode::NOT_FOUND,
            ViewError::InvalidSelection(_) | ViewError::InvalidRange(_) => {
                StatusCode::BAD_REQUEST
            }
            ViewError::Provider(_) => StatusCode::BAD_GATEWAY,
            ViewError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Deserialize)]
pub struct RangeQuery {
    pub hours: Option<i64>,
}

#[derive(Serialize)]
pub struct OpenedView {
    pub id: ViewId,
}

#[derive(Deserialize)]
pub struct SourceRequest {
    pub station_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum RangeRequest {
    Window { start_ms: i64, end_ms: i64 },
    Hours { hours: i64 },
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum ShownRequest {
    Single { key: String, shown: bool },
    Only { keys: Vec<String> },
}

#[derive(Deserialize)]
pub struct SelectionRequest {
    pub keys: Vec<String>,
}

#[derive(Deserialize)]
pub struct CurrentTimeRequest {
    pub time_ms: i64,
}

#[derive(Deserialize)]
pub struct AckRequest {
    #[serde(default)]
    pub values: bool,
    #[serde(default)]
    pub range: bool,
}

#[derive(Serialize)]
pub struct VariableResponse {
    pub key: String,
    pub display_name: String,
    pub units: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub color: Color,
    pub order: Option<u32>,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// List all weather stations
pub async fn list_stations(State(state): State<Arc<AppState>>) -> Response {
    match state.station_service.list_stations().await {
        Ok(stations) => Json(stations).into_response(),
        Err(e) => {
            tracing::error!("Error fetching stations: {}", e);
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

fn variable_response(properties: &VariableProperties, key: &str) -> VariableResponse {
    let property = properties.get(key);
    VariableResponse {
        key: key.to_string(),
        display_name: properties.display_name(key),
        units: property.map(|p| p.units.clone()),
        min: property.and_then(|p| p.min),
        max: property.and_then(|p| p.max),
        color: properties.color(key),
        order: property.and_then(|p| p.order),
    }
}

/// Used variables in display order
pub async fn list_variables(State(state): State<Arc<AppState>>) -> Json<Vec<VariableResponse>> {
    let properties = state.chart_views.properties();
    Json(
        properties
            .ordering()
            .into_iter()
            .map(|key| variable_response(properties, key))
            .collect(),
    )
}

/// Display metadata for one variable; unknown keys still get a color
pub async fn variable_properties(
    Path(key): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Json<VariableResponse> {
    Json(variable_response(state.chart_views.properties(), &key))
}

pub async fn open_view(
    Query(query): Query<RangeQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<OpenedView>), ViewError> {
    let id = state.chart_views.open_view(query.hours)?;
    Ok((StatusCode::CREATED, Json(OpenedView { id })))
}

pub async fn close_view(
    Path(id): Path<ViewId>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ViewError> {
    state.chart_views.close_view(id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_view(
    Path(id): Path<ViewId>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ViewError> {
    let snapshot = state.chart_views.snapshot(id).await?;
    Ok(Json(snapshot).into_response())
}

/// Select (or deselect with `null`) the station a view plots
pub async fn set_source(
    Path(id): Path<ViewId>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<SourceRequest>,
) -> Result<Response, ViewError> {
    state.chart_views.set_source(id, request.station_id).await?;
    let snapshot = state.chart_views.snapshot(id).await?;
    Ok(Json(snapshot).into_response())
}

pub async fn set_range(
    Path(id): Path<ViewId>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<RangeRequest>,
) -> Result<Response, ViewError> {
    match request {
        RangeRequest::Window { start_ms, end_ms } => {
            state
                .chart_views
                .set_range(id, TimeRange::new(start_ms, end_ms))
                .await?
        }
        RangeRequest::Hours { hours } => state.chart_views.set_range_hours(id, hours).await?,
    };
    let snapshot = state.chart_views.snapshot(id).await?;
    Ok(Json(snapshot).into_response())
}

pub async fn set_shown(
    Path(id): Path<ViewId>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<ShownRequest>,
) -> Result<StatusCode, ViewError> {
    match request {
        ShownRequest::Single { key, shown } => {
            state.chart_views.set_shown(id, key, shown).await?;
        }
        ShownRequest::Only { keys } => state.chart_views.set_shown_only(id, keys).await?,
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_selection(
    Path(id): Path<ViewId>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectionRequest>,
) -> Result<StatusCode, ViewError> {
    state.chart_views.select_variables(id, request.keys).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_current_time(
    Path(id): Path<ViewId>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CurrentTimeRequest>,
) -> Result<StatusCode, ViewError> {
    state.chart_views.set_current_time(id, request.time_ms).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Clear dirty flags once the client has redrawn or reloaded
pub async fn acknowledge(
    Path(id): Path<ViewId>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<AckRequest>,
) -> Result<StatusCode, ViewError> {
    state
        .chart_views
        .acknowledge(id, request.values, request.range)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream change events for one view as server-sent events
pub async fn stream_events(
    Path(id): Path<ViewId>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ViewError> {
    let mut events = state.chart_views.subscribe(id)?;

    let stream = async_stream::stream! {
        while let Some(update) = events.next().await {
            match update {
                ViewUpdate::Change(event) => match Event::default().event("plot").json_data(&event) {
                    Ok(sse_event) => yield Ok::<Event, Infallible>(sse_event),
                    Err(e) => tracing::warn!("Could not encode event for view {}: {}", id, e),
                },
                ViewUpdate::Lagged(skipped) => {
                    yield Ok(Event::default().event("lagged").data(skipped.to_string()));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}
