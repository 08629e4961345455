// Chart view service - One plot buffer per open chart view
use crate::application::clock::Clock;
use crate::application::plot_buffer::{
    PlotSeriesBuffer, PlotSnapshot, RangeOutcome, RefetchReason, SourceOutcome,
};
use crate::application::station_provider::{ProviderError, StationDataProvider};
use crate::domain::station::WeatherStation;
use crate::domain::time_range::TimeRange;
use crate::domain::variable::VariableProperties;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const EVENT_CAPACITY: usize = 256;

pub type ViewId = u64;

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("chart view {0} not found")]
    NotFound(ViewId),
    #[error("invalid selection: expected 1 or 3 keys, got {0}")]
    InvalidSelection(usize),
    #[error("invalid window of {0} hours")]
    InvalidRange(i64),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("background task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// What changed in a view, carried to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlotChange {
    SourceChanged {
        station_id: Option<String>,
        series: usize,
    },
    RangeChanged {
        range: TimeRange,
        reason: RefetchReason,
        series: usize,
    },
    VisibilityChanged {
        keys: Vec<String>,
    },
    SelectionChanged {
        keys: Vec<String>,
    },
    CurrentTimeChanged {
        time_ms: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotEvent {
    pub view_id: ViewId,
    #[serde(flatten)]
    pub change: PlotChange,
}

/// Item read from a view subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    Change(PlotEvent),
    /// The subscriber fell behind and this many events were dropped.
    Lagged(u64),
}

/// Receiver for the events of a single view. Ends when the view is closed.
pub struct ViewSubscription {
    view_id: ViewId,
    rx: broadcast::Receiver<PlotEvent>,
}

impl ViewSubscription {
    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    pub async fn next(&mut self) -> Option<ViewUpdate> {
        match self.rx.recv().await {
            Ok(event) => Some(ViewUpdate::Change(event)),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    "Subscriber of view {} skipped {} events",
                    self.view_id,
                    skipped
                );
                Some(ViewUpdate::Lagged(skipped))
            }
            Err(RecvError::Closed) => None,
        }
    }
}

type SharedBuffer = Arc<Mutex<PlotSeriesBuffer>>;

struct View {
    buffer: SharedBuffer,
    events: broadcast::Sender<PlotEvent>,
}

#[derive(Clone)]
pub struct ChartViewService {
    provider: Arc<dyn StationDataProvider>,
    clock: Arc<dyn Clock>,
    properties: Arc<VariableProperties>,
    views: Arc<RwLock<HashMap<ViewId, View>>>,
    next_id: Arc<AtomicU64>,
    default_hours: i64,
}

impl ChartViewService {
    pub fn new(
        provider: Arc<dyn StationDataProvider>,
        clock: Arc<dyn Clock>,
        properties: Arc<VariableProperties>,
        default_hours: i64,
    ) -> Self {
        Self {
            provider,
            clock,
            properties,
            views: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            default_hours,
        }
    }

    pub fn properties(&self) -> &VariableProperties {
        &self.properties
    }

    /// Subscribe to the events of one view; fails if the view is not open.
    pub fn subscribe(&self, id: ViewId) -> Result<ViewSubscription, ViewError> {
        let rx = self
            .views
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .map(|view| view.events.subscribe())
            .ok_or(ViewError::NotFound(id))?;
        Ok(ViewSubscription { view_id: id, rx })
    }

    fn window_ending_now(&self, hours: i64) -> Result<TimeRange, ViewError> {
        TimeRange::last_hours(self.clock.now_ms(), hours).ok_or(ViewError::InvalidRange(hours))
    }

    /// Open a view with no station and a window of `hours` ending now.
    pub fn open_view(&self, hours: Option<i64>) -> Result<ViewId, ViewError> {
        let hours = hours.unwrap_or(self.default_hours);
        let range = self.window_ending_now(hours)?;
        let mut buffer = PlotSeriesBuffer::new(
            self.provider.clone(),
            self.clock.clone(),
            self.properties.clone(),
        );
        // No station yet, so this never reaches the provider.
        buffer.set_time_range(Some(range))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.views.write().unwrap_or_else(|e| e.into_inner()).insert(
            id,
            View {
                buffer: Arc::new(Mutex::new(buffer)),
                events,
            },
        );
        tracing::debug!("Opened chart view {} ({}h)", id, hours);
        Ok(id)
    }

    /// Drops the view and its channel, which ends every subscription to it.
    pub fn close_view(&self, id: ViewId) -> Result<(), ViewError> {
        let removed = self
            .views
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if removed.is_none() {
            return Err(ViewError::NotFound(id));
        }
        tracing::debug!("Closed chart view {}", id);
        Ok(())
    }

    fn buffer(&self, id: ViewId) -> Result<SharedBuffer, ViewError> {
        self.views
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .map(|view| view.buffer.clone())
            .ok_or(ViewError::NotFound(id))
    }

    /// Run `f` against the view's buffer on the blocking pool. Provider
    /// fetches happen inside `f`.
    async fn with_view<F, R>(&self, id: ViewId, f: F) -> Result<R, ViewError>
    where
        F: FnOnce(&mut PlotSeriesBuffer) -> Result<R, ViewError> + Send + 'static,
        R: Send + 'static,
    {
        let buffer = self.buffer(id)?;
        tokio::task::spawn_blocking(move || {
            let mut buffer = buffer.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut buffer)
        })
        .await?
    }

    fn publish(&self, view_id: ViewId, change: PlotChange) {
        let views = self.views.read().unwrap_or_else(|e| e.into_inner());
        if let Some(view) = views.get(&view_id) {
            // No subscribers is fine.
            let _ = view.events.send(PlotEvent { view_id, change });
        }
    }

    pub async fn set_source(
        &self,
        id: ViewId,
        station_id: Option<String>,
    ) -> Result<SourceOutcome, ViewError> {
        let station = station_id.clone().map(WeatherStation::new);
        let result = self
            .with_view(id, move |buffer| Ok(buffer.set_data_source(station)?))
            .await;

        match result {
            Ok(outcome) => {
                match outcome {
                    SourceOutcome::Unchanged => {}
                    SourceOutcome::Cleared { series } | SourceOutcome::Reloaded { series } => {
                        self.publish(id, PlotChange::SourceChanged { station_id, series })
                    }
                }
                Ok(outcome)
            }
            Err(ViewError::Provider(e)) => {
                tracing::warn!("Failed to load station {:?} for view {}: {}", station_id, id, e);
                // The buffer now holds the new station and no series.
                self.publish(
                    id,
                    PlotChange::SourceChanged {
                        station_id,
                        series: 0,
                    },
                );
                Err(ViewError::Provider(e))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn set_range(&self, id: ViewId, range: TimeRange) -> Result<RangeOutcome, ViewError> {
        let (reason, result) = self
            .with_view(id, move |buffer| {
                let reason = buffer.refetch_reason(&range);
                Ok((reason, buffer.set_time_range(Some(range))))
            })
            .await?;

        match result {
            Ok(outcome) => {
                if let RangeOutcome::Refetched { reason, series } = outcome {
                    self.publish(
                        id,
                        PlotChange::RangeChanged {
                            range,
                            reason,
                            series,
                        },
                    );
                }
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!("Failed to load range {:?} for view {}: {}", range, id, e);
                // Only a refetch reaches the provider, so the range was stored
                // and the series cleared.
                if let Some(reason) = reason {
                    self.publish(
                        id,
                        PlotChange::RangeChanged {
                            range,
                            reason,
                            series: 0,
                        },
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Window of `hours` ending now.
    pub async fn set_range_hours(&self, id: ViewId, hours: i64) -> Result<RangeOutcome, ViewError> {
        let range = self.window_ending_now(hours)?;
        self.set_range(id, range).await
    }

    /// Returns true when the visibility actually changed.
    pub async fn set_shown(&self, id: ViewId, key: String, shown: bool) -> Result<bool, ViewError> {
        let event_key = key.clone();
        let changed = self
            .with_view(id, move |buffer| {
                let before = buffer.is_shown(&key);
                buffer.set_shown(&key, shown);
                Ok(buffer.is_shown(&key) != before)
            })
            .await?;

        if changed {
            self.publish(
                id,
                PlotChange::VisibilityChanged {
                    keys: vec![event_key],
                },
            );
        }
        Ok(changed)
    }

    pub async fn set_shown_only(&self, id: ViewId, keys: Vec<String>) -> Result<(), ViewError> {
        let set: HashSet<String> = keys.iter().cloned().collect();
        self.with_view(id, move |buffer| {
            buffer.set_shown_only(&set);
            Ok(())
        })
        .await?;

        self.publish(id, PlotChange::VisibilityChanged { keys });
        Ok(())
    }

    /// One key selects a single variable; three keys select a pair and the
    /// key of their combined plot.
    pub async fn select_variables(&self, id: ViewId, keys: Vec<String>) -> Result<(), ViewError> {
        let event_keys = keys.clone();
        let count = keys.len();
        if count != 1 && count != 3 {
            return Err(ViewError::InvalidSelection(count));
        }

        self.with_view(id, move |buffer| {
            let mut keys = keys.into_iter();
            match (keys.next(), keys.next(), keys.next()) {
                (Some(first), Some(second), Some(combined)) => {
                    buffer.add_multi_selected_variable_keys(first, second, combined)
                }
                (Some(key), _, _) => buffer.add_selected_variable_key(key),
                _ => return Err(ViewError::InvalidSelection(0)),
            }
            Ok(())
        })
        .await?;

        self.publish(id, PlotChange::SelectionChanged { keys: event_keys });
        Ok(())
    }

    pub async fn set_current_time(&self, id: ViewId, time_ms: i64) -> Result<(), ViewError> {
        self.with_view(id, move |buffer| {
            buffer.set_current_time_shown(time_ms);
            Ok(())
        })
        .await?;

        self.publish(id, PlotChange::CurrentTimeChanged { time_ms });
        Ok(())
    }

    pub async fn snapshot(&self, id: ViewId) -> Result<PlotSnapshot, ViewError> {
        self.with_view(id, |buffer| Ok(buffer.snapshot())).await
    }

    /// Clear the requested dirty flags after a redraw or reload.
    pub async fn acknowledge(&self, id: ViewId, values: bool, range: bool) -> Result<(), ViewError> {
        self.with_view(id, move |buffer| {
            if values {
                buffer.set_values_changed(false);
            }
            if range {
                buffer.acknowledge_range_change();
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::plot_buffer::tests::{FixedClock, RecordingProvider};
    use std::sync::atomic::AtomicI64;

    const NOW: i64 = 100 * 60 * 60 * 1000;

    async fn next_change(events: &mut ViewSubscription) -> PlotChange {
        match events.next().await {
            Some(ViewUpdate::Change(event)) => {
                assert_eq!(event.view_id, events.view_id());
                event.change
            }
            other => panic!("expected a change, got {:?}", other),
        }
    }

    fn service(provider: Arc<RecordingProvider>) -> ChartViewService {
        ChartViewService::new(
            provider,
            Arc::new(FixedClock(AtomicI64::new(NOW))),
            Arc::new(VariableProperties::default()),
            6,
        )
    }

    #[tokio::test]
    async fn test_open_view_starts_with_default_window() {
        let provider = Arc::new(RecordingProvider::new(vec!["outdoor_temp"]));
        let service = service(provider.clone());

        let id = service.open_view(None).unwrap();
        let snapshot = service.snapshot(id).await.unwrap();
        assert_eq!(snapshot.range, TimeRange::last_hours(NOW, 6).unwrap());
        assert!(snapshot.station.is_none());
        assert!(snapshot.values_changed);
        assert_eq!(provider.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_views_own_separate_buffers() {
        let provider = Arc::new(RecordingProvider::new(vec!["outdoor_temp", "humidity"]));
        let service = service(provider.clone());
        let first = service.open_view(Some(2)).unwrap();
        let second = service.open_view(Some(2)).unwrap();

        service
            .set_source(first, Some("bu_roof".to_string()))
            .await
            .unwrap();

        assert_eq!(service.snapshot(first).await.unwrap().series.len(), 2);
        assert!(service.snapshot(second).await.unwrap().series.is_empty());
        assert_eq!(provider.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_events_carry_the_delta() {
        let provider = Arc::new(RecordingProvider::new(vec!["outdoor_temp"]));
        let service = service(provider.clone());
        let id = service.open_view(Some(1)).unwrap();
        let mut events = service.subscribe(id).unwrap();
        assert_eq!(events.view_id(), id);

        service
            .set_source(id, Some("bu_roof".to_string()))
            .await
            .unwrap();
        let unchanged = service
            .set_source(id, Some("bu_roof".to_string()))
            .await
            .unwrap();
        assert_eq!(unchanged, SourceOutcome::Unchanged);
        service
            .set_shown(id, "outdoor_temp".to_string(), true)
            .await
            .unwrap();
        let range = TimeRange::new(0, 1_000);
        service.set_range(id, range).await.unwrap();

        assert_eq!(
            next_change(&mut events).await,
            PlotChange::SourceChanged {
                station_id: Some("bu_roof".to_string()),
                series: 1,
            }
        );
        assert_eq!(
            next_change(&mut events).await,
            PlotChange::VisibilityChanged {
                keys: vec!["outdoor_temp".to_string()],
            }
        );
        assert_eq!(
            next_change(&mut events).await,
            PlotChange::RangeChanged {
                range,
                reason: RefetchReason {
                    range_identity_changed: true,
                    window_may_have_new_data: false,
                },
                series: 1,
            }
        );
        assert!(events.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_events_stay_with_their_view() {
        let provider = Arc::new(RecordingProvider::new(vec!["outdoor_temp"]));
        let service = service(provider);
        let first = service.open_view(Some(1)).unwrap();
        let second = service.open_view(Some(1)).unwrap();
        let mut first_events = service.subscribe(first).unwrap();
        let mut second_events = service.subscribe(second).unwrap();

        service
            .set_source(first, Some("bu_roof".to_string()))
            .await
            .unwrap();
        service.set_current_time(first, NOW).await.unwrap();
        service.set_current_time(second, NOW - 1).await.unwrap();

        let Some(ViewUpdate::Change(event)) = first_events.next().await else {
            panic!("expected a change for the first view");
        };
        assert_eq!(event.view_id, first);
        assert!(matches!(event.change, PlotChange::SourceChanged { .. }));
        assert_eq!(
            next_change(&mut first_events).await,
            PlotChange::CurrentTimeChanged { time_ms: NOW }
        );
        assert!(first_events.rx.try_recv().is_err());

        let Some(ViewUpdate::Change(event)) = second_events.next().await else {
            panic!("expected a change for the second view");
        };
        assert_eq!(event.view_id, second);
        assert_eq!(event.change, PlotChange::CurrentTimeChanged { time_ms: NOW - 1 });
        assert!(second_events.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscription_reports_lag_then_resumes() {
        let (tx, rx) = broadcast::channel(1);
        let mut events = ViewSubscription { view_id: 7, rx };
        for time_ms in [1, 2, 3] {
            tx.send(PlotEvent {
                view_id: 7,
                change: PlotChange::CurrentTimeChanged { time_ms },
            })
            .unwrap();
        }

        assert_eq!(events.next().await, Some(ViewUpdate::Lagged(2)));
        assert_eq!(
            next_change(&mut events).await,
            PlotChange::CurrentTimeChanged { time_ms: 3 }
        );
        drop(tx);
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn test_closing_a_view_ends_its_subscription() {
        let service = service(Arc::new(RecordingProvider::new(vec![])));
        let id = service.open_view(None).unwrap();
        let mut events = service.subscribe(id).unwrap();

        service.close_view(id).unwrap();
        assert_eq!(events.next().await, None);
        assert!(matches!(service.subscribe(id), Err(ViewError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_dropping_a_source_reports_retained_series() {
        let provider = Arc::new(RecordingProvider::new(vec!["outdoor_temp", "humidity"]));
        let service = service(provider);
        let id = service.open_view(Some(1)).unwrap();
        let mut events = service.subscribe(id).unwrap();

        // Nothing to drop yet.
        assert_eq!(
            service.set_source(id, None).await.unwrap(),
            SourceOutcome::Unchanged
        );
        assert!(events.rx.try_recv().is_err());

        service
            .set_source(id, Some("bu_roof".to_string()))
            .await
            .unwrap();
        assert_eq!(
            service.set_source(id, None).await.unwrap(),
            SourceOutcome::Cleared { series: 2 }
        );
        assert_eq!(
            service.set_source(id, None).await.unwrap(),
            SourceOutcome::Unchanged
        );

        next_change(&mut events).await;
        assert_eq!(
            next_change(&mut events).await,
            PlotChange::SourceChanged {
                station_id: None,
                series: 2,
            }
        );
        assert!(events.rx.try_recv().is_err());
        assert_eq!(service.snapshot(id).await.unwrap().series.len(), 2);
    }

    #[tokio::test]
    async fn test_window_overflow_is_rejected() {
        let provider = Arc::new(RecordingProvider::new(vec!["outdoor_temp"]));
        let service = service(provider.clone());

        assert!(matches!(
            service.open_view(Some(9_000_000_000_000)),
            Err(ViewError::InvalidRange(9_000_000_000_000))
        ));
        assert!(matches!(
            service.open_view(Some(-3)),
            Err(ViewError::InvalidRange(-3))
        ));

        let id = service.open_view(Some(1)).unwrap();
        let before = service.snapshot(id).await.unwrap().range;
        assert!(matches!(
            service.set_range_hours(id, i64::MAX).await,
            Err(ViewError::InvalidRange(i64::MAX))
        ));
        assert_eq!(service.snapshot(id).await.unwrap().range, before);
        assert_eq!(provider.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_acknowledge_clears_flags() {
        let provider = Arc::new(RecordingProvider::new(vec!["outdoor_temp"]));
        let service = service(provider);
        let id = service.open_view(None).unwrap();

        service.acknowledge(id, true, false).await.unwrap();
        let snapshot = service.snapshot(id).await.unwrap();
        assert!(!snapshot.values_changed);
        assert!(snapshot.range_changed);

        service.acknowledge(id, false, true).await.unwrap();
        assert!(!service.snapshot(id).await.unwrap().range_changed);
    }

    #[tokio::test]
    async fn test_selection_arity_is_checked() {
        let service = service(Arc::new(RecordingProvider::new(vec![])));
        let id = service.open_view(None).unwrap();

        service
            .select_variables(id, vec!["temp".to_string()])
            .await
            .unwrap();
        let err = service
            .select_variables(id, vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ViewError::InvalidSelection(2)));
        assert_eq!(service.snapshot(id).await.unwrap().selection, vec!["temp"]);

        service
            .select_variables(
                id,
                vec!["tempA".to_string(), "tempB".to_string(), "combined".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(
            service.snapshot(id).await.unwrap().selection,
            vec!["tempA", "tempB", "combined"]
        );
    }

    #[tokio::test]
    async fn test_provider_error_surfaces() {
        let provider = Arc::new(RecordingProvider::new(vec!["outdoor_temp"]));
        provider.fail.store(true, Ordering::SeqCst);
        let service = service(provider);
        let id = service.open_view(None).unwrap();

        let err = service
            .set_source(id, Some("bu_roof".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ViewError::Provider(_)));
    }

    #[tokio::test]
    async fn test_failed_loads_still_publish_the_cleared_state() {
        let provider = Arc::new(RecordingProvider::new(vec!["outdoor_temp"]));
        let service = service(provider.clone());
        let id = service.open_view(Some(1)).unwrap();
        let mut events = service.subscribe(id).unwrap();
        service
            .set_source(id, Some("bu_roof".to_string()))
            .await
            .unwrap();
        provider.fail.store(true, Ordering::SeqCst);

        assert!(
            service
                .set_source(id, Some("bu_quad".to_string()))
                .await
                .is_err()
        );
        let range = TimeRange::new(0, 1_000);
        assert!(service.set_range(id, range).await.is_err());

        next_change(&mut events).await;
        assert_eq!(
            next_change(&mut events).await,
            PlotChange::SourceChanged {
                station_id: Some("bu_quad".to_string()),
                series: 0,
            }
        );
        assert_eq!(
            next_change(&mut events).await,
            PlotChange::RangeChanged {
                range,
                reason: RefetchReason {
                    range_identity_changed: true,
                    window_may_have_new_data: false,
                },
                series: 0,
            }
        );
        let snapshot = service.snapshot(id).await.unwrap();
        assert_eq!(snapshot.station.unwrap().id, "bu_quad");
        assert!(snapshot.series.is_empty());
    }

    #[tokio::test]
    async fn test_closed_view_is_not_found() {
        let service = service(Arc::new(RecordingProvider::new(vec![])));
        let id = service.open_view(None).unwrap();
        service.close_view(id).unwrap();

        assert!(matches!(
            service.snapshot(id).await,
            Err(ViewError::NotFound(missing)) if missing == id
        ));
        assert!(matches!(service.close_view(id), Err(ViewError::NotFound(_))));
    }
}
