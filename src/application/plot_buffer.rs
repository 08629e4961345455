// Per-chart buffer of weather variable series
use crate::application::clock::Clock;
use crate::application::station_provider::{ProviderError, StationDataProvider};
use crate::domain::selection::SelectionState;
use crate::domain::series::{TimeSeriesPoint, VariableSeries};
use crate::domain::station::WeatherStation;
use crate::domain::time_range::TimeRange;
use crate::domain::variable::{Color, VariableProperties};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Why a range change caused a reload. Both may hold at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefetchReason {
    pub range_identity_changed: bool,
    pub window_may_have_new_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    Ignored,
    Unchanged,
    Refetched { reason: RefetchReason, series: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOutcome {
    /// The station was dropped; `series` is how many are still buffered.
    Cleared { series: usize },
    Unchanged,
    Reloaded { series: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesView {
    pub key: String,
    pub display_name: String,
    pub color: Color,
    pub shown: bool,
    pub points: Vec<TimeSeriesPoint>,
}

/// Owned copy of the buffer state handed to renderers.
#[derive(Debug, Clone, Serialize)]
pub struct PlotSnapshot {
    pub station: Option<WeatherStation>,
    pub range: TimeRange,
    pub start_time_ms: Option<i64>,
    pub end_time_ms: Option<i64>,
    pub current_time_ms: i64,
    pub selection: Vec<String>,
    pub values_changed: bool,
    pub range_changed: bool,
    pub series: Vec<SeriesView>,
}

/// Holds the series a chart renders for one (station, range) pair.
///
/// Reloads from the provider only when the station or the window actually
/// changes, and records what changed in two dirty flags that the renderer
/// reads and clears around each redraw. Not synchronised; owners serialise
/// access.
pub struct PlotSeriesBuffer {
    provider: Arc<dyn StationDataProvider>,
    clock: Arc<dyn Clock>,
    properties: Arc<VariableProperties>,
    current_station: Option<WeatherStation>,
    current_range: TimeRange,
    series: Vec<VariableSeries>,
    // key -> position in `series`
    index: HashMap<String, usize>,
    current_time_ms: i64,
    start_time_ms: Option<i64>,
    end_time_ms: Option<i64>,
    values_changed: bool,
    range_changed: bool,
    selection: SelectionState,
}

impl PlotSeriesBuffer {
    /// Starts with no station and an empty window at the current time.
    pub fn new(
        provider: Arc<dyn StationDataProvider>,
        clock: Arc<dyn Clock>,
        properties: Arc<VariableProperties>,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            provider,
            clock,
            properties,
            current_station: None,
            current_range: TimeRange::new(now, now),
            series: Vec::new(),
            index: HashMap::new(),
            current_time_ms: now,
            start_time_ms: None,
            end_time_ms: None,
            values_changed: true,
            range_changed: true,
            selection: SelectionState::default(),
        }
    }

    pub fn station(&self) -> Option<&WeatherStation> {
        self.current_station.as_ref()
    }

    /// Select the station to plot. A different station clears the buffer and
    /// reloads the current window; the same station is a no-op.
    pub fn set_data_source(
        &mut self,
        station: Option<WeatherStation>,
    ) -> Result<SourceOutcome, ProviderError> {
        let Some(station) = station else {
            if self.current_station.take().is_none() {
                return Ok(SourceOutcome::Unchanged);
            }
            return Ok(SourceOutcome::Cleared {
                series: self.series.len(),
            });
        };

        if let Some(current) = &self.current_station {
            if current.is_same_source(&station) {
                return Ok(SourceOutcome::Unchanged);
            }
        }

        tracing::debug!(
            "Station changed to {}, reloading {:?}",
            station.id,
            self.current_range
        );
        self.current_station = Some(station);
        self.clear();
        self.values_changed = true;

        let range = self.current_range;
        let series = self.load(&range)?;
        Ok(SourceOutcome::Reloaded { series })
    }

    pub fn time_range(&self) -> TimeRange {
        self.current_range
    }

    /// Accept a new window. Reloads when the window differs from the stored
    /// one or still reaches past the current time.
    pub fn set_time_range(
        &mut self,
        range: Option<TimeRange>,
    ) -> Result<RangeOutcome, ProviderError> {
        let Some(range) = range else {
            return Ok(RangeOutcome::Ignored);
        };

        let Some(reason) = self.refetch_reason(&range) else {
            return Ok(RangeOutcome::Unchanged);
        };

        self.values_changed = true;
        self.range_changed = true;
        self.current_range = range;
        self.clear();
        self.set_start_time(Some(range.start_ms));
        self.set_end_time(Some(range.end_ms));

        let series = if self.current_station.is_some() {
            self.load(&range)?
        } else {
            0
        };
        Ok(RangeOutcome::Refetched { reason, series })
    }

    /// Why `range` would trigger a reload right now, or `None` if it would not.
    pub fn refetch_reason(&self, range: &TimeRange) -> Option<RefetchReason> {
        let reason = RefetchReason {
            range_identity_changed: *range != self.current_range,
            window_may_have_new_data: range.window_may_have_new_data(self.clock.now_ms()),
        };
        (reason.range_identity_changed || reason.window_may_have_new_data).then_some(reason)
    }

    fn load(&mut self, range: &TimeRange) -> Result<usize, ProviderError> {
        let Some(station) = &self.current_station else {
            return Ok(0);
        };

        let instances = self.provider.fetch_instances_for_range(station, range)?;
        tracing::debug!(
            "Fetched {} instances for {} in {:?}",
            instances.len(),
            station.id,
            range
        );
        for instance in instances {
            tracing::trace!(
                "Appending instance from {} (compressed: {})",
                instance.station_id,
                instance.is_compressed()
            );
            self.append_series(instance.into_series_within(range));
        }
        Ok(self.series.len())
    }

    /// Merge a freshly fetched batch. Samples are concatenated onto the
    /// existing series with the same key; new keys are added at the end.
    pub fn append_series(&mut self, batch: Vec<VariableSeries>) {
        for incoming in batch {
            match self.index.get(&incoming.key) {
                Some(&position) => self.series[position].points.extend(incoming.points),
                None => {
                    self.index.insert(incoming.key.clone(), self.series.len());
                    self.series.push(incoming);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.series.clear();
        self.index.clear();
    }

    pub fn values(&self) -> Vec<VariableSeries> {
        self.series.clone()
    }

    pub fn series(&self, key: &str) -> Option<&VariableSeries> {
        self.index.get(key).map(|&position| &self.series[position])
    }

    pub fn color(&self, key: &str) -> Color {
        self.properties.color(key)
    }

    pub fn set_shown(&mut self, key: &str, shown: bool) {
        if let Some(&position) = self.index.get(key) {
            let series = &mut self.series[position];
            if series.shown != shown {
                series.shown = shown;
                self.values_changed = true;
            }
        }
    }

    /// Show exactly the series in `keys` and hide every other one. Always
    /// marks the values as changed.
    pub fn set_shown_only(&mut self, keys: &HashSet<String>) {
        for series in &mut self.series {
            series.shown = keys.contains(&series.key);
        }
        self.values_changed = true;
    }

    pub fn is_shown(&self, key: &str) -> bool {
        self.series(key).map(|s| s.shown).unwrap_or(false)
    }

    pub fn values_changed(&self) -> bool {
        self.values_changed
    }

    pub fn set_values_changed(&mut self, changed: bool) {
        self.values_changed = changed;
    }

    pub fn range_changed(&self) -> bool {
        self.range_changed
    }

    pub fn acknowledge_range_change(&mut self) {
        self.range_changed = false;
    }

    pub fn start_time(&self) -> Option<i64> {
        self.start_time_ms
    }

    pub fn end_time(&self) -> Option<i64> {
        self.end_time_ms
    }

    pub fn set_start_time(&mut self, start_ms: Option<i64>) {
        self.start_time_ms = start_ms;
    }

    pub fn set_end_time(&mut self, end_ms: Option<i64>) {
        self.end_time_ms = end_ms;
    }

    pub fn current_time_shown(&self) -> i64 {
        self.current_time_ms
    }

    pub fn set_current_time_shown(&mut self, time_ms: i64) {
        self.current_time_ms = time_ms;
    }

    pub fn add_selected_variable_key(&mut self, key: String) {
        self.selection.select_single(key);
    }

    pub fn add_multi_selected_variable_keys(
        &mut self,
        first: String,
        second: String,
        combined: String,
    ) {
        self.selection.select_pair(first, second, combined);
    }

    pub fn selected_variable_key(&self, index: usize) -> Option<&str> {
        self.selection.get(index)
    }

    pub fn selected_variable_size(&self) -> usize {
        self.selection.len()
    }

    pub fn selected_variables(&self) -> &[String] {
        self.selection.keys()
    }

    pub fn snapshot(&self) -> PlotSnapshot {
        PlotSnapshot {
            station: self.current_station.clone(),
            range: self.time_range(),
            start_time_ms: self.start_time(),
            end_time_ms: self.end_time(),
            current_time_ms: self.current_time_shown(),
            selection: self.selected_variables().to_vec(),
            values_changed: self.values_changed(),
            range_changed: self.range_changed(),
            series: self
                .series
                .iter()
                .map(|s| SeriesView {
                    key: s.key.clone(),
                    display_name: self.properties.display_name(&s.key),
                    color: self.properties.color(&s.key),
                    shown: s.shown,
                    points: s.points.clone(),
                })
                .collect(),
        }
    }
}

impl fmt::Display for PlotSeriesBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for series in &self.series {
            match series.first_value() {
                Some(value) => writeln!(f, "{}: {}", series.key, value)?,
                None => writeln!(f, "{}: -", series.key)?,
            }
        }
        Ok(())
    }
}
