// Weather variable series and the station instances they are loaded from
use super::time_range::TimeRange;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

/// One weather variable (e.g. "outdoor_temp") and its samples over a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableSeries {
    pub key: String,
    pub points: Vec<TimeSeriesPoint>,
    pub shown: bool,
}

impl VariableSeries {
    pub fn new(key: String, points: Vec<TimeSeriesPoint>) -> Self {
        Self {
            key,
            points,
            shown: false,
        }
    }

    pub fn first_value(&self) -> Option<f64> {
        self.points.first().map(|p| p.value)
    }

    pub fn retain_within(&mut self, range: &TimeRange) {
        self.points.retain(|p| range.contains(p.time_ms));
    }
}

/// A variable column sampled on a regular grid; `None` marks a missing sample.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedColumn {
    pub key: String,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstancePayload {
    Expanded(Vec<VariableSeries>),
    Compressed {
        start_ms: i64,
        step_ms: i64,
        columns: Vec<CompressedColumn>,
    },
}

/// One record of station data as returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct StationInstance {
    pub station_id: String,
    pub payload: InstancePayload,
}

impl StationInstance {
    pub fn expanded(station_id: String, series: Vec<VariableSeries>) -> Self {
        Self {
            station_id,
            payload: InstancePayload::Expanded(series),
        }
    }

    pub fn compressed(
        station_id: String,
        start_ms: i64,
        step_ms: i64,
        columns: Vec<CompressedColumn>,
    ) -> Self {
        Self {
            station_id,
            payload: InstancePayload::Compressed {
                start_ms,
                step_ms,
                columns,
            },
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.payload, InstancePayload::Compressed { .. })
    }

    /// Expand the payload into per-sample series.
    pub fn into_series(self) -> Vec<VariableSeries> {
        match self.payload {
            InstancePayload::Expanded(series) => series,
            InstancePayload::Compressed {
                start_ms,
                step_ms,
                columns,
            } => columns
                .into_iter()
                .map(|column| {
                    let points = column
                        .values
                        .into_iter()
                        .enumerate()
                        .filter_map(|(i, value)| {
                            value.map(|v| TimeSeriesPoint::new(start_ms + i as i64 * step_ms, v))
                        })
                        .collect();
                    VariableSeries::new(column.key, points)
                })
                .collect(),
        }
    }

    /// Expand and keep only the samples inside `range`.
    pub fn into_series_within(self, range: &TimeRange) -> Vec<VariableSeries> {
        let mut series = self.into_series();
        for s in &mut series {
            s.retain_within(range);
        }
        series
    }
}
