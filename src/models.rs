use std::sync::Arc;

use chrono::{NaiveDateTime, Weekday};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub incident_num: i64,
    pub category: String,
    pub description: String,
    pub day_of_week: Weekday,
    pub timestamp: NaiveDateTime,
    pub district: Option<String>,
    pub resolution: String,
    pub address: String,
    pub longitude: f64,
    pub latitude: f64,
    pub pd_id: i64,
}

/// Records in source order, plus where they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub source: String,
    /// Row count before any sampling was applied.
    pub total_rows: usize,
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterLabel {
    Noise,
    Cluster(u32),
}

impl ClusterLabel {
    pub fn cluster_id(self) -> Option<u32> {
        match self {
            ClusterLabel::Noise => None,
            ClusterLabel::Cluster(id) => Some(id),
        }
    }

    pub fn is_noise(self) -> bool {
        matches!(self, ClusterLabel::Noise)
    }

    /// Numeric form used in exported tables, with `-1` for noise.
    pub fn as_i64(self) -> i64 {
        match self {
            ClusterLabel::Noise => -1,
            ClusterLabel::Cluster(id) => i64::from(id),
        }
    }
}

impl std::fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterLabel::Noise => write!(f, "noise"),
            ClusterLabel::Cluster(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClusterParams {
    pub epsilon: f64,
    pub min_samples: usize,
}

/// A dataset together with the labels one clustering run assigned to it.
#[derive(Debug, Clone)]
pub struct LabeledDataset {
    pub dataset: Arc<Dataset>,
    pub labels: Vec<ClusterLabel>,
    pub params: ClusterParams,
}

impl LabeledDataset {
    pub fn records(&self) -> &[Record] {
        &self.dataset.records
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Record, ClusterLabel)> {
        self.dataset.records.iter().zip(self.labels.iter().copied())
    }

    pub fn clustered(&self) -> impl Iterator<Item = (&Record, u32)> {
        self.iter()
            .filter_map(|(record, label)| label.cluster_id().map(|id| (record, id)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Extent {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub cluster_id: u32,
    pub member_count: usize,
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub dominant_category: String,
    pub extent: Extent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub total_points: usize,
    pub cluster_count: usize,
    pub noise_count: usize,
    pub clustered_count: usize,
    pub noise_ratio: f64,
    pub clustered_ratio: f64,
    pub silhouette: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupCount {
    pub key: String,
    pub count: usize,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DensityGrid {
    pub bins: usize,
    pub max_cell: usize,
    pub occupied_cells: usize,
    pub mean_per_cell: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetProfile {
    pub record_count: usize,
    pub total_rows: usize,
    pub category_count: usize,
    pub district_count: usize,
    pub missing_district: usize,
    pub top_category: Option<GroupCount>,
    pub top_district: Option<GroupCount>,
    pub peak_day: Option<GroupCount>,
}

/// Named region polygons used for choropleth rendering.
#[derive(Debug, Clone)]
pub struct BoundarySet {
    pub source: String,
    pub name_property: String,
    pub collection: geojson::FeatureCollection,
}

impl BoundarySet {
    pub fn region_names(&self) -> Vec<String> {
        self.collection
            .features
            .iter()
            .filter_map(|feature| feature.property(&self.name_property))
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use chrono::{Datelike, NaiveDate, NaiveDateTime};

    use super::{Dataset, Record};

    pub fn timestamp(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .unwrap()
    }

    pub fn record(category: &str, district: Option<&str>, longitude: f64, latitude: f64) -> Record {
        let timestamp = timestamp(2016, 1, 4, 12);
        Record {
            incident_num: 1,
            category: category.to_string(),
            description: format!("{} INCIDENT", category),
            day_of_week: timestamp.weekday(),
            timestamp,
            district: district.map(str::to_string),
            resolution: "NONE".to_string(),
            address: "800 Block of BRYANT ST".to_string(),
            longitude,
            latitude,
            pd_id: 1,
        }
    }

    pub fn dataset(records: Vec<Record>) -> Dataset {
        Dataset {
            source: "fixture".to_string(),
            total_rows: records.len(),
            records,
        }
    }

    /// One `THEFT` record per `(longitude, latitude)` pair, numbered in order.
    pub fn points(coordinates: &[(f64, f64)]) -> Arc<Dataset> {
        let records = coordinates
            .iter()
            .enumerate()
            .map(|(index, (longitude, latitude))| {
                let mut record = record("THEFT", Some("SOUTHERN"), *longitude, *latitude);
                record.incident_num = index as i64;
                record
            })
            .collect();
        Arc::new(dataset(records))
    }
}
