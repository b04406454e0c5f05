use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use dashmap::DashMap;
use geojson::GeoJson;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;

use crate::error::{DashboardError, Result};
use crate::models::{BoundarySet, Dataset, Record};
use crate::settings::Settings;

const DATE_TIME_FORMATS: &[&str] = &["%m/%d/%Y %I:%M:%S %p", "%Y-%m-%dT%H:%M:%S%.f"];
const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataSource {
    Url(String),
    Path(PathBuf),
}

impl DataSource {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            DataSource::Url(raw.to_string())
        } else {
            DataSource::Path(PathBuf::from(raw))
        }
    }

    pub fn id(&self) -> String {
        match self {
            DataSource::Url(url) => url.clone(),
            DataSource::Path(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    source: DataSource,
    sample_cap: Option<usize>,
}

/// Memoizes datasets and boundary files by their input parameters.
///
/// Values are immutable once inserted, so callers share them through `Arc`
/// without further coordination.
pub struct DatasetCache {
    client: reqwest::Client,
    sample_seed: u64,
    boundary_name_property: String,
    datasets: DashMap<CacheKey, Arc<Dataset>>,
    boundaries: DashMap<DataSource, Arc<BoundarySet>>,
}

impl DatasetCache {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.fetch_timeout_secs.max(1)))
            .build()
            .map_err(|err| DashboardError::unavailable("http client", err))?;

        Ok(DatasetCache {
            client,
            sample_seed: settings.sample_seed,
            boundary_name_property: settings.boundary_name_property.clone(),
            datasets: DashMap::new(),
            boundaries: DashMap::new(),
        })
    }

    #[tracing::instrument(skip(self, source), fields(source = %source.id()))]
    pub async fn load(
        &self,
        source: &DataSource,
        sample_cap: Option<usize>,
    ) -> Result<Arc<Dataset>> {
        if sample_cap == Some(0) {
            return Err(DashboardError::validation("sample size must be at least 1"));
        }

        let key = CacheKey {
            source: source.clone(),
            sample_cap,
        };
        if let Some(hit) = self.datasets.get(&key) {
            tracing::debug!("dataset cache hit");
            return Ok(Arc::clone(hit.value()));
        }
        tracing::debug!("dataset cache miss");

        let bytes = self.fetch(source).await?;
        let records = parse_records(&source.id(), bytes.as_slice())?;
        let total_rows = records.len();
        let records = match sample_cap {
            Some(cap) => sample_records(records, cap, self.sample_seed),
            None => records,
        };
        tracing::info!(total_rows, kept = records.len(), "dataset loaded");

        let dataset = Arc::new(Dataset {
            source: source.id(),
            total_rows,
            records,
        });
        let stored = self.datasets.entry(key).or_insert(dataset);
        Ok(Arc::clone(stored.value()))
    }

    #[tracing::instrument(skip(self, source), fields(source = %source.id()))]
    pub async fn load_boundaries(&self, source: &DataSource) -> Result<Arc<BoundarySet>> {
        if let Some(hit) = self.boundaries.get(source) {
            tracing::debug!("boundary cache hit");
            return Ok(Arc::clone(hit.value()));
        }

        let bytes = self.fetch(source).await?;
        let text = String::from_utf8(bytes)
            .map_err(|err| DashboardError::unavailable(source.id(), err))?;
        let boundaries = Arc::new(parse_boundaries(
            &source.id(),
            &text,
            &self.boundary_name_property,
        )?);
        tracing::info!(regions = boundaries.collection.features.len(), "boundaries loaded");

        let stored = self.boundaries.entry(source.clone()).or_insert(boundaries);
        Ok(Arc::clone(stored.value()))
    }

    async fn fetch(&self, source: &DataSource) -> Result<Vec<u8>> {
        match source {
            DataSource::Url(url) => {
                tracing::info!(%url, "fetching remote source");
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .and_then(|response| response.error_for_status())
                    .map_err(|err| DashboardError::unavailable(url.clone(), err))?;
                let body = response
                    .bytes()
                    .await
                    .map_err(|err| DashboardError::unavailable(url.clone(), err))?;
                Ok(body.to_vec())
            }
            DataSource::Path(path) => tokio::fs::read(path)
                .await
                .map_err(|err| DashboardError::unavailable(path.display().to_string(), err)),
        }
    }
}

#[derive(Deserialize)]
struct CsvRow {
    #[serde(rename = "IncidntNum")]
    incident_num: i64,
    #[serde(rename = "Category")]
    category: String,
    #[serde(rename = "Descript", default)]
    description: String,
    #[serde(rename = "DayOfWeek", default)]
    day_of_week: Option<String>,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Time", default)]
    time: Option<String>,
    #[serde(rename = "PdDistrict", default)]
    district: Option<String>,
    #[serde(rename = "Resolution", default)]
    resolution: String,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "X")]
    longitude: f64,
    #[serde(rename = "Y")]
    latitude: f64,
    #[serde(rename = "PdId", default)]
    pd_id: i64,
}

/// Parses and validates the incident CSV. Any bad row fails the whole load.
pub fn parse_records<R: Read>(source_id: &str, reader: R) -> Result<Vec<Record>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut records = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.map_err(|err| DashboardError::unavailable(source_id, err))?;
        let record = row.into_record().map_err(|reason| {
            DashboardError::unavailable(source_id, format!("row {}: {reason}", index + 1))
        })?;
        records.push(record);
    }

    Ok(records)
}

impl CsvRow {
    fn into_record(self) -> std::result::Result<Record, String> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("latitude {} out of range", self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(format!("longitude {} out of range", self.longitude));
        }

        let timestamp = parse_timestamp(&self.date, self.time.as_deref())?;
        let day_of_week = match self.day_of_week.as_deref().map(str::trim) {
            Some(day) if !day.is_empty() => day
                .parse::<Weekday>()
                .map_err(|_| format!("unknown day of week '{day}'"))?,
            _ => timestamp.weekday(),
        };
        let district = self
            .district
            .map(|district| district.trim().to_string())
            .filter(|district| !district.is_empty());

        Ok(Record {
            incident_num: self.incident_num,
            category: self.category.trim().to_string(),
            description: self.description,
            day_of_week,
            timestamp,
            district,
            resolution: self.resolution.trim().to_string(),
            address: self.address,
            longitude: self.longitude,
            latitude: self.latitude,
            pd_id: self.pd_id,
        })
    }
}

fn parse_timestamp(date: &str, time: Option<&str>) -> std::result::Result<NaiveDateTime, String> {
    let date = date.trim();
    let base = DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(date, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(date, format).ok())
                .map(|day| day.and_time(NaiveTime::MIN))
        })
        .ok_or_else(|| format!("unrecognized date '{date}'"))?;

    match time.map(str::trim) {
        Some(time) if !time.is_empty() => {
            let time = NaiveTime::parse_from_str(time, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
                .map_err(|_| format!("unrecognized time '{time}'"))?;
            Ok(base.date().and_time(time))
        }
        _ => Ok(base),
    }
}

/// Seeded choice of at most `cap` distinct indices below `len`, ascending.
pub fn sample_indices(len: usize, cap: usize, seed: u64) -> Vec<usize> {
    if cap >= len {
        return (0..len).collect();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut chosen = rand::seq::index::sample(&mut rng, len, cap).into_vec();
    chosen.sort_unstable();
    chosen
}

/// Deterministic sample of at most `cap` records, kept in source order.
pub fn sample_records(records: Vec<Record>, cap: usize, seed: u64) -> Vec<Record> {
    if cap >= records.len() {
        return records;
    }

    let mut keep = vec![false; records.len()];
    for index in sample_indices(records.len(), cap, seed) {
        keep[index] = true;
    }
    records
        .into_iter()
        .zip(keep)
        .filter_map(|(record, keep)| keep.then_some(record))
        .collect()
}

pub fn parse_boundaries(source_id: &str, text: &str, name_property: &str) -> Result<BoundarySet> {
    let geojson = text
        .parse::<GeoJson>()
        .map_err(|err| DashboardError::unavailable(source_id, err))?;

    match geojson {
        GeoJson::FeatureCollection(collection) => Ok(BoundarySet {
            source: source_id.to_string(),
            name_property: name_property.to_string(),
            collection,
        }),
        _ => Err(DashboardError::unavailable(
            source_id,
            "boundary file is not a FeatureCollection",
        )),
    }
}
