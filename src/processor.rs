use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use chrono::{Datelike, Timelike, Weekday};

use crate::error::{DashboardError, Result};
use crate::models::{
    ClusterSummary, Dataset, DatasetProfile, DensityGrid, Extent, GroupCount, LabeledDataset,
    Record,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Category,
    District,
    Resolution,
    DayOfWeek,
    Description,
    Address,
}

impl FromStr for Field {
    type Err = DashboardError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "category" => Ok(Field::Category),
            "district" | "pddistrict" => Ok(Field::District),
            "resolution" => Ok(Field::Resolution),
            "day_of_week" | "dayofweek" | "day" => Ok(Field::DayOfWeek),
            "description" | "descript" => Ok(Field::Description),
            "address" => Ok(Field::Address),
            other => Err(DashboardError::validation(format!("unknown field '{other}'"))),
        }
    }
}

impl Field {
    fn value_of(self, record: &Record) -> Option<String> {
        match self {
            Field::Category => Some(record.category.clone()),
            Field::District => record.district.clone(),
            Field::Resolution => Some(record.resolution.clone()),
            Field::DayOfWeek => Some(weekday_name(record.day_of_week).to_string()),
            Field::Description => Some(record.description.clone()),
            Field::Address => Some(record.address.clone()),
        }
    }
}

/// Keeps records whose `field` equals any of `values`, compared exactly.
/// An empty value set matches everything.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub field: Field,
    pub values: Vec<String>,
}

impl Predicate {
    pub fn new(field: &str, values: Vec<String>) -> Result<Self> {
        Ok(Predicate {
            field: field.parse()?,
            values,
        })
    }

    /// Parses a `field=value1,value2` filter expression. Blank values are
    /// dropped, so `field=` matches everything.
    pub fn parse(raw: &str) -> Result<Self> {
        let (field, values) = raw.split_once('=').ok_or_else(|| {
            DashboardError::validation(format!("filter '{raw}' must look like field=value1,value2"))
        })?;
        let values = values
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect();
        Predicate::new(field, values)
    }

    fn matches(&self, record: &Record) -> bool {
        if self.values.is_empty() {
            return true;
        }
        match self.field.value_of(record) {
            Some(value) => self.values.iter().any(|wanted| *wanted == value),
            None => false,
        }
    }
}

pub fn filter(dataset: &Dataset, predicates: &[Predicate]) -> Dataset {
    let records = dataset
        .records
        .iter()
        .filter(|record| predicates.iter().all(|predicate| predicate.matches(record)))
        .cloned()
        .collect();

    Dataset {
        source: dataset.source.clone(),
        total_rows: dataset.total_rows,
        records,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBucket {
    DayOfWeek,
    HourOfDay,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    Category,
    District,
    Resolution,
    Time(TimeBucket),
}

impl FromStr for GroupKey {
    type Err = DashboardError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "category" => Ok(GroupKey::Category),
            "district" => Ok(GroupKey::District),
            "resolution" => Ok(GroupKey::Resolution),
            "day" | "day_of_week" => Ok(GroupKey::Time(TimeBucket::DayOfWeek)),
            "hour" => Ok(GroupKey::Time(TimeBucket::HourOfDay)),
            "month" => Ok(GroupKey::Time(TimeBucket::Month)),
            "year" => Ok(GroupKey::Time(TimeBucket::Year)),
            other => Err(DashboardError::validation(format!("unknown group key '{other}'"))),
        }
    }
}

impl GroupKey {
    fn key_of(self, record: &Record) -> Option<String> {
        match self {
            GroupKey::Category => Some(record.category.clone()),
            GroupKey::District => record.district.clone(),
            GroupKey::Resolution => Some(record.resolution.clone()),
            GroupKey::Time(TimeBucket::DayOfWeek) => {
                Some(weekday_name(record.day_of_week).to_string())
            }
            GroupKey::Time(TimeBucket::HourOfDay) => {
                Some(format!("{:02}", record.timestamp.hour()))
            }
            GroupKey::Time(TimeBucket::Month) => Some(format!(
                "{}-{:02}",
                record.timestamp.year(),
                record.timestamp.month()
            )),
            GroupKey::Time(TimeBucket::Year) => Some(record.timestamp.year().to_string()),
        }
    }
}

/// Counts per group, most frequent first; ties by ascending key.
pub fn aggregate(dataset: &Dataset, key: GroupKey) -> Vec<GroupCount> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut total = 0usize;

    for record in &dataset.records {
        if let Some(value) = key.key_of(record) {
            *counts.entry(value).or_insert(0) += 1;
            total += 1;
        }
    }

    let mut groups: Vec<GroupCount> = counts
        .into_iter()
        .map(|(key, count)| GroupCount {
            key,
            count,
            share: count as f64 / total as f64,
        })
        .collect();

    groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    groups
}

pub fn top_n(mut groups: Vec<GroupCount>, n: usize) -> Vec<GroupCount> {
    groups.truncate(n);
    groups
}

/// Reorders weekday groups Monday through Sunday, dropping absent days.
pub fn in_weekday_order(groups: &[GroupCount]) -> Vec<GroupCount> {
    WEEK.iter()
        .filter_map(|day| {
            groups
                .iter()
                .find(|group| group.key == weekday_name(*day))
                .cloned()
        })
        .collect()
}

/// One summary per cluster, largest first; ties by ascending cluster id.
pub fn summarize_clusters(labeled: &LabeledDataset) -> Vec<ClusterSummary> {
    struct Accumulator<'a> {
        count: usize,
        latitude_sum: f64,
        longitude_sum: f64,
        extent: Extent,
        categories: BTreeMap<&'a str, usize>,
    }

    let mut clusters: BTreeMap<u32, Accumulator> = BTreeMap::new();
    for (record, id) in labeled.clustered() {
        let entry = clusters.entry(id).or_insert_with(|| Accumulator {
            count: 0,
            latitude_sum: 0.0,
            longitude_sum: 0.0,
            extent: Extent {
                min_latitude: record.latitude,
                max_latitude: record.latitude,
                min_longitude: record.longitude,
                max_longitude: record.longitude,
            },
            categories: BTreeMap::new(),
        });

        entry.count += 1;
        entry.latitude_sum += record.latitude;
        entry.longitude_sum += record.longitude;
        entry.extent.min_latitude = entry.extent.min_latitude.min(record.latitude);
        entry.extent.max_latitude = entry.extent.max_latitude.max(record.latitude);
        entry.extent.min_longitude = entry.extent.min_longitude.min(record.longitude);
        entry.extent.max_longitude = entry.extent.max_longitude.max(record.longitude);
        *entry.categories.entry(record.category.as_str()).or_insert(0) += 1;
    }

    let mut summaries: Vec<ClusterSummary> = clusters
        .into_iter()
        .map(|(cluster_id, acc)| {
            // Highest count wins; ties go to the alphabetically first category.
            let dominant_category = acc
                .categories
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(category, _)| category.to_string())
                .unwrap_or_default();

            ClusterSummary {
                cluster_id,
                member_count: acc.count,
                center_latitude: acc.latitude_sum / acc.count as f64,
                center_longitude: acc.longitude_sum / acc.count as f64,
                dominant_category,
                extent: acc.extent,
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.member_count
            .cmp(&a.member_count)
            .then_with(|| a.cluster_id.cmp(&b.cluster_id))
    });
    summaries
}

/// Bins coordinates into a `bins` x `bins` grid of equal-width cells.
pub fn density_grid(dataset: &Dataset, bins: usize) -> DensityGrid {
    let bins = bins.max(1);
    if dataset.is_empty() {
        return DensityGrid {
            bins,
            max_cell: 0,
            occupied_cells: 0,
            mean_per_cell: 0.0,
        };
    }

    let (min_lat, max_lat, min_lon, max_lon) = dataset.records.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(min_lat, max_lat, min_lon, max_lon), record| {
            (
                min_lat.min(record.latitude),
                max_lat.max(record.latitude),
                min_lon.min(record.longitude),
                max_lon.max(record.longitude),
            )
        },
    );

    let cell = |value: f64, min: f64, max: f64| -> usize {
        if max > min {
            (((value - min) / (max - min)) * bins as f64).floor().min((bins - 1) as f64) as usize
        } else {
            0
        }
    };

    let mut cells = vec![0usize; bins * bins];
    for record in &dataset.records {
        let row = cell(record.latitude, min_lat, max_lat);
        let col = cell(record.longitude, min_lon, max_lon);
        cells[row * bins + col] += 1;
    }

    DensityGrid {
        bins,
        max_cell: cells.iter().copied().max().unwrap_or(0),
        occupied_cells: cells.iter().filter(|count| **count > 0).count(),
        mean_per_cell: dataset.len() as f64 / cells.len() as f64,
    }
}

pub fn profile(dataset: &Dataset) -> DatasetProfile {
    let categories: HashSet<&str> = dataset
        .records
        .iter()
        .map(|record| record.category.as_str())
        .collect();
    let districts: HashSet<&str> = dataset
        .records
        .iter()
        .filter_map(|record| record.district.as_deref())
        .collect();

    DatasetProfile {
        record_count: dataset.len(),
        total_rows: dataset.total_rows,
        category_count: categories.len(),
        district_count: districts.len(),
        missing_district: dataset
            .records
            .iter()
            .filter(|record| record.district.is_none())
            .count(),
        top_category: aggregate(dataset, GroupKey::Category).into_iter().next(),
        top_district: aggregate(dataset, GroupKey::District).into_iter().next(),
        peak_day: aggregate(dataset, GroupKey::Time(TimeBucket::DayOfWeek))
            .into_iter()
            .next(),
    }
}

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{self, record};
    use crate::models::{ClusterLabel, ClusterParams};
    use std::sync::Arc;

    fn mixed_dataset() -> Dataset {
        fixtures::dataset(vec![
            record("BURGLARY", Some("MISSION"), -122.41, 37.76),
            record("ASSAULT", Some("SOUTHERN"), -122.40, 37.78),
            record("BURGLARY", Some("SOUTHERN"), -122.40, 37.77),
            record("THEFT", None, -122.43, 37.79),
            record("ASSAULT", Some("MISSION"), -122.42, 37.75),
        ])
    }

    #[test]
    fn filter_keeps_matching_records_unchanged() {
        let dataset = mixed_dataset();
        let predicate = Predicate::new("category", vec!["BURGLARY".to_string()]).unwrap();
        let filtered = filter(&dataset, &[predicate]);

        assert_eq!(filtered.len(), 2);
        assert!(filtered.records.iter().all(|r| r.category == "BURGLARY"));
        assert_eq!(filtered.records[0], dataset.records[0]);
        assert_eq!(filtered.records[1], dataset.records[2]);
    }

    #[test]
    fn filter_combines_predicates() {
        let dataset = mixed_dataset();
        let predicates = vec![
            Predicate::new("category", vec!["ASSAULT".into(), "BURGLARY".into()]).unwrap(),
            Predicate::new("district", vec!["SOUTHERN".into()]).unwrap(),
            Predicate::new("resolution", vec![]).unwrap(),
        ];
        let filtered = filter(&dataset, &predicates);
        assert_eq!(filtered.len(), 2);
        assert!(filtered
            .records
            .iter()
            .all(|r| r.district.as_deref() == Some("SOUTHERN")));
    }

    #[test]
    fn filter_values_match_exactly() {
        let dataset = mixed_dataset();
        let predicate = Predicate::new("category", vec!["burglary".to_string()]).unwrap();
        assert!(filter(&dataset, &[predicate]).is_empty());
    }

    #[test]
    fn parses_filter_expressions() {
        let predicate = Predicate::parse("district= MISSION ,SOUTHERN,").unwrap();
        assert_eq!(predicate.field, Field::District);
        assert_eq!(predicate.values, vec!["MISSION".to_string(), "SOUTHERN".to_string()]);

        let everything = Predicate::parse("category=").unwrap();
        assert!(everything.values.is_empty());
        assert_eq!(filter(&mixed_dataset(), &[everything]).len(), 5);
    }

    #[test]
    fn malformed_filter_expressions_are_rejected() {
        for raw in ["category", "weapon=KNIFE", "=BURGLARY"] {
            let err = Predicate::parse(raw).unwrap_err();
            assert!(matches!(err, DashboardError::Validation(_)), "{raw}");
        }
    }

    #[test]
    fn unknown_filter_field_is_rejected() {
        let err = Predicate::new("weapon", vec!["KNIFE".into()]).unwrap_err();
        assert!(matches!(err, DashboardError::Validation(_)));
    }

    #[test]
    fn aggregate_orders_by_count_then_key() {
        let groups = aggregate(&mixed_dataset(), GroupKey::Category);
        let keys: Vec<&str> = groups.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["ASSAULT", "BURGLARY", "THEFT"]);
        assert_eq!(groups[0].count, 2);
        assert!((groups[2].share - 0.2).abs() < 1e-12);
    }

    #[test]
    fn aggregate_by_district_skips_missing() {
        let groups = aggregate(&mixed_dataset(), GroupKey::District);
        assert_eq!(groups.iter().map(|g| g.count).sum::<usize>(), 4);
        assert_eq!(groups[0].key, "MISSION");
    }

    #[test]
    fn aggregate_empty_dataset_is_empty() {
        let empty = fixtures::dataset(Vec::new());
        assert!(aggregate(&empty, GroupKey::District).is_empty());
    }

    #[test]
    fn time_buckets_group_by_timestamp() {
        let mut late = record("THEFT", None, -122.4, 37.7);
        late.timestamp = fixtures::timestamp(2016, 3, 9, 23);
        late.day_of_week = Weekday::Wed;
        let dataset = fixtures::dataset(vec![record("THEFT", None, -122.4, 37.7), late]);

        let hours = aggregate(&dataset, GroupKey::Time(TimeBucket::HourOfDay));
        assert_eq!(hours[0].key, "12");
        assert_eq!(hours[1].key, "23");

        let months = aggregate(&dataset, "month".parse().unwrap());
        assert_eq!(months[0].key, "2016-01");

        let days = in_weekday_order(&aggregate(&dataset, GroupKey::Time(TimeBucket::DayOfWeek)));
        let names: Vec<&str> = days.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(names, vec!["Monday", "Wednesday"]);
    }

    #[test]
    fn unknown_group_key_is_rejected() {
        assert!("weapon".parse::<GroupKey>().is_err());
    }

    #[test]
    fn cluster_summaries_sorted_by_size() {
        let dataset = Arc::new(mixed_dataset());
        let labeled = LabeledDataset {
            dataset,
            labels: vec![
                ClusterLabel::Cluster(0),
                ClusterLabel::Cluster(1),
                ClusterLabel::Cluster(1),
                ClusterLabel::Noise,
                ClusterLabel::Cluster(0),
            ],
            params: ClusterParams {
                epsilon: 0.1,
                min_samples: 2,
            },
        };

        let summaries = summarize_clusters(&labeled);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].cluster_id, 0);
        assert_eq!(summaries[0].member_count, 2);
        // BURGLARY and ASSAULT tie in cluster 0; alphabetical wins.
        assert_eq!(summaries[0].dominant_category, "ASSAULT");
        assert_eq!(summaries[1].dominant_category, "ASSAULT");
        assert!((summaries[1].center_latitude - 37.775).abs() < 1e-9);
        assert_eq!(summaries[1].extent.min_latitude, 37.77);
        assert_eq!(summaries[1].extent.max_latitude, 37.78);
    }

    #[test]
    fn summaries_of_all_noise_are_empty() {
        let dataset = fixtures::points(&[(0.0, 0.0), (1.0, 1.0)]);
        let labeled = LabeledDataset {
            labels: vec![ClusterLabel::Noise; dataset.len()],
            dataset,
            params: ClusterParams {
                epsilon: 0.1,
                min_samples: 5,
            },
        };
        assert!(summarize_clusters(&labeled).is_empty());
    }

    #[test]
    fn density_grid_finds_hot_cell() {
        let dataset = fixtures::points(&[(0.0, 0.0), (0.01, 0.01), (0.02, 0.0), (1.0, 1.0)]);
        let grid = density_grid(&dataset, 10);
        assert_eq!(grid.max_cell, 3);
        assert_eq!(grid.occupied_cells, 2);
        assert!((grid.mean_per_cell - 0.04).abs() < 1e-12);
    }

    #[test]
    fn profile_reports_counts() {
        let profile = profile(&mixed_dataset());
        assert_eq!(profile.record_count, 5);
        assert_eq!(profile.category_count, 3);
        assert_eq!(profile.district_count, 2);
        assert_eq!(profile.missing_district, 1);
        assert_eq!(profile.top_category.unwrap().key, "ASSAULT");
        assert_eq!(profile.peak_day.unwrap().key, "Monday");
    }
}
