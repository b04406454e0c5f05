use std::path::Path;

use anyhow::Context;
use geojson::GeoJson;
use serde::Serialize;
use serde_json::json;

use crate::charts::{self, Chart};
use crate::error::{DashboardError, Result};
use crate::loader;
use crate::maps::{self, HeatParams, MapView};
use crate::models::{BoundarySet, Dataset, LabeledDataset, QualityMetrics};
use crate::processor::{self, GroupKey, TimeBucket};
use crate::report;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum View {
    Overview,
    Categories,
    Districts,
    Days,
    Resolutions,
    Locations,
    ClustersWithNoise,
    ClustersWithoutNoise,
    ClusterSizes,
    NoiseShare,
    ClusterTable,
    ClusterCentersMap,
    CrimeMarkersMap { limit: usize },
    MarkerClusterMap { limit: usize },
    CombinedMap { limit: usize },
    HeatMap(HeatParams),
    Choropleth,
    Summary,
    Records {
        limit: usize,
        random: bool,
        with_clusters: bool,
    },
}

/// Display parameters that only some views consume.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewOptions {
    pub limit: Option<usize>,
    pub heat: HeatParams,
    /// Seeded random rows instead of the first rows.
    pub random: bool,
    /// Adds a cluster label column to row tables.
    pub with_clusters: bool,
}

const DEFAULT_RECORD_ROWS: usize = 10;

pub const VIEW_NAMES: &[&str] = &[
    "overview",
    "categories",
    "districts",
    "days",
    "resolutions",
    "locations",
    "clusters-with-noise",
    "clusters-without-noise",
    "cluster-sizes",
    "noise-share",
    "cluster-table",
    "cluster-centers-map",
    "crime-markers-map",
    "marker-cluster-map",
    "combined-map",
    "heat-map",
    "choropleth",
    "summary",
    "records",
];

impl View {
    pub fn from_name(name: &str, options: &ViewOptions, settings: &Settings) -> Result<Self> {
        let view = match name.trim().to_ascii_lowercase().as_str() {
            "overview" => View::Overview,
            "categories" => View::Categories,
            "districts" => View::Districts,
            "days" => View::Days,
            "resolutions" => View::Resolutions,
            "locations" => View::Locations,
            "clusters-with-noise" => View::ClustersWithNoise,
            "clusters-without-noise" => View::ClustersWithoutNoise,
            "cluster-sizes" => View::ClusterSizes,
            "noise-share" => View::NoiseShare,
            "cluster-table" => View::ClusterTable,
            "cluster-centers-map" => View::ClusterCentersMap,
            "crime-markers-map" => View::CrimeMarkersMap {
                limit: options.limit.unwrap_or(settings.marker_limit),
            },
            "marker-cluster-map" => View::MarkerClusterMap {
                limit: options.limit.unwrap_or(settings.marker_cluster_limit),
            },
            "combined-map" => View::CombinedMap {
                limit: options.limit.unwrap_or(settings.combined_point_limit),
            },
            "heat-map" => View::HeatMap(options.heat),
            "choropleth" => View::Choropleth,
            "summary" => View::Summary,
            "records" => {
                let limit = options.limit.unwrap_or(DEFAULT_RECORD_ROWS);
                if limit == 0 {
                    return Err(DashboardError::validation("records view needs at least 1 row"));
                }
                View::Records {
                    limit,
                    random: options.random,
                    with_clusters: options.with_clusters,
                }
            }
            other => {
                return Err(DashboardError::validation(format!(
                    "unknown view '{other}', expected one of: {}",
                    VIEW_NAMES.join(", ")
                )))
            }
        };
        Ok(view)
    }

    pub fn needs_clustering(&self) -> bool {
        matches!(
            self,
            View::ClustersWithNoise
                | View::ClustersWithoutNoise
                | View::ClusterSizes
                | View::NoiseShare
                | View::ClusterTable
                | View::ClusterCentersMap
                | View::CombinedMap { .. }
                | View::Summary
                | View::Records {
                    with_clusters: true,
                    ..
                }
        )
    }

    pub fn needs_boundaries(&self) -> bool {
        matches!(self, View::Choropleth)
    }

    /// Row cap the view samples to when the caller gives none. `None` means
    /// the whole dataset.
    pub fn default_sample_size(&self, settings: &Settings) -> Option<usize> {
        match self {
            View::Overview | View::Categories | View::Districts | View::Days | View::Resolutions
            | View::Choropleth => None,
            View::Records { with_clusters, .. } => with_clusters.then_some(settings.sample_size),
            View::HeatMap(_) => Some(settings.heat_sample_size),
            _ => Some(settings.sample_size),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmptyState {
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum Renderable {
    Chart(Chart),
    Map(MapView),
    Table(Table),
    Markdown(String),
    Empty(EmptyState),
}

impl Renderable {
    fn empty(title: &str, message: &str) -> Self {
        Renderable::Empty(EmptyState {
            title: title.to_string(),
            message: message.to_string(),
        })
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Renderable::Chart(_) => "svg",
            Renderable::Map(_) => "geojson",
            Renderable::Table(_) => "json",
            Renderable::Markdown(_) => "md",
            Renderable::Empty(_) => "txt",
        }
    }

    pub fn to_output(&self) -> anyhow::Result<String> {
        let output = match self {
            Renderable::Chart(chart) => charts::render_svg(chart)?,
            Renderable::Map(map) => GeoJson::from(map.to_geojson()).to_string(),
            Renderable::Table(table) => serde_json::to_string_pretty(table)?,
            Renderable::Markdown(text) => text.clone(),
            Renderable::Empty(state) => format!("{}\n\n{}\n", state.title, state.message),
        };
        Ok(output)
    }

    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        let output = self.to_output()?;
        std::fs::write(path, output).with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Everything a view may read. Nothing here is mutated by rendering.
pub struct ViewContext<'a> {
    pub settings: &'a Settings,
    pub dataset: &'a Dataset,
    pub clustering: Option<(&'a LabeledDataset, &'a QualityMetrics)>,
    pub boundaries: Option<&'a BoundarySet>,
}

impl<'a> ViewContext<'a> {
    fn clustering(&self) -> Result<(&'a LabeledDataset, &'a QualityMetrics)> {
        self.clustering
            .ok_or_else(|| DashboardError::validation("this view needs a clustering run"))
    }
}

const NO_DATA: &str = "No incidents match the current selection.";
const NO_CLUSTERS: &str =
    "No clusters found with the current parameters. Try a larger eps or a smaller min_samples.";

pub fn render(view: View, ctx: &ViewContext) -> Result<Renderable> {
    let dataset = ctx.dataset;
    let settings = ctx.settings;

    if dataset.is_empty() {
        return Ok(Renderable::empty("No data", NO_DATA));
    }

    let rendered = match view {
        View::Overview => Renderable::Table(overview_table(dataset)),
        View::Categories => Renderable::Chart(charts::bar_chart(
            "Top 10 Crime Categories",
            "Number of Incidents",
            "Category",
            &processor::top_n(processor::aggregate(dataset, GroupKey::Category), 10),
            "#4682b4",
            true,
        )),
        View::Districts => {
            let districts = processor::aggregate(dataset, GroupKey::District);
            if districts.is_empty() {
                Renderable::empty("Incidents by Police District", "No incidents carry a district.")
            } else {
                Renderable::Chart(charts::bar_chart(
                    "Incidents by Police District",
                    "Number of Incidents",
                    "District",
                    &districts,
                    "#ff7f50",
                    true,
                ))
            }
        }
        View::Days => Renderable::Chart(charts::bar_chart(
            "Crime Distribution by Day",
            "Day of Week",
            "Number of Incidents",
            &processor::in_weekday_order(&processor::aggregate(
                dataset,
                GroupKey::Time(TimeBucket::DayOfWeek),
            )),
            "#008080",
            false,
        )),
        View::Resolutions => Renderable::Chart(charts::bar_chart(
            "Top 10 Resolution Types",
            "Resolution Type",
            "Count",
            &processor::top_n(processor::aggregate(dataset, GroupKey::Resolution), 10),
            "#800080",
            false,
        )),
        View::Locations => Renderable::Chart(charts::location_scatter(dataset)),
        View::ClustersWithNoise => {
            let (labeled, _) = ctx.clustering()?;
            Renderable::Chart(charts::clusters_with_noise(labeled, &settings.cluster_palette))
        }
        View::ClustersWithoutNoise => {
            let (labeled, metrics) = ctx.clustering()?;
            if metrics.cluster_count == 0 {
                Renderable::empty("Crime Spots without Noise", NO_CLUSTERS)
            } else {
                let summaries = processor::summarize_clusters(labeled);
                Renderable::Chart(charts::clusters_without_noise(
                    labeled,
                    &summaries,
                    &settings.cluster_palette,
                ))
            }
        }
        View::ClusterSizes => {
            let (labeled, metrics) = ctx.clustering()?;
            if metrics.cluster_count == 0 {
                Renderable::empty("Points per Cluster", NO_CLUSTERS)
            } else {
                Renderable::Chart(charts::cluster_sizes(&processor::summarize_clusters(labeled)))
            }
        }
        View::NoiseShare => {
            let (_, metrics) = ctx.clustering()?;
            Renderable::Chart(charts::noise_share(metrics))
        }
        View::ClusterTable => {
            let (labeled, metrics) = ctx.clustering()?;
            if metrics.cluster_count == 0 {
                Renderable::empty("Cluster Details", NO_CLUSTERS)
            } else {
                Renderable::Table(cluster_table(labeled))
            }
        }
        View::ClusterCentersMap => {
            let (labeled, metrics) = ctx.clustering()?;
            if metrics.cluster_count == 0 {
                Renderable::empty("Cluster Centers", NO_CLUSTERS)
            } else {
                Renderable::Map(maps::cluster_center_map(
                    settings,
                    &processor::summarize_clusters(labeled),
                ))
            }
        }
        View::CrimeMarkersMap { limit } => {
            Renderable::Map(maps::circle_marker_map(settings, dataset, limit))
        }
        View::MarkerClusterMap { limit } => {
            Renderable::Map(maps::marker_cluster_map(settings, dataset, limit))
        }
        View::CombinedMap { limit } => {
            let (labeled, _) = ctx.clustering()?;
            Renderable::Map(maps::combined_map(
                settings,
                &processor::summarize_clusters(labeled),
                dataset,
                limit,
            ))
        }
        View::HeatMap(params) => Renderable::Map(maps::heat_map(settings, dataset, params)),
        View::Choropleth => {
            let boundaries = ctx
                .boundaries
                .ok_or_else(|| DashboardError::validation("choropleth needs a boundary file"))?;
            Renderable::Map(maps::choropleth_map(
                settings,
                boundaries,
                &processor::aggregate(dataset, GroupKey::District),
            ))
        }
        View::Summary => {
            let (labeled, metrics) = ctx.clustering()?;
            Renderable::Markdown(report::build_report(dataset, labeled, metrics))
        }
        View::Records { limit, random, .. } => Renderable::Table(records_table(ctx, limit, random)),
    };

    Ok(rendered)
}

fn overview_table(dataset: &Dataset) -> Table {
    let profile = processor::profile(dataset);
    let grid = processor::density_grid(dataset, 10);
    let group = |group: &Option<crate::models::GroupCount>| match group {
        Some(group) => json!(format!("{} ({})", group.key, group.count)),
        None => json!(null),
    };

    Table {
        columns: vec!["Metric".to_string(), "Value".to_string()],
        rows: vec![
            vec![json!("Total Records"), json!(profile.total_rows)],
            vec![json!("Records Analyzed"), json!(profile.record_count)],
            vec![json!("Crime Categories"), json!(profile.category_count)],
            vec![json!("Police Districts"), json!(profile.district_count)],
            vec![json!("Missing District"), json!(profile.missing_district)],
            vec![json!("Most Common Crime"), group(&profile.top_category)],
            vec![json!("Busiest District"), group(&profile.top_district)],
            vec![json!("Peak Day"), group(&profile.peak_day)],
            vec![json!("Max Density Grid Cell"), json!(grid.max_cell)],
            vec![json!("Avg per Grid Cell"), json!(grid.mean_per_cell)],
        ],
    }
}

const RECORD_COLUMNS: &[&str] = &[
    "IncidntNum",
    "Category",
    "Descript",
    "DayOfWeek",
    "Date",
    "Time",
    "PdDistrict",
    "Resolution",
    "Address",
    "X",
    "Y",
    "PdId",
];

/// Individual incidents, either the first `limit` or a seeded sample of
/// `limit` kept in source order. A clustering run adds a `Cluster` column
/// with `-1` for noise.
fn records_table(ctx: &ViewContext, limit: usize, random: bool) -> Table {
    let (records, labels) = match ctx.clustering {
        Some((labeled, _)) => (labeled.records(), Some(labeled.labels.as_slice())),
        None => (ctx.dataset.records.as_slice(), None),
    };
    let chosen: Vec<usize> = if random {
        loader::sample_indices(records.len(), limit, ctx.settings.sample_seed)
    } else {
        (0..records.len().min(limit)).collect()
    };

    let mut columns: Vec<String> = RECORD_COLUMNS.iter().map(|column| column.to_string()).collect();
    if labels.is_some() {
        columns.push("Cluster".to_string());
    }

    let rows = chosen
        .into_iter()
        .map(|index| {
            let record = &records[index];
            let mut row = vec![
                json!(record.incident_num),
                json!(record.category),
                json!(record.description),
                json!(processor::weekday_name(record.day_of_week)),
                json!(record.timestamp.format("%m/%d/%Y").to_string()),
                json!(record.timestamp.format("%H:%M").to_string()),
                json!(record.district),
                json!(record.resolution),
                json!(record.address),
                json!(record.longitude),
                json!(record.latitude),
                json!(record.pd_id),
            ];
            if let Some(labels) = labels {
                row.push(json!(labels[index].as_i64()));
            }
            row
        })
        .collect();

    Table { columns, rows }
}

fn cluster_table(labeled: &LabeledDataset) -> Table {
    Table {
        columns: [
            "Cluster ID",
            "Number of Points",
            "Center Latitude",
            "Center Longitude",
            "Top Crime Type",
            "Min Latitude",
            "Max Latitude",
            "Min Longitude",
            "Max Longitude",
        ]
        .iter()
        .map(|column| column.to_string())
        .collect(),
        rows: processor::summarize_clusters(labeled)
            .into_iter()
            .map(|summary| {
                vec![
                    json!(summary.cluster_id),
                    json!(summary.member_count),
                    json!(summary.center_latitude),
                    json!(summary.center_longitude),
                    json!(summary.dominant_category),
                    json!(summary.extent.min_latitude),
                    json!(summary.extent.max_latitude),
                    json!(summary.extent.min_longitude),
                    json!(summary.extent.max_longitude),
                ]
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::{self, Scaling};
    use crate::models::{fixtures, ClusterParams};
    use std::sync::Arc;

    fn clustered(dataset: &Arc<Dataset>, min_samples: usize) -> (LabeledDataset, QualityMetrics) {
        clustering::cluster(
            dataset,
            ClusterParams {
                epsilon: 0.02,
                min_samples,
            },
            Scaling::Raw,
            100,
        )
        .unwrap()
    }

    fn hotspot() -> Arc<Dataset> {
        fixtures::points(&[
            (-122.410, 37.780),
            (-122.411, 37.781),
            (-122.409, 37.779),
            (-122.300, 37.700),
        ])
    }

    #[test]
    fn unknown_view_is_rejected() {
        let settings = Settings::default();
        let err = View::from_name("pie-of-everything", &ViewOptions::default(), &settings)
            .unwrap_err();
        assert!(matches!(err, DashboardError::Validation(_)));
    }

    #[test]
    fn every_listed_name_parses() {
        let settings = Settings::default();
        for name in VIEW_NAMES {
            assert!(View::from_name(name, &ViewOptions::default(), &settings).is_ok(), "{name}");
        }
    }

    #[test]
    fn marker_limit_defaults_from_settings() {
        let settings = Settings::default();
        let view =
            View::from_name("crime-markers-map", &ViewOptions::default(), &settings).unwrap();
        assert_eq!(view, View::CrimeMarkersMap { limit: 1_000 });
    }

    #[test]
    fn all_noise_renders_empty_states() {
        let dataset = hotspot();
        let (labeled, metrics) = clustered(&dataset, 10);
        let settings = Settings::default();
        let ctx = ViewContext {
            settings: &settings,
            dataset: &dataset,
            clustering: Some((&labeled, &metrics)),
            boundaries: None,
        };

        for view in [
            View::ClustersWithoutNoise,
            View::ClusterSizes,
            View::ClusterTable,
            View::ClusterCentersMap,
        ] {
            assert!(matches!(render(view, &ctx).unwrap(), Renderable::Empty(_)));
        }
        assert!(matches!(render(View::ClustersWithNoise, &ctx).unwrap(), Renderable::Chart(_)));
        assert_eq!(labeled.labels, vec![crate::models::ClusterLabel::Noise; 4]);
    }

    #[test]
    fn empty_dataset_renders_empty_state() {
        let dataset = fixtures::points(&[]);
        let settings = Settings::default();
        let ctx = ViewContext {
            settings: &settings,
            dataset: &dataset,
            clustering: None,
            boundaries: None,
        };
        for view in [View::Overview, View::Districts, View::HeatMap(HeatParams::default())] {
            let rendered = render(view, &ctx).unwrap();
            assert!(matches!(rendered, Renderable::Empty(_)));
            assert_eq!(rendered.file_extension(), "txt");
        }
    }

    #[test]
    fn cluster_table_lists_hotspot() {
        let dataset = hotspot();
        let (labeled, metrics) = clustered(&dataset, 3);
        let settings = Settings::default();
        let ctx = ViewContext {
            settings: &settings,
            dataset: &dataset,
            clustering: Some((&labeled, &metrics)),
            boundaries: None,
        };

        let Renderable::Table(table) = render(View::ClusterTable, &ctx).unwrap() else {
            panic!("expected table");
        };
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][1], json!(3));
        assert_eq!(table.rows[0][4], json!("THEFT"));
    }

    fn record_table(
        view: View,
        dataset: &Dataset,
        clustering: Option<(&LabeledDataset, &QualityMetrics)>,
    ) -> Table {
        let settings = Settings::default();
        let ctx = ViewContext {
            settings: &settings,
            dataset,
            clustering,
            boundaries: None,
        };
        let Renderable::Table(table) = render(view, &ctx).unwrap() else {
            panic!("expected table");
        };
        table
    }

    #[test]
    fn records_view_shows_first_rows() {
        let dataset = hotspot();
        let options = ViewOptions {
            limit: Some(2),
            ..ViewOptions::default()
        };
        let view = View::from_name("records", &options, &Settings::default()).unwrap();
        assert!(!view.needs_clustering());

        let table = record_table(view, &dataset, None);
        assert_eq!(table.columns.len(), 12);
        assert_eq!(table.columns[0], "IncidntNum");
        let ids: Vec<_> = table.rows.iter().map(|row| row[0].clone()).collect();
        assert_eq!(ids, vec![json!(0), json!(1)]);
        assert_eq!(table.rows[0][4], json!("01/04/2016"));
        assert_eq!(table.rows[0][6], json!("SOUTHERN"));
    }

    #[test]
    fn records_view_random_sample_is_seeded() {
        let coordinates: Vec<(f64, f64)> = (0..40u32)
            .map(|n| (-122.4 + f64::from(n) * 0.001, 37.7))
            .collect();
        let dataset = fixtures::points(&coordinates);
        let view = View::Records {
            limit: 5,
            random: true,
            with_clusters: false,
        };

        let first = record_table(view, &dataset, None);
        let second = record_table(view, &dataset, None);
        assert_eq!(first.rows.len(), 5);
        assert_eq!(first.rows, second.rows);

        let ids: Vec<i64> = first.rows.iter().filter_map(|row| row[0].as_i64()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn records_view_adds_cluster_column() {
        let dataset = hotspot();
        let (labeled, metrics) = clustered(&dataset, 3);
        let options = ViewOptions {
            with_clusters: true,
            ..ViewOptions::default()
        };
        let view = View::from_name("records", &options, &Settings::default()).unwrap();
        assert!(view.needs_clustering());

        let table = record_table(view, &dataset, Some((&labeled, &metrics)));
        assert_eq!(table.columns.last().map(String::as_str), Some("Cluster"));
        let clusters: Vec<_> = table.rows.iter().map(|row| row[12].clone()).collect();
        assert_eq!(clusters, vec![json!(0), json!(0), json!(0), json!(-1)]);
    }

    #[test]
    fn records_view_rejects_zero_rows() {
        let options = ViewOptions {
            limit: Some(0),
            ..ViewOptions::default()
        };
        assert!(View::from_name("records", &options, &Settings::default()).is_err());
    }

    #[test]
    fn clustering_views_require_a_run() {
        let dataset = hotspot();
        let settings = Settings::default();
        let ctx = ViewContext {
            settings: &settings,
            dataset: &dataset,
            clustering: None,
            boundaries: None,
        };
        assert!(View::NoiseShare.needs_clustering());
        assert!(render(View::NoiseShare, &ctx).is_err());
        assert!(render(View::Choropleth, &ctx).is_err());
    }

    #[test]
    fn writes_map_as_geojson() {
        let dataset = hotspot();
        let settings = Settings::default();
        let ctx = ViewContext {
            settings: &settings,
            dataset: &dataset,
            clustering: None,
            boundaries: None,
        };
        let rendered = render(View::MarkerClusterMap { limit: 2 }, &ctx).unwrap();
        assert_eq!(rendered.file_extension(), "geojson");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.geojson");
        rendered.write_to(&path).unwrap();
        let written: GeoJson = std::fs::read_to_string(&path).unwrap().parse().unwrap();
        let GeoJson::FeatureCollection(collection) = written else {
            panic!("expected a feature collection");
        };
        assert_eq!(collection.features.len(), 2);
    }
}
