use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::clustering::Scaling;

pub const DATA_URL_ENV: &str = "CRIME_SPOTS_DATA_URL";
pub const BOUNDARY_URL_ENV: &str = "CRIME_SPOTS_BOUNDARY_URL";

/// Static configuration for a dashboard run.
///
/// `eps` is expressed in the units produced by `scaling`. With the default
/// min-max scaling both coordinate axes span [0, 1], so `eps = 0.02` is two
/// percent of the sampled extent rather than a distance in degrees.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_url: String,
    pub boundary_url: String,
    pub boundary_name_property: String,
    pub map_center: (f64, f64),
    pub map_zoom: u8,
    pub eps: f64,
    pub min_samples: usize,
    pub sample_size: usize,
    pub sample_seed: u64,
    pub scaling: Scaling,
    pub fetch_timeout_secs: u64,
    pub silhouette_max_points: usize,
    pub marker_limit: usize,
    pub marker_cluster_limit: usize,
    pub combined_point_limit: usize,
    pub heat_sample_size: usize,
    pub cluster_palette: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_url: "https://ibm.box.com/shared/static/nmcltjmocdi8sd5tk93uembzdec8zyaq.csv"
                .to_string(),
            boundary_url: "https://cocl.us/sanfran_geojson".to_string(),
            boundary_name_property: "DISTRICT".to_string(),
            map_center: (37.77, -122.42),
            map_zoom: 12,
            eps: 0.020,
            min_samples: 500,
            sample_size: 50_000,
            sample_seed: 42,
            scaling: Scaling::MinMax,
            fetch_timeout_secs: 60,
            silhouette_max_points: 5_000,
            marker_limit: 1_000,
            marker_cluster_limit: 2_000,
            combined_point_limit: 500,
            heat_sample_size: 10_000,
            // tab20
            cluster_palette: [
                "#1f77b4", "#aec7e8", "#ff7f0e", "#ffbb78", "#2ca02c", "#98df8a", "#d62728",
                "#ff9896", "#9467bd", "#c5b0d5", "#8c564b", "#c49c94", "#e377c2", "#f7b6d2",
                "#7f7f7f", "#c7c7c7", "#bcbd22", "#dbdb8d", "#17becf", "#9edae5",
            ]
            .iter()
            .map(|color| color.to_string())
            .collect(),
        }
    }
}

impl Settings {
    /// Reads settings from an optional TOML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::from_toml(&raw)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => Settings::default(),
        };

        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(DATA_URL_ENV) {
            self.data_url = url;
        }
        if let Some(url) = lookup(BOUNDARY_URL_ENV) {
            self.boundary_url = url;
        }
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let settings: Settings = toml::from_str(raw)?;
        Ok(settings)
    }
}
