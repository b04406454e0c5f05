use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};

use crate::error::{DashboardError, Result};
use crate::models::{ClusterLabel, ClusterParams, Dataset, LabeledDataset, QualityMetrics};

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// How coordinates are rescaled before neighbourhoods are measured.
///
/// Epsilon is interpreted in the rescaled space, so changing the scaling
/// changes what a given epsilon means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scaling {
    /// Each axis mapped onto [0, 1]. A constant axis maps to 0.
    #[default]
    MinMax,
    /// Each axis shifted to mean 0 and divided by its population standard deviation.
    Standard,
    /// Raw longitude/latitude degrees.
    #[serde(alias = "none")]
    Raw,
}

pub fn validate_params(params: &ClusterParams) -> Result<()> {
    if !params.epsilon.is_finite() || params.epsilon <= 0.0 {
        return Err(DashboardError::validation(format!(
            "epsilon must be a positive number, got {}",
            params.epsilon
        )));
    }
    if params.min_samples < 1 {
        return Err(DashboardError::validation("min_samples must be at least 1"));
    }
    Ok(())
}

/// Labels every record of `dataset` with a DBSCAN cluster id or noise.
#[tracing::instrument(skip(dataset), fields(points = dataset.len()))]
pub fn cluster(
    dataset: &Arc<Dataset>,
    params: ClusterParams,
    scaling: Scaling,
    silhouette_max_points: usize,
) -> Result<(LabeledDataset, QualityMetrics)> {
    validate_params(&params)?;
    let started = Instant::now();

    let raw: Vec<[f64; 2]> = dataset
        .records
        .iter()
        .map(|record| [record.longitude, record.latitude])
        .collect();
    let points = scale(&raw, scaling);
    let labels = dbscan(&points, params.epsilon, params.min_samples);
    let metrics = quality_metrics(&points, &labels, silhouette_max_points);

    tracing::info!(
        epsilon = params.epsilon,
        min_samples = params.min_samples,
        clusters = metrics.cluster_count,
        noise = metrics.noise_count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "clustering finished"
    );

    let labeled = LabeledDataset {
        dataset: Arc::clone(dataset),
        labels,
        params,
    };
    Ok((labeled, metrics))
}

pub fn scale(points: &[[f64; 2]], scaling: Scaling) -> Vec<[f64; 2]> {
    if points.is_empty() {
        return Vec::new();
    }

    let mut scaled = points.to_vec();
    for axis in 0..2 {
        match scaling {
            Scaling::Raw => {}
            Scaling::MinMax => {
                let (min, max) = points
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), p| {
                        (min.min(p[axis]), max.max(p[axis]))
                    });
                let range = max - min;
                for point in scaled.iter_mut() {
                    point[axis] = if range > 0.0 { (point[axis] - min) / range } else { 0.0 };
                }
            }
            Scaling::Standard => {
                let n = points.len() as f64;
                let mean = points.iter().map(|p| p[axis]).sum::<f64>() / n;
                let variance = points.iter().map(|p| (p[axis] - mean).powi(2)).sum::<f64>() / n;
                let std_dev = variance.sqrt();
                for point in scaled.iter_mut() {
                    point[axis] = if std_dev > 0.0 { (point[axis] - mean) / std_dev } else { 0.0 };
                }
            }
        }
    }
    scaled
}

/// Density-based clustering over already scaled points.
///
/// Cluster ids are assigned in the order their first core point appears.
/// A border point reachable from two clusters stays with the one that
/// reached it first.
pub fn dbscan(points: &[[f64; 2]], epsilon: f64, min_samples: usize) -> Vec<ClusterLabel> {
    let n = points.len();
    let mut labels = vec![ClusterLabel::Noise; n];
    if n == 0 || min_samples > n {
        return labels;
    }

    let tree: RTree<IndexedPoint> = RTree::bulk_load(
        points
            .iter()
            .enumerate()
            .map(|(index, point)| GeomWithData::new(*point, index))
            .collect(),
    );
    // rstar takes the squared radius; the comparison is inclusive.
    let radius_2 = epsilon * epsilon;

    let neighbours = |index: usize| -> Vec<usize> {
        let mut found: Vec<usize> = tree
            .locate_within_distance(points[index], radius_2)
            .map(|neighbour| neighbour.data)
            .collect();
        found.sort_unstable();
        found
    };

    let core: Vec<bool> = points
        .iter()
        .map(|point| {
            tree.locate_within_distance(*point, radius_2)
                .take(min_samples)
                .count()
                >= min_samples
        })
        .collect();

    let mut assigned = vec![false; n];
    let mut queue = VecDeque::new();
    let mut next_id: u32 = 0;

    for seed in 0..n {
        if assigned[seed] || !core[seed] {
            continue;
        }

        let label = ClusterLabel::Cluster(next_id);
        next_id += 1;
        assigned[seed] = true;
        labels[seed] = label;
        queue.push_back(seed);

        while let Some(current) = queue.pop_front() {
            for neighbour in neighbours(current) {
                if assigned[neighbour] {
                    continue;
                }
                assigned[neighbour] = true;
                labels[neighbour] = label;
                if core[neighbour] {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    labels
}

pub fn quality_metrics(
    points: &[[f64; 2]],
    labels: &[ClusterLabel],
    silhouette_max_points: usize,
) -> QualityMetrics {
    let total_points = labels.len();
    let noise_count = labels.iter().filter(|label| label.is_noise()).count();
    let clustered_count = total_points - noise_count;
    let cluster_count = labels
        .iter()
        .filter_map(|label| label.cluster_id())
        .max()
        .map_or(0, |max| max as usize + 1);

    let (noise_ratio, clustered_ratio) = if total_points == 0 {
        (0.0, 0.0)
    } else {
        (
            noise_count as f64 / total_points as f64,
            clustered_count as f64 / total_points as f64,
        )
    };

    QualityMetrics {
        total_points,
        cluster_count,
        noise_count,
        clustered_count,
        noise_ratio,
        clustered_ratio,
        silhouette: silhouette(points, labels, silhouette_max_points),
    }
}

/// Mean silhouette over clustered points, or `None` when fewer than two
/// clusters exist. Noise is excluded. Large inputs are strided down to
/// `max_points` before the quadratic pass; a `max_points` of 0 disables the
/// score.
pub fn silhouette(
    points: &[[f64; 2]],
    labels: &[ClusterLabel],
    max_points: usize,
) -> Option<f64> {
    if max_points == 0 {
        return None;
    }

    let clustered: Vec<(usize, u32)> = labels
        .iter()
        .enumerate()
        .filter_map(|(index, label)| label.cluster_id().map(|id| (index, id)))
        .collect();

    let stride = clustered.len().div_ceil(max_points).max(1);
    let sample: Vec<(usize, u32)> = clustered.into_iter().step_by(stride).collect();

    let cluster_count = sample.iter().map(|(_, id)| *id).max()? as usize + 1;
    let mut sizes = vec![0usize; cluster_count];
    for (_, id) in &sample {
        sizes[*id as usize] += 1;
    }
    let present = sizes.iter().filter(|size| **size > 0).count();
    if present < 2 || sample.len() < present + 1 {
        return None;
    }

    let mut total = 0.0;
    let mut sums = vec![0.0f64; cluster_count];
    for (index, own) in &sample {
        if sizes[*own as usize] == 1 {
            continue;
        }
        sums.iter_mut().for_each(|sum| *sum = 0.0);
        for (other, id) in &sample {
            if other == index {
                continue;
            }
            sums[*id as usize] += distance(points[*index], points[*other]);
        }

        let a = sums[*own as usize] / (sizes[*own as usize] - 1) as f64;
        let b = sums
            .iter()
            .zip(&sizes)
            .enumerate()
            .filter(|(id, (_, size))| *id != *own as usize && **size > 0)
            .map(|(_, (sum, size))| sum / *size as f64)
            .fold(f64::INFINITY, f64::min);

        let spread = a.max(b);
        if spread > 0.0 {
            total += (b - a) / spread;
        }
    }

    Some(total / sample.len() as f64)
}

fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}
