use std::fmt::Write;

use crate::models::{Dataset, LabeledDataset, QualityMetrics};
use crate::processor::{self, GroupKey};

pub fn build_report(
    dataset: &Dataset,
    labeled: &LabeledDataset,
    metrics: &QualityMetrics,
) -> String {
    let profile = processor::profile(dataset);
    let categories = processor::top_n(processor::aggregate(dataset, GroupKey::Category), 10);
    let summaries = processor::summarize_clusters(labeled);

    let mut output = String::new();

    let _ = writeln!(output, "# DBSCAN Crime Spots Report");
    let _ = writeln!(
        output,
        "Generated from {} ({} of {} incidents analyzed)",
        dataset.source, profile.record_count, profile.total_rows
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Dataset Insights");

    if dataset.is_empty() {
        let _ = writeln!(output, "No incidents loaded.");
    } else {
        let _ = writeln!(output, "- Crime categories: {}", profile.category_count);
        let _ = writeln!(output, "- Police districts: {}", profile.district_count);
        if profile.missing_district > 0 {
            let _ = writeln!(
                output,
                "- Incidents without a district: {}",
                profile.missing_district
            );
        }
        if let Some(top) = &profile.top_category {
            let _ = writeln!(output, "- Most common crime: {} ({})", top.key, top.count);
        }
        if let Some(top) = &profile.top_district {
            let _ = writeln!(output, "- Busiest district: {} ({})", top.key, top.count);
        }
        if let Some(peak) = &profile.peak_day {
            let _ = writeln!(output, "- Peak day: {} ({})", peak.key, peak.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Crime Mix");

    if categories.is_empty() {
        let _ = writeln!(output, "No incidents loaded.");
    } else {
        for group in categories.iter() {
            let _ = writeln!(
                output,
                "- {}: {} incidents ({:.1}%)",
                group.key,
                group.count,
                group.share * 100.0
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## DBSCAN Results");
    let _ = writeln!(
        output,
        "- Parameters: eps {} / min_samples {}",
        labeled.params.epsilon, labeled.params.min_samples
    );
    let _ = writeln!(output, "- Points clustered: {}", metrics.total_points);
    let _ = writeln!(output, "- Clusters found: {}", metrics.cluster_count);
    let _ = writeln!(
        output,
        "- Noise points: {} ({:.1}%)",
        metrics.noise_count,
        metrics.noise_ratio * 100.0
    );
    match metrics.silhouette {
        Some(score) => {
            let _ = writeln!(output, "- Silhouette score: {score:.3}");
        }
        None => {
            let _ = writeln!(output, "- Silhouette score: n/a (fewer than two clusters)");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Crime Hotspots");

    if summaries.is_empty() {
        let _ = writeln!(output, "No clusters found with these parameters.");
    } else {
        for summary in summaries.iter().take(10) {
            let _ = writeln!(
                output,
                "- Cluster {}: {} incidents around ({:.4}, {:.4}), mostly {}",
                summary.cluster_id,
                summary.member_count,
                summary.center_latitude,
                summary.center_longitude,
                summary.dominant_category
            );
        }
    }

    let mut recent: Vec<_> = dataset.records.iter().collect();
    recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Incidents");

    if recent.is_empty() {
        let _ = writeln!(output, "No incidents loaded.");
    } else {
        for record in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}) on {}: {}",
                record.category,
                record.district.as_deref().unwrap_or("no district"),
                record.timestamp,
                record.description
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::{self, Scaling};
    use crate::models::{fixtures, ClusterParams};
    use std::sync::Arc;

    fn run(dataset: &Arc<Dataset>, min_samples: usize) -> (LabeledDataset, QualityMetrics) {
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

    #[test]
    fn report_includes_hotspots_and_metrics() {
        let dataset = fixtures::points(&[
            (-122.410, 37.780),
            (-122.411, 37.781),
            (-122.409, 37.779),
            (-122.300, 37.700),
        ]);
        let (labeled, metrics) = run(&dataset, 3);
        let report = build_report(&dataset, &labeled, &metrics);

        assert!(report.starts_with("# DBSCAN Crime Spots Report"));
        assert!(report.contains("- Clusters found: 1"));
        assert!(report.contains("- Noise points: 1 (25.0%)"));
        assert!(report.contains("- Cluster 0: 3 incidents"));
        assert!(report.contains("- THEFT: 4 incidents (100.0%)"));
    }

    #[test]
    fn report_marks_empty_sections() {
        let dataset = fixtures::points(&[]);
        let (labeled, metrics) = run(&dataset, 3);
        let report = build_report(&dataset, &labeled, &metrics);

        assert!(report.contains("No clusters found with these parameters."));
        assert!(report.contains("Silhouette score: n/a"));
        assert!(report.contains("## Recent Incidents\nNo incidents loaded."));
    }

    #[test]
    fn recent_incidents_are_newest_first() {
        let mut older = fixtures::record("ASSAULT", Some("MISSION"), -122.41, 37.76);
        older.timestamp = fixtures::timestamp(2016, 1, 1, 9);
        let mut newer = fixtures::record("ROBBERY", None, -122.42, 37.77);
        newer.timestamp = fixtures::timestamp(2016, 2, 1, 9);
        let dataset = Arc::new(fixtures::dataset(vec![older, newer]));
        let (labeled, metrics) = run(&dataset, 5);

        let report = build_report(&dataset, &labeled, &metrics);
        let robbery = report.find("- ROBBERY (no district)").unwrap();
        let assault = report.find("- ASSAULT (MISSION)").unwrap();
        assert!(robbery < assault);
    }
}
