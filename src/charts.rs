use std::collections::BTreeMap;
use std::ops::Range;

use plotters::prelude::*;
use serde::Serialize;

use crate::error::{DashboardError, Result};
use crate::models::{
    ClusterLabel, ClusterSummary, Dataset, GroupCount, LabeledDataset, QualityMetrics,
};

const NOISE_COLOR: &str = "#7f7f7f";
const CHART_SIZE: (u32, u32) = (1000, 800);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    HorizontalBar,
    Scatter,
    Pie,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesData {
    Categories(Vec<(String, f64)>),
    Points(Vec<(f64, f64)>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub color: String,
    pub data: SeriesData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub x: f64,
    pub y: f64,
    pub text: String,
}

/// Backend-independent description of a chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chart {
    pub title: String,
    pub kind: ChartKind,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<Series>,
    pub annotations: Vec<Annotation>,
}

pub fn bar_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    groups: &[GroupCount],
    color: &str,
    horizontal: bool,
) -> Chart {
    Chart {
        title: title.to_string(),
        kind: if horizontal {
            ChartKind::HorizontalBar
        } else {
            ChartKind::Bar
        },
        x_label: x_label.to_string(),
        y_label: y_label.to_string(),
        series: vec![Series {
            name: y_label.to_string(),
            color: color.to_string(),
            data: SeriesData::Categories(
                groups
                    .iter()
                    .map(|group| (group.key.clone(), group.count as f64))
                    .collect(),
            ),
        }],
        annotations: Vec::new(),
    }
}

pub fn location_scatter(dataset: &Dataset) -> Chart {
    Chart {
        title: "Location of Crimes Reported".to_string(),
        kind: ChartKind::Scatter,
        x_label: "Longitude".to_string(),
        y_label: "Latitude".to_string(),
        series: vec![Series {
            name: "incidents".to_string(),
            color: "#00008b".to_string(),
            data: SeriesData::Points(
                dataset
                    .records
                    .iter()
                    .map(|record| (record.longitude, record.latitude))
                    .collect(),
            ),
        }],
        annotations: Vec::new(),
    }
}

fn label_series(labeled: &LabeledDataset, palette: &[String], include_noise: bool) -> Vec<Series> {
    let mut by_label: BTreeMap<ClusterLabel, Vec<(f64, f64)>> = BTreeMap::new();
    for (record, label) in labeled.iter() {
        if label.is_noise() && !include_noise {
            continue;
        }
        by_label
            .entry(label)
            .or_default()
            .push((record.longitude, record.latitude));
    }

    by_label
        .into_iter()
        .map(|(label, points)| Series {
            name: match label {
                ClusterLabel::Noise => "noise (-1)".to_string(),
                ClusterLabel::Cluster(_) => format!("cluster {label}"),
            },
            color: label_color(label, palette),
            data: SeriesData::Points(points),
        })
        .collect()
}

/// One series per label, noise included as its own grey series.
pub fn clusters_with_noise(labeled: &LabeledDataset, palette: &[String]) -> Chart {
    Chart {
        title: "Crime Spots - DBSCAN with Noise".to_string(),
        kind: ChartKind::Scatter,
        x_label: "Longitude".to_string(),
        y_label: "Latitude".to_string(),
        series: label_series(labeled, palette, true),
        annotations: Vec::new(),
    }
}

/// Clustered points only, with each cluster id written at its centroid.
pub fn clusters_without_noise(
    labeled: &LabeledDataset,
    summaries: &[ClusterSummary],
    palette: &[String],
) -> Chart {
    Chart {
        title: "Crime Spots - DBSCAN without Noise".to_string(),
        kind: ChartKind::Scatter,
        x_label: "Longitude".to_string(),
        y_label: "Latitude".to_string(),
        series: label_series(labeled, palette, false),
        annotations: summaries
            .iter()
            .map(|summary| Annotation {
                x: summary.center_longitude,
                y: summary.center_latitude,
                text: summary.cluster_id.to_string(),
            })
            .collect(),
    }
}

/// Points per cluster, ordered by cluster id.
pub fn cluster_sizes(summaries: &[ClusterSummary]) -> Chart {
    let mut ordered: Vec<&ClusterSummary> = summaries.iter().collect();
    ordered.sort_by_key(|summary| summary.cluster_id);
    let groups: Vec<GroupCount> = ordered
        .iter()
        .map(|summary| GroupCount {
            key: summary.cluster_id.to_string(),
            count: summary.member_count,
            share: 0.0,
        })
        .collect();
    bar_chart(
        "Points per Cluster",
        "Cluster ID",
        "Number of Points",
        &groups,
        "#4682b4",
        false,
    )
}

pub fn noise_share(metrics: &QualityMetrics) -> Chart {
    Chart {
        title: "Clustered vs Noise Points".to_string(),
        kind: ChartKind::Pie,
        x_label: String::new(),
        y_label: String::new(),
        series: vec![
            Series {
                name: "Clustered Points".to_string(),
                color: "#90ee90".to_string(),
                data: SeriesData::Categories(vec![(
                    "Clustered Points".to_string(),
                    metrics.clustered_count as f64,
                )]),
            },
            Series {
                name: "Noise Points".to_string(),
                color: "#f08080".to_string(),
                data: SeriesData::Categories(vec![(
                    "Noise Points".to_string(),
                    metrics.noise_count as f64,
                )]),
            },
        ],
        annotations: Vec::new(),
    }
}

fn label_color(label: ClusterLabel, palette: &[String]) -> String {
    match label {
        ClusterLabel::Noise => NOISE_COLOR.to_string(),
        ClusterLabel::Cluster(id) if !palette.is_empty() => {
            palette[id as usize % palette.len()].clone()
        }
        ClusterLabel::Cluster(_) => "#1f77b4".to_string(),
    }
}

fn parse_color(hex: &str) -> RGBColor {
    let hex = hex.trim_start_matches('#');
    let channel = |range: Range<usize>| {
        hex.get(range)
            .and_then(|digits| u8::from_str_radix(digits, 16).ok())
    };
    match (channel(0..2), channel(2..4), channel(4..6)) {
        (Some(r), Some(g), Some(b)) if hex.len() == 6 => RGBColor(r, g, b),
        _ => RGBColor(31, 119, 180),
    }
}

fn render_err<E: std::fmt::Display>(err: E) -> DashboardError {
    DashboardError::Render(err.to_string())
}

/// Draws `chart` as an SVG document.
pub fn render_svg(chart: &Chart) -> Result<String> {
    let mut buffer = String::new();
    {
        let root = SVGBackend::with_string(&mut buffer, CHART_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(render_err)?;
        match chart.kind {
            ChartKind::Scatter => draw_scatter(&root, chart)?,
            ChartKind::Bar => draw_bars(&root, chart, false)?,
            ChartKind::HorizontalBar => draw_bars(&root, chart, true)?,
            ChartKind::Pie => draw_pie(&root, chart)?,
        }
        root.present().map_err(render_err)?;
    }
    Ok(buffer)
}

fn padded(min: f64, max: f64) -> Range<f64> {
    if !min.is_finite() || !max.is_finite() {
        return 0.0..1.0;
    }
    let pad = ((max - min) * 0.05).max(1e-6);
    (min - pad)..(max + pad)
}

fn draw_scatter(
    root: &DrawingArea<SVGBackend, plotters::coord::Shift>,
    chart: &Chart,
) -> Result<()> {
    let points: Vec<(f64, f64)> = chart
        .series
        .iter()
        .filter_map(|series| match &series.data {
            SeriesData::Points(points) => Some(points.iter().copied()),
            SeriesData::Categories(_) => None,
        })
        .flatten()
        .collect();
    let (min_x, max_x, min_y, max_y) = points.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(min_x, max_x, min_y, max_y), (x, y)| {
            (min_x.min(*x), max_x.max(*x), min_y.min(*y), max_y.max(*y))
        },
    );

    let mut ctx = ChartBuilder::on(root)
        .caption(&chart.title, ("sans-serif", 24))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(padded(min_x, max_x), padded(min_y, max_y))
        .map_err(render_err)?;
    ctx.configure_mesh()
        .x_desc(chart.x_label.as_str())
        .y_desc(chart.y_label.as_str())
        .draw()
        .map_err(render_err)?;

    for series in &chart.series {
        let SeriesData::Points(points) = &series.data else {
            continue;
        };
        let color = parse_color(&series.color);
        ctx.draw_series(
            points
                .iter()
                .map(|(x, y)| Circle::new((*x, *y), 2, color.mix(0.4).filled())),
        )
        .map_err(render_err)?
        .label(series.name.as_str())
        .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
    }

    ctx.draw_series(chart.annotations.iter().map(|annotation| {
        Text::new(
            annotation.text.clone(),
            (annotation.x, annotation.y),
            ("sans-serif", 16).into_font().color(&BLACK),
        )
    }))
    .map_err(render_err)?;

    if chart.series.len() > 1 && chart.annotations.is_empty() {
        ctx.configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(render_err)?;
    }
    Ok(())
}

fn categories(chart: &Chart) -> (Vec<String>, Vec<f64>, RGBColor) {
    let mut labels = Vec::new();
    let mut values = Vec::new();
    let mut color = RGBColor(70, 130, 180);
    for series in &chart.series {
        if let SeriesData::Categories(entries) = &series.data {
            color = parse_color(&series.color);
            for (label, value) in entries {
                labels.push(label.clone());
                values.push(*value);
            }
        }
    }
    (labels, values, color)
}

fn draw_bars(
    root: &DrawingArea<SVGBackend, plotters::coord::Shift>,
    chart: &Chart,
    horizontal: bool,
) -> Result<()> {
    let (labels, values, color) = categories(chart);
    let count = labels.len().max(1) as u32;
    let top = values.iter().copied().fold(0.0f64, f64::max).max(1.0) * 1.05;
    let label_of = |value: &SegmentValue<u32>| match value {
        SegmentValue::CenterOf(index) => labels.get(*index as usize).cloned().unwrap_or_default(),
        _ => String::new(),
    };

    if horizontal {
        let mut ctx = ChartBuilder::on(root)
            .caption(&chart.title, ("sans-serif", 24))
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(180)
            .build_cartesian_2d(0f64..top, (0u32..count).into_segmented())
            .map_err(render_err)?;
        ctx.configure_mesh()
            .disable_y_mesh()
            .y_labels(count as usize)
            .y_label_formatter(&label_of)
            .x_desc(chart.x_label.as_str())
            .y_desc(chart.y_label.as_str())
            .draw()
            .map_err(render_err)?;
        ctx.draw_series(values.iter().enumerate().map(|(index, value)| {
            let index = index as u32;
            Rectangle::new(
                [(0.0, SegmentValue::Exact(index)), (*value, SegmentValue::Exact(index + 1))],
                color.filled(),
            )
        }))
        .map_err(render_err)?;
    } else {
        let mut ctx = ChartBuilder::on(root)
            .caption(&chart.title, ("sans-serif", 24))
            .margin(15)
            .x_label_area_size(80)
            .y_label_area_size(60)
            .build_cartesian_2d((0u32..count).into_segmented(), 0f64..top)
            .map_err(render_err)?;
        ctx.configure_mesh()
            .disable_x_mesh()
            .x_labels(count as usize)
            .x_label_formatter(&label_of)
            .x_desc(chart.x_label.as_str())
            .y_desc(chart.y_label.as_str())
            .draw()
            .map_err(render_err)?;
        ctx.draw_series(values.iter().enumerate().map(|(index, value)| {
            let index = index as u32;
            Rectangle::new(
                [(SegmentValue::Exact(index), 0.0), (SegmentValue::Exact(index + 1), *value)],
                color.filled(),
            )
        }))
        .map_err(render_err)?;
    }
    Ok(())
}

fn draw_pie(root: &DrawingArea<SVGBackend, plotters::coord::Shift>, chart: &Chart) -> Result<()> {
    let area = root
        .titled(&chart.title, ("sans-serif", 24))
        .map_err(render_err)?;
    let (width, height) = area.dim_in_pixel();
    let center = (width as i32 / 2, height as i32 / 2);
    let radius = f64::from(width.min(height)) * 0.35;

    let slices: Vec<(String, f64, RGBColor)> = chart
        .series
        .iter()
        .filter_map(|series| match &series.data {
            SeriesData::Categories(entries) => Some(
                entries
                    .iter()
                    .map(|(label, value)| (label.clone(), *value, parse_color(&series.color)))
                    .collect::<Vec<_>>(),
            ),
            SeriesData::Points(_) => None,
        })
        .flatten()
        .collect();
    let total: f64 = slices.iter().map(|(_, value, _)| value).sum();
    if total <= 0.0 {
        return Ok(());
    }

    let at = |angle: f64, scale: f64| -> (i32, i32) {
        (
            center.0 + (radius * scale * angle.cos()).round() as i32,
            center.1 - (radius * scale * angle.sin()).round() as i32,
        )
    };

    // Start at twelve o'clock and go counter-clockwise.
    let mut start = std::f64::consts::FRAC_PI_2;
    for (label, value, color) in &slices {
        let sweep = value / total * std::f64::consts::TAU;
        let steps = ((sweep / std::f64::consts::TAU) * 120.0).ceil().max(1.0) as usize;
        let mut outline = vec![center];
        outline.extend((0..=steps).map(|step| at(start + sweep * step as f64 / steps as f64, 1.0)));
        area.draw(&Polygon::new(outline, color.filled()))
            .map_err(render_err)?;

        let middle = start + sweep / 2.0;
        area.draw(&Text::new(
            format!("{label} {:.1}%", value / total * 100.0),
            at(middle, 1.15),
            ("sans-serif", 16).into_font().color(&BLACK),
        ))
        .map_err(render_err)?;
        start += sweep;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;
    use crate::models::ClusterParams;

    fn labeled() -> LabeledDataset {
        LabeledDataset {
            dataset: fixtures::points(&[(-122.41, 37.77), (-122.40, 37.78), (-122.30, 37.70)]),
            labels: vec![
                ClusterLabel::Cluster(0),
                ClusterLabel::Cluster(0),
                ClusterLabel::Noise,
            ],
            params: ClusterParams {
                epsilon: 0.02,
                min_samples: 2,
            },
        }
    }

    fn palette() -> Vec<String> {
        vec!["#1f77b4".to_string(), "#ff7f0e".to_string()]
    }

    #[test]
    fn noise_gets_its_own_series() {
        let chart = clusters_with_noise(&labeled(), &palette());
        assert_eq!(chart.series.len(), 2);
        assert_eq!(chart.series[0].name, "noise (-1)");
        assert_eq!(chart.series[0].color, NOISE_COLOR);
        assert_eq!(chart.series[1].color, "#1f77b4");
    }

    #[test]
    fn without_noise_drops_noise_and_annotates_centroids() {
        let labeled = labeled();
        let summaries = crate::processor::summarize_clusters(&labeled);
        let chart = clusters_without_noise(&labeled, &summaries, &palette());
        assert_eq!(chart.series.len(), 1);
        assert_eq!(chart.annotations.len(), 1);
        assert_eq!(chart.annotations[0].text, "0");
    }

    #[test]
    fn input_is_left_untouched() {
        let labeled = labeled();
        let before = labeled.labels.clone();
        let _ = clusters_with_noise(&labeled, &palette());
        assert_eq!(labeled.labels, before);
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!(parse_color("#ff7f0e"), RGBColor(255, 127, 14));
        assert_eq!(parse_color("bogus"), RGBColor(31, 119, 180));
    }

    #[test]
    fn renders_each_kind_to_svg() {
        let labeled = labeled();
        let summaries = crate::processor::summarize_clusters(&labeled);
        let metrics = crate::clustering::quality_metrics(
            &[[0.0, 0.0], [0.1, 0.1], [1.0, 1.0]],
            &labeled.labels,
            100,
        );
        let groups = vec![
            GroupCount { key: "THEFT".into(), count: 3, share: 0.75 },
            GroupCount { key: "ASSAULT".into(), count: 1, share: 0.25 },
        ];

        for chart in [
            clusters_with_noise(&labeled, &palette()),
            cluster_sizes(&summaries),
            bar_chart("Top", "Count", "Category", &groups, "#4682b4", true),
            noise_share(&metrics),
        ] {
            let svg = render_svg(&chart).unwrap();
            assert!(svg.contains("<svg"));
            assert!(svg.contains(&chart.title));
        }
    }
}
