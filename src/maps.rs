use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Value};
use serde::Serialize;

use crate::models::{BoundarySet, ClusterSummary, Dataset, GroupCount};
use crate::settings::Settings;

const CHOROPLETH_PALETTE: &str = "YlOrRd";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub latitude: f64,
    pub longitude: f64,
    pub popup: String,
    pub tooltip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeatParams {
    pub radius: u32,
    pub blur: u32,
    pub max_intensity: f64,
}

impl Default for HeatParams {
    fn default() -> Self {
        HeatParams {
            radius: 15,
            blur: 15,
            max_intensity: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapLayer {
    Markers {
        icon: String,
        markers: Vec<Marker>,
    },
    CircleMarkers {
        radius: u32,
        color: String,
        fill_color: String,
        markers: Vec<Marker>,
    },
    MarkerCluster {
        markers: Vec<Marker>,
    },
    Heat {
        #[serde(flatten)]
        params: HeatParams,
        min_opacity: f64,
        points: Vec<[f64; 2]>,
    },
    Choropleth {
        name_property: String,
        fill_color: String,
        legend: String,
        regions: FeatureCollection,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct MapView {
    pub center: (f64, f64),
    pub zoom: u8,
    pub layers: Vec<MapLayer>,
}

impl MapView {
    pub fn new(settings: &Settings) -> Self {
        MapView {
            center: settings.map_center,
            zoom: settings.map_zoom,
            layers: Vec::new(),
        }
    }

    fn zoomed(mut self, zoom: u8) -> Self {
        self.zoom = zoom;
        self
    }

    /// Flattens every layer into a single GeoJSON document. Point layers
    /// become `Point` features; choropleth regions keep their geometry.
    pub fn to_geojson(&self) -> FeatureCollection {
        let mut features = Vec::new();

        for layer in &self.layers {
            match layer {
                MapLayer::Markers { markers, .. } => {
                    features.extend(markers.iter().map(|marker| marker_feature("marker", marker)));
                }
                MapLayer::CircleMarkers { markers, .. } => {
                    features.extend(
                        markers
                            .iter()
                            .map(|marker| marker_feature("circle_marker", marker)),
                    );
                }
                MapLayer::MarkerCluster { markers } => {
                    features.extend(
                        markers
                            .iter()
                            .map(|marker| marker_feature("marker_cluster", marker)),
                    );
                }
                MapLayer::Heat { points, .. } => {
                    features.extend(points.iter().map(|point| {
                        let mut properties = JsonObject::new();
                        properties.insert("layer".to_string(), JsonValue::from("heat"));
                        point_feature(point[0], point[1], properties)
                    }));
                }
                MapLayer::Choropleth { regions, .. } => {
                    features.extend(regions.features.iter().cloned());
                }
            }
        }

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}

fn point_feature(latitude: f64, longitude: f64, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Point(vec![longitude, latitude]))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn marker_feature(layer: &str, marker: &Marker) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("layer".to_string(), JsonValue::from(layer));
    properties.insert("popup".to_string(), JsonValue::from(marker.popup.clone()));
    if let Some(tooltip) = &marker.tooltip {
        properties.insert("tooltip".to_string(), JsonValue::from(tooltip.clone()));
    }
    point_feature(marker.latitude, marker.longitude, properties)
}

fn incident_markers(dataset: &Dataset, limit: usize) -> Vec<Marker> {
    dataset
        .records
        .iter()
        .take(limit)
        .map(|record| Marker {
            latitude: record.latitude,
            longitude: record.longitude,
            popup: record.category.clone(),
            tooltip: Some(record.category.clone()),
        })
        .collect()
}

fn center_markers(summaries: &[ClusterSummary]) -> Vec<Marker> {
    let mut ordered: Vec<&ClusterSummary> = summaries.iter().collect();
    ordered.sort_by_key(|summary| summary.cluster_id);
    ordered
        .into_iter()
        .map(|summary| Marker {
            latitude: summary.center_latitude,
            longitude: summary.center_longitude,
            popup: format!(
                "Cluster {}: {} crimes, mostly {}",
                summary.cluster_id, summary.member_count, summary.dominant_category
            ),
            tooltip: Some(format!("Cluster {}", summary.cluster_id)),
        })
        .collect()
}

pub fn cluster_center_map(settings: &Settings, summaries: &[ClusterSummary]) -> MapView {
    let mut view = MapView::new(settings).zoomed(13);
    view.layers.push(MapLayer::Markers {
        icon: "info-sign".to_string(),
        markers: center_markers(summaries),
    });
    view
}

pub fn circle_marker_map(settings: &Settings, dataset: &Dataset, limit: usize) -> MapView {
    let mut view = MapView::new(settings).zoomed(13);
    view.layers.push(MapLayer::CircleMarkers {
        radius: 3,
        color: "blue".to_string(),
        fill_color: "cyan".to_string(),
        markers: incident_markers(dataset, limit),
    });
    view
}

pub fn marker_cluster_map(settings: &Settings, dataset: &Dataset, limit: usize) -> MapView {
    let mut view = MapView::new(settings);
    view.layers.push(MapLayer::MarkerCluster {
        markers: incident_markers(dataset, limit),
    });
    view
}

pub fn combined_map(
    settings: &Settings,
    summaries: &[ClusterSummary],
    dataset: &Dataset,
    limit: usize,
) -> MapView {
    let mut view = MapView::new(settings).zoomed(13);
    view.layers.push(MapLayer::Markers {
        icon: "star".to_string(),
        markers: center_markers(summaries),
    });
    view.layers.push(MapLayer::CircleMarkers {
        radius: 2,
        color: "blue".to_string(),
        fill_color: "lightblue".to_string(),
        markers: incident_markers(dataset, limit),
    });
    view
}

pub fn heat_map(settings: &Settings, dataset: &Dataset, params: HeatParams) -> MapView {
    let mut view = MapView::new(settings);
    view.layers.push(MapLayer::Heat {
        params,
        min_opacity: 0.3,
        points: dataset
            .records
            .iter()
            .map(|record| [record.latitude, record.longitude])
            .collect(),
    });
    view
}

/// Joins district counts onto the boundary polygons by region name.
/// Regions with no matching district get a count of zero.
pub fn choropleth_map(
    settings: &Settings,
    boundaries: &BoundarySet,
    district_counts: &[GroupCount],
) -> MapView {
    let regions = boundaries
        .collection
        .features
        .iter()
        .map(|feature| {
            let mut feature = feature.clone();
            let count = feature
                .property(&boundaries.name_property)
                .and_then(JsonValue::as_str)
                .and_then(|name| {
                    district_counts
                        .iter()
                        .find(|group| group.key.eq_ignore_ascii_case(name))
                })
                .map_or(0, |group| group.count);
            feature.set_property("count", count);
            feature.set_property("layer", "choropleth");
            feature
        })
        .collect();

    let mut view = MapView::new(settings);
    view.layers.push(MapLayer::Choropleth {
        name_property: boundaries.name_property.clone(),
        fill_color: CHOROPLETH_PALETTE.to_string(),
        legend: "Crime Rate by District".to_string(),
        regions: FeatureCollection {
            bbox: None,
            features: regions,
            foreign_members: None,
        },
    });
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;
    use crate::models::Extent;

    fn summary(cluster_id: u32, member_count: usize) -> ClusterSummary {
        ClusterSummary {
            cluster_id,
            member_count,
            center_latitude: 37.78,
            center_longitude: -122.41,
            dominant_category: "LARCENY/THEFT".to_string(),
            extent: Extent {
                min_latitude: 37.77,
                max_latitude: 37.79,
                min_longitude: -122.42,
                max_longitude: -122.40,
            },
        }
    }

    fn boundaries() -> BoundarySet {
        let collection: FeatureCollection = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"DISTRICT":"SOUTHERN"},
             "geometry":{"type":"Polygon","coordinates":[[[-122.41,37.77],[-122.40,37.77],[-122.40,37.78],[-122.41,37.77]]]}},
            {"type":"Feature","properties":{"DISTRICT":"PARK"},
             "geometry":{"type":"Polygon","coordinates":[[[-122.45,37.76],[-122.44,37.76],[-122.44,37.77],[-122.45,37.76]]]}}
        ]}"#
        .parse()
        .unwrap();
        BoundarySet {
            source: "fixture".to_string(),
            name_property: "DISTRICT".to_string(),
            collection,
        }
    }

    #[test]
    fn center_markers_follow_cluster_ids() {
        let view = cluster_center_map(&Settings::default(), &[summary(1, 10), summary(0, 4)]);
        assert_eq!(view.zoom, 13);
        let MapLayer::Markers { markers, .. } = &view.layers[0] else {
            panic!("expected markers layer");
        };
        assert_eq!(markers[0].tooltip.as_deref(), Some("Cluster 0"));
        assert!(markers[1].popup.starts_with("Cluster 1: 10 crimes"));
    }

    #[test]
    fn marker_layers_respect_limit() {
        let dataset = fixtures::points(&[(-122.4, 37.7), (-122.41, 37.71), (-122.42, 37.72)]);
        let view = circle_marker_map(&Settings::default(), &dataset, 2);
        assert_eq!(view.to_geojson().features.len(), 2);
    }

    #[test]
    fn combined_map_has_centers_and_points() {
        let dataset = fixtures::points(&[(-122.4, 37.7), (-122.41, 37.71)]);
        let view = combined_map(&Settings::default(), &[summary(0, 2)], &dataset, 500);
        assert_eq!(view.layers.len(), 2);
        assert_eq!(view.to_geojson().features.len(), 3);
    }

    #[test]
    fn heat_points_are_lat_lon_pairs() {
        let dataset = fixtures::points(&[(-122.4, 37.7)]);
        let view = heat_map(&Settings::default(), &dataset, HeatParams::default());
        let MapLayer::Heat { points, params, .. } = &view.layers[0] else {
            panic!("expected heat layer");
        };
        assert_eq!(points[0], [37.7, -122.4]);
        assert_eq!(params.radius, 15);

        let geometry = view.to_geojson().features[0].geometry.clone().unwrap();
        assert_eq!(geometry.value, Value::Point(vec![-122.4, 37.7]));
    }

    #[test]
    fn choropleth_joins_counts_by_region_name() {
        let counts = vec![GroupCount {
            key: "SOUTHERN".to_string(),
            count: 42,
            share: 1.0,
        }];
        let view = choropleth_map(&Settings::default(), &boundaries(), &counts);
        let collection = view.to_geojson();

        assert_eq!(collection.features.len(), 2);
        assert_eq!(collection.features[0].property("count"), Some(&JsonValue::from(42)));
        assert_eq!(collection.features[1].property("count"), Some(&JsonValue::from(0)));
    }
}
