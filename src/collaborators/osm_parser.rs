use crate::error::ProviderError;
use crate::types::LatLon;
use geo::{Coord, LineString};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MPH_TO_KMH: f64 = 1.609_344;
const KNOTS_TO_KMH: f64 = 1.852;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoadClass {
    Motorway,
    Primary,
    Secondary,
    Residential,
    Service,
    Unknown,
}

impl RoadClass {
    /// Parse from OSM highway tag
    pub fn from_highway_tag(tag: &str) -> Self {
        match tag {
            "motorway" | "motorway_link" | "trunk" | "trunk_link" => RoadClass::Motorway,
            "primary" | "primary_link" => RoadClass::Primary,
            "secondary" | "secondary_link" | "tertiary" | "tertiary_link" => RoadClass::Secondary,
            "residential" | "living_street" | "unclassified" => RoadClass::Residential,
            "service" | "parking_aisle" => RoadClass::Service,
            _ => RoadClass::Unknown,
        }
    }

    /// Ways a car can drive on
    pub fn is_drivable(&self) -> bool {
        !matches!(self, RoadClass::Unknown)
    }
}

/// One OSM way with the attributes the advisor consumes
#[derive(Clone, Debug)]
pub struct RoadSegment {
    pub id: u64,
    /// (x, y) = (lon, lat)
    pub geometry: LineString<f64>,
    pub road_class: RoadClass,
    pub one_way: bool,
    pub name: Option<String>,
    /// Posted limit from the `maxspeed` tag [km/h]
    pub max_speed_kmh: Option<f64>,
}

impl RoadSegment {
    pub fn vertices(&self) -> impl Iterator<Item = LatLon> + '_ {
        self.geometry.coords().map(|c| LatLon::new(c.y, c.x))
    }
}

/// Parse an OSM `maxspeed` value into km/h
///
/// Handles plain numbers (`"50"`), explicit units (`"30 mph"`, `"20 knots"`,
/// `"80 km/h"`) and semicolon lists (first value wins). Symbolic values such
/// as `"none"`, `"walk"` or `"DE:urban"` carry no number and yield `None`.
pub fn parse_maxspeed(raw: &str) -> Option<f64> {
    let first = raw.split(';').next()?.trim().to_ascii_lowercase();

    let (number, factor) = if let Some(v) = first.strip_suffix("mph") {
        (v, MPH_TO_KMH)
    } else if let Some(v) = first.strip_suffix("knots") {
        (v, KNOTS_TO_KMH)
    } else if let Some(v) = first.strip_suffix("km/h") {
        (v, 1.0)
    } else if let Some(v) = first.strip_suffix("kmh") {
        (v, 1.0)
    } else {
        (first.as_str(), 1.0)
    };

    let value: f64 = number.trim().parse().ok()?;
    if value.is_finite() && value > 0.0 {
        Some(value * factor)
    } else {
        None
    }
}

// OSM JSON deserialization structures
#[derive(Debug, Deserialize)]
struct OsmResponse {
    elements: Vec<OsmElement>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum OsmElement {
    #[serde(rename = "node")]
    Node { id: u64, lat: f64, lon: f64 },
    #[serde(rename = "way")]
    Way {
        id: u64,
        nodes: Vec<u64>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    #[serde(other)]
    Other,
}

/// Parse an Overpass JSON response into drivable road segments
///
/// Ways that reference a node missing from the response are skipped whole
/// rather than stitched into broken geometry. An area without roads parses
/// to an empty list.
pub fn parse_osm_json(json: &str) -> Result<Vec<RoadSegment>, ProviderError> {
    let response: OsmResponse = serde_json::from_str(json)
        .map_err(|e| ProviderError::Parse(format!("Failed to parse OSM JSON: {}", e)))?;

    let nodes: HashMap<u64, Coord<f64>> = response
        .elements
        .iter()
        .filter_map(|element| match element {
            OsmElement::Node { id, lat, lon } => Some((*id, Coord { x: *lon, y: *lat })),
            _ => None,
        })
        .collect();

    let mut segments = Vec::new();
    for element in &response.elements {
        let OsmElement::Way { id, nodes: node_ids, tags } = element else {
            continue;
        };
        let Some(highway) = tags.get("highway") else {
            continue;
        };
        let road_class = RoadClass::from_highway_tag(highway);
        if !road_class.is_drivable() {
            continue;
        }

        let coords: Option<Vec<Coord<f64>>> =
            node_ids.iter().map(|node_id| nodes.get(node_id).copied()).collect();
        let Some(coords) = coords else {
            warn!("Way {} references a missing node, skipped", id);
            continue;
        };
        if coords.len() < 2 {
            continue;
        }

        segments.push(RoadSegment {
            id: *id,
            geometry: LineString::new(coords),
            road_class,
            one_way: tags.get("oneway").map(|s| s.as_str()) == Some("yes"),
            name: tags.get("name").cloned(),
            max_speed_kmh: tags.get("maxspeed").and_then(|s| parse_maxspeed(s)),
        });
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_highway_tags() {
        let cases = [
            ("trunk_link", RoadClass::Motorway),
            ("primary", RoadClass::Primary),
            ("tertiary", RoadClass::Secondary),
            ("unclassified", RoadClass::Residential),
            ("parking_aisle", RoadClass::Service),
            ("cycleway", RoadClass::Unknown),
        ];
        for (tag, class) in cases {
            assert_eq!(RoadClass::from_highway_tag(tag), class, "{}", tag);
        }
        assert!(RoadClass::Service.is_drivable());
        assert!(!RoadClass::Unknown.is_drivable());
    }

    #[test]
    fn test_maxspeed_values() {
        assert_eq!(parse_maxspeed("50"), Some(50.0));
        assert_eq!(parse_maxspeed("80 km/h"), Some(80.0));
        assert_relative_eq!(parse_maxspeed("30 mph").unwrap(), 48.28, epsilon = 0.01);
        assert_relative_eq!(parse_maxspeed("10 knots").unwrap(), 18.52, epsilon = 0.01);
        assert_eq!(parse_maxspeed("70;50"), Some(70.0));
        assert_eq!(parse_maxspeed("none"), None);
        assert_eq!(parse_maxspeed("walk"), None);
        assert_eq!(parse_maxspeed("DE:urban"), None);
        assert_eq!(parse_maxspeed("0"), None);
    }

    #[test]
    fn test_pass_road_with_limit() {
        let json = r#"{
            "elements": [
                {"type": "node", "id": 11, "lat": 46.5601, "lon": 8.5612},
                {"type": "node", "id": 12, "lat": 46.5608, "lon": 8.5620},
                {
                    "type": "way",
                    "id": 4242,
                    "nodes": [11, 12],
                    "tags": {
                        "highway": "secondary",
                        "name": "Furkapassstrasse",
                        "maxspeed": "80"
                    }
                }
            ]
        }"#;

        let segments = parse_osm_json(json).unwrap();
        assert_eq!(segments.len(), 1);
        let road = &segments[0];
        assert_eq!(road.id, 4242);
        assert_eq!(road.road_class, RoadClass::Secondary);
        assert_eq!(road.name.as_deref(), Some("Furkapassstrasse"));
        assert!(!road.one_way);
        assert_eq!(road.max_speed_kmh, Some(80.0));

        let vertices: Vec<LatLon> = road.vertices().collect();
        assert_eq!(vertices.len(), 2);
        assert_relative_eq!(vertices[1].lat, 46.5608);
        assert_relative_eq!(vertices[1].lon, 8.5620);
    }

    #[test]
    fn test_partial_missing_nodes_skips_way() {
        let json = r#"{
            "elements": [
                {"type": "node", "id": 1, "lat": 45.0, "lon": 7.0},
                {"type": "node", "id": 2, "lat": 45.0005, "lon": 7.0},
                {"type": "node", "id": 3, "lat": 45.001, "lon": 7.0005},
                {"type": "way", "id": 500, "nodes": [1, 2, 77, 3], "tags": {"highway": "primary"}},
                {"type": "way", "id": 501, "nodes": [1, 3], "tags": {"highway": "motorway", "oneway": "yes"}}
            ]
        }"#;

        let segments = parse_osm_json(json).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].id, 501);
        assert!(segments[0].one_way);
    }

    #[test]
    fn test_non_roads_and_empty_area() {
        let json = r#"{
            "elements": [
                {"type": "node", "id": 1, "lat": 0.0, "lon": 0.0},
                {"type": "node", "id": 2, "lat": 0.001, "lon": 0.0},
                {"type": "way", "id": 7, "nodes": [1, 2], "tags": {"highway": "footway"}},
                {"type": "way", "id": 8, "nodes": [1, 2], "tags": {"building": "yes"}},
                {"type": "relation", "id": 9}
            ]
        }"#;
        assert!(parse_osm_json(json).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(parse_osm_json("{not json"), Err(ProviderError::Parse(_))));
    }
}
