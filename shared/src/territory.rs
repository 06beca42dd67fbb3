use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::annotation::{self, AnnotationFields, PlayerScope};

/// Marker-set namespace that holds land claims inside a marker payload.
pub const LAND_SET_NAMESPACE: &str = "me.angeschossen.lands";

pub type MarkerMap = IndexMap<String, RawMarker>;
pub type AreaMap = IndexMap<String, RawArea>;

/// A point record (spawn or land marker) as published by the map.
///
/// Decoding is lenient: text fields that are not strings and scalar coordinates that are
/// not numbers decode as `None`. Unknown fields are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawMarker {
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub markup: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl RawMarker {
    /// `(x, z)` when both are finite.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.x, self.z) {
            (Some(x), Some(z)) if x.is_finite() && z.is_finite() => Some((x, z)),
            _ => None,
        }
    }

    pub fn annotations(&self) -> AnnotationFields<'_> {
        AnnotationFields {
            markup: self.markup.as_deref(),
            desc: self.desc.as_deref(),
            label: self.label.as_deref(),
        }
    }
}

/// A polygon record. `x[i]`/`z[i]` are the world coordinates of vertex `i`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawArea {
    #[serde(default, deserialize_with = "lenient::coords")]
    pub x: Vec<f64>,
    #[serde(default, deserialize_with = "lenient::coords")]
    pub z: Vec<f64>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub fillcolor: Option<String>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub fillopacity: Option<f64>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub markup: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl RawArea {
    /// Equal-length, non-empty coordinate arrays.
    pub fn has_valid_geometry(&self) -> bool {
        !self.x.is_empty() && self.x.len() == self.z.len()
    }

    /// Finite `(x, z)` vertices. Empty when the geometry is invalid.
    pub fn vertices(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        let len = if self.has_valid_geometry() { self.x.len() } else { 0 };
        self.x
            .iter()
            .zip(self.z.iter())
            .take(len)
            .map(|(x, z)| (*x, *z))
            .filter(|(x, z)| x.is_finite() && z.is_finite())
    }

    pub fn stats(&self) -> Option<PolygonStats> {
        PolygonStats::from_vertices(self.vertices())
    }

    pub fn annotations(&self) -> AnnotationFields<'_> {
        AnnotationFields {
            markup: self.markup.as_deref(),
            desc: self.desc.as_deref(),
            label: self.label.as_deref(),
        }
    }
}

/// World-space summary of a polygon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolygonStats {
    pub min_x: f64,
    pub max_x: f64,
    pub min_z: f64,
    pub max_z: f64,
    pub center_x: f64,
    pub center_z: f64,
    /// Shoelace area; zero below three vertices.
    pub area: f64,
    pub vertex_count: usize,
}

impl PolygonStats {
    pub fn from_vertices<I: IntoIterator<Item = (f64, f64)>>(vertices: I) -> Option<Self> {
        let points: Vec<(f64, f64)> = vertices.into_iter().collect();
        let &(first_x, first_z) = points.first()?;

        let (mut min_x, mut max_x, mut min_z, mut max_z) = (first_x, first_x, first_z, first_z);
        for &(x, z) in &points {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_z = min_z.min(z);
            max_z = max_z.max(z);
        }

        let mut area = 0.0;
        if points.len() >= 3 {
            for (i, &(x1, z1)) in points.iter().enumerate() {
                let (x2, z2) = points[(i + 1) % points.len()];
                area += x1 * z2 - x2 * z1;
            }
            area = (area / 2.0).abs();
        }

        Some(Self {
            min_x,
            max_x,
            min_z,
            max_z,
            center_x: (min_x + max_x) / 2.0,
            center_z: (min_z + max_z) / 2.0,
            area,
            vertex_count: points.len(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerritoryKind {
    Point,
    Polygon,
}

/// Borrowed raw record of either kind.
#[derive(Debug, Clone, Copy)]
pub enum RawTerritory<'a> {
    Point(&'a RawMarker),
    Polygon(&'a RawArea),
}

/// Uniform lookup surface over one raw marker or area.
///
/// Facts are derived on demand from the annotation fields and never stored on the record.
#[derive(Debug, Clone, Copy)]
pub struct TerritoryRecord<'a> {
    pub id: &'a str,
    pub raw: RawTerritory<'a>,
}

impl<'a> TerritoryRecord<'a> {
    pub fn from_marker(id: &'a str, marker: &'a RawMarker) -> Self {
        Self {
            id,
            raw: RawTerritory::Point(marker),
        }
    }

    pub fn from_area(id: &'a str, area: &'a RawArea) -> Self {
        Self {
            id,
            raw: RawTerritory::Polygon(area),
        }
    }

    pub fn kind(&self) -> TerritoryKind {
        match self.raw {
            RawTerritory::Point(_) => TerritoryKind::Point,
            RawTerritory::Polygon(_) => TerritoryKind::Polygon,
        }
    }

    pub fn annotations(&self) -> AnnotationFields<'a> {
        match self.raw {
            RawTerritory::Point(marker) => marker.annotations(),
            RawTerritory::Polygon(area) => area.annotations(),
        }
    }

    pub fn country(&self) -> Option<String> {
        self.annotations().find_map(annotation::extract_country)
    }

    pub fn capital_name(&self) -> Option<String> {
        self.annotations().find_map(annotation::extract_capital_strict)
    }

    pub fn primary_name(&self) -> Option<String> {
        self.annotations().find_map(annotation::extract_primary_name)
    }

    /// Whether this polygon is the capital's own drawn territory, i.e. one of its text
    /// fields renders `capital_name` as literal tag content. Points never match.
    pub fn matches_capital_area(&self, capital_name: &str) -> bool {
        if self.kind() != TerritoryKind::Polygon || capital_name.is_empty() {
            return false;
        }
        self.annotations()
            .any(|text| annotation::area_contains_tag_delimited_name(text, capital_name))
    }

    pub fn chunk_count(&self) -> Option<f64> {
        self.annotations().find_map(annotation::extract_chunk_count)
    }

    pub fn country_territory_count(&self) -> Option<f64> {
        self.annotations()
            .find_map(annotation::extract_country_territory_count)
    }

    pub fn players_total(&self, scope: PlayerScope) -> Option<f64> {
        self.annotations()
            .find_map(|text| annotation::extract_players_total(text, scope))
    }

    /// Name suitable for a popup heading: the primary name, else the stripped label,
    /// skipping anything that looks like a storage identifier. Empty when neither fits.
    pub fn display_name(&self) -> String {
        let fields = self.annotations();
        let primary = self
            .primary_name()
            .map(|name| annotation::strip_html(&name))
            .unwrap_or_default();
        if !primary.is_empty() && !annotation::is_likely_internal_id(&primary, self.id) {
            return primary;
        }

        let label = fields.label.map(annotation::strip_html).unwrap_or_default();
        if !label.is_empty() && !annotation::is_likely_internal_id(&label, self.id) {
            return label;
        }

        String::new()
    }
}

/// Land markers and areas extracted from one marker payload, in source order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandData {
    pub markers: MarkerMap,
    pub areas: AreaMap,
}

impl LandData {
    /// Pull the land set out of a full marker-world payload
    /// (`sets["me.angeschossen.lands"].{markers,areas}`).
    pub fn from_marker_world(payload: &Value) -> Self {
        let Some(land_set) = payload
            .get("sets")
            .and_then(|sets| sets.get(LAND_SET_NAMESPACE))
        else {
            warn!(
                namespace = LAND_SET_NAMESPACE,
                "land set not found in marker payload"
            );
            return Self::default();
        };

        Self::from_parts(land_set.get("markers"), land_set.get("areas"))
    }

    /// Build from separately stored marker and area objects. Entries that cannot be
    /// decoded are skipped.
    pub fn from_parts(markers: Option<&Value>, areas: Option<&Value>) -> Self {
        Self {
            markers: decode_entries(markers, "marker"),
            areas: decode_entries(areas, "area"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty() && self.areas.is_empty()
    }
}

fn decode_entries<T: DeserializeOwned>(value: Option<&Value>, what: &str) -> IndexMap<String, T> {
    let Some(Value::Object(entries)) = value else {
        return IndexMap::new();
    };

    let mut decoded = IndexMap::with_capacity(entries.len());
    for (id, entry) in entries {
        match serde_json::from_value::<T>(entry.clone()) {
            Ok(item) => {
                decoded.insert(id.clone(), item);
            }
            Err(e) => {
                debug!(id = %id, error = %e, "skipping undecodable {what} entry");
            }
        }
    }
    decoded
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(text)) => Some(text),
            _ => None,
        })
    }

    pub fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value
            .as_ref()
            .and_then(Value::as_f64)
            .filter(|number| number.is_finite()))
    }

    /// Non-numeric vertices become NaN so indices stay aligned between `x` and `z`.
    pub fn coords<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_f64().unwrap_or(f64::NAN))
                .collect(),
            _ => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lenient_decoding_tolerates_wrong_types_and_keeps_extras() {
        let marker: RawMarker = serde_json::from_value(json!({
            "x": 10.5,
            "z": "not a number",
            "label": 42,
            "desc": "<b>hello</b>",
            "icon": "flag"
        }))
        .expect("marker decodes");

        assert_eq!(marker.x, Some(10.5));
        assert_eq!(marker.z, None);
        assert_eq!(marker.label, None);
        assert_eq!(marker.desc.as_deref(), Some("<b>hello</b>"));
        assert_eq!(marker.extra.get("icon"), Some(&json!("flag")));
        assert_eq!(marker.coordinates(), None);

        let area: RawArea = serde_json::from_value(json!({
            "x": [0, "bad", 10],
            "z": 5,
            "fillcolor": "#ff0000"
        }))
        .expect("area decodes");
        assert_eq!(area.x.len(), 3);
        assert!(area.x[1].is_nan());
        assert!(area.z.is_empty());
        assert!(!area.has_valid_geometry());
        assert_eq!(area.vertices().count(), 0);
    }

    #[test]
    fn land_data_extracts_land_set_in_source_order() {
        let payload = json!({
            "sets": {
                "other": { "markers": { "ignored": { "x": 1, "z": 1 } } },
                LAND_SET_NAMESPACE: {
                    "markers": {
                        "zeta_spawn": { "x": 1, "z": 2 },
                        "alpha_spawn": { "x": 3, "z": 4 },
                        "broken": "not an object"
                    },
                    "areas": {
                        "a_world": { "x": [0, 1, 1], "z": [0, 0, 1] }
                    }
                }
            }
        });

        let land = LandData::from_marker_world(&payload);
        let marker_ids: Vec<&str> = land.markers.keys().map(String::as_str).collect();
        assert_eq!(marker_ids, vec!["zeta_spawn", "alpha_spawn"]);
        assert_eq!(land.areas.len(), 1);

        assert!(LandData::from_marker_world(&json!({ "sets": {} })).is_empty());
    }

    #[test]
    fn record_facts_follow_field_priority() {
        let area = RawArea {
            x: vec![0.0, 10.0, 10.0],
            z: vec![0.0, 0.0, 10.0],
            markup: Some("<div><b>王城</b> 首都：王城</div>".to_string()),
            desc: Some("这片领土属于国家：龙国，区块：2,048".to_string()),
            label: Some("首都：别城".to_string()),
            ..RawArea::default()
        };
        let record = TerritoryRecord::from_area("a_world", &area);

        assert_eq!(record.kind(), TerritoryKind::Polygon);
        assert_eq!(record.country().as_deref(), Some("龙国"));
        assert_eq!(record.capital_name().as_deref(), Some("王城"));
        assert_eq!(record.primary_name().as_deref(), Some("王城"));
        assert_eq!(record.chunk_count(), Some(2048.0));
        assert!(record.matches_capital_area("王城"));
        assert!(!record.matches_capital_area("别城"));
    }

    #[test]
    fn points_never_match_capital_area() {
        let marker = RawMarker {
            x: Some(0.0),
            z: Some(0.0),
            markup: Some("<b>王城</b>".to_string()),
            ..RawMarker::default()
        };
        let record = TerritoryRecord::from_marker("m_spawn", &marker);
        assert!(!record.matches_capital_area("王城"));
    }

    #[test]
    fn display_name_skips_internal_ids() {
        let area = RawArea {
            x: vec![0.0],
            z: vec![0.0],
            label: Some("01HZX3V8K9Q2M7N4P5R6S7T8VW".to_string()),
            ..RawArea::default()
        };
        assert_eq!(TerritoryRecord::from_area("a", &area).display_name(), "");

        let area = RawArea {
            desc: Some("01HZX3V8K9Q2M7N4P5R6S7T8VW".to_string()),
            label: Some("<i>青山镇</i>".to_string()),
            ..RawArea::default()
        };
        assert_eq!(TerritoryRecord::from_area("a", &area).display_name(), "青山镇");
    }

    #[test]
    fn polygon_stats_compute_bounds_and_shoelace_area() {
        let stats = PolygonStats::from_vertices([(0.0, 0.0), (4.0, 0.0), (4.0, 3.0), (0.0, 3.0)])
            .expect("stats for non-empty polygon");
        assert_eq!(stats.area, 12.0);
        assert_eq!(stats.center_x, 2.0);
        assert_eq!(stats.center_z, 1.5);
        assert_eq!(stats.vertex_count, 4);

        let line = PolygonStats::from_vertices([(0.0, 0.0), (1.0, 1.0)]).expect("two vertices");
        assert_eq!(line.area, 0.0);
        assert!(PolygonStats::from_vertices(Vec::new()).is_none());
    }
}
