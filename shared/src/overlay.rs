//! Pixel-space overlay shapes built from land data and country aggregates.
//!
//! The overlay set is what the exporter frames and what a renderer draws. It is rebuilt
//! from scratch whenever the underlying data changes.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::colors::{
    CapitalColorMode, CapitalColorModes, CountryColorTable, DEFAULT_TERRITORY_FILL,
    DEFAULT_TERRITORY_STROKE, Rgb, parse_css_color,
};
use crate::country::{CountryData, SpawnGroup};
use crate::geom::{PixelPoint, PixelRect};
use crate::projection::CoordinateProjector;
use crate::territory::{LandData, RawArea, TerritoryRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlayKey {
    TerritoryMarkers,
    TerritoryAreas,
    CountrySpawn,
    CountryAreas,
    CountryCapitals,
    CountryCapitalsSpawn,
}

impl OverlayKey {
    pub const ALL: [OverlayKey; 6] = [
        OverlayKey::TerritoryMarkers,
        OverlayKey::TerritoryAreas,
        OverlayKey::CountrySpawn,
        OverlayKey::CountryAreas,
        OverlayKey::CountryCapitals,
        OverlayKey::CountryCapitalsSpawn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TerritoryMarkers => "territoryMarkers",
            Self::TerritoryAreas => "territoryAreas",
            Self::CountrySpawn => "countrySpawn",
            Self::CountryAreas => "countryAreas",
            Self::CountryCapitals => "countryCapitals",
            Self::CountryCapitalsSpawn => "countryCapitalsSpawn",
        }
    }

    /// Parse a comma-separated key list, keeping first occurrences in order.
    pub fn parse_list(raw: &str) -> Result<Vec<OverlayKey>, UnknownOverlayKey> {
        let mut keys = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let key = part.parse::<OverlayKey>()?;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

impl fmt::Display for OverlayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown overlay key: {0}")]
pub struct UnknownOverlayKey(pub String);

impl FromStr for OverlayKey {
    type Err = UnknownOverlayKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownOverlayKey(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub stroke: Rgb,
    pub fill: Rgb,
    pub fill_opacity: f64,
    pub stroke_opacity: f64,
    pub weight: f64,
}

impl OverlayStyle {
    const fn new(stroke: Rgb, fill: Rgb, fill_opacity: f64, weight: f64) -> Self {
        Self {
            stroke,
            fill,
            fill_opacity,
            stroke_opacity: 1.0,
            weight,
        }
    }
}

const TERRITORY_MARKER_STYLE: OverlayStyle =
    OverlayStyle::new((0x0e, 0xa5, 0xe9), (0x38, 0xbd, 0xf8), 0.72, 2.0);
const COUNTRY_SPAWN_STYLE: OverlayStyle =
    OverlayStyle::new((0xf5, 0x9e, 0x0b), (0xfb, 0xbf, 0x24), 0.8, 2.0);
const CAPITAL_SPAWN_STYLE: OverlayStyle =
    OverlayStyle::new((0x7c, 0x3a, 0xed), (0xa8, 0x55, 0xf7), 0.72, 2.0);

const TERRITORY_MARKER_RADIUS: f64 = 5.0;
const SPAWN_RADIUS: f64 = 6.0;
const RAW_AREA_FILL_OPACITY: f64 = 0.25;
const COUNTRY_AREA_FILL_OPACITY: f64 = 0.18;
const CAPITAL_AREA_FILL_OPACITY: f64 = 0.24;

#[derive(Debug, Clone, PartialEq)]
pub struct Popup {
    pub heading: Option<String>,
    pub details: Option<String>,
}

impl Popup {
    /// `None` when there is neither a heading nor details to show.
    fn new(heading: Option<String>, details: Option<String>) -> Option<Self> {
        let heading = heading.filter(|text| !text.is_empty());
        let details = details.filter(|text| !text.is_empty());
        if heading.is_none() && details.is_none() {
            return None;
        }
        Some(Self { heading, details })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayShape {
    Point {
        center: PixelPoint,
        radius: f64,
        style: OverlayStyle,
        popup: Option<Popup>,
    },
    Polygon {
        vertices: Vec<PixelPoint>,
        style: OverlayStyle,
        popup: Option<Popup>,
    },
    /// Permanent text centred on `anchor`.
    Label {
        anchor: PixelPoint,
        text: String,
        mode: CapitalColorMode,
    },
    Group(Vec<OverlayShape>),
}

impl OverlayShape {
    /// Pixel extent of the shape. Points and labels contribute their single coordinate.
    pub fn bounds(&self) -> Option<PixelRect> {
        match self {
            Self::Point { center, .. } => Some(PixelRect::from_point(*center)),
            Self::Label { anchor, .. } => Some(PixelRect::from_point(*anchor)),
            Self::Polygon { vertices, .. } => PixelRect::bounding(vertices.iter().copied()),
            Self::Group(children) => union_bounds(children.iter().filter_map(Self::bounds)),
        }
    }
}

fn union_bounds(rects: impl Iterator<Item = PixelRect>) -> Option<PixelRect> {
    rects.reduce(|acc, rect| acc.union(&rect))
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayGroup {
    pub key: OverlayKey,
    pub visible: bool,
    pub shapes: Vec<OverlayShape>,
}

impl OverlayGroup {
    pub fn new(key: OverlayKey) -> Self {
        Self {
            key,
            visible: true,
            shapes: Vec::new(),
        }
    }

    pub fn bounds(&self) -> Option<PixelRect> {
        union_bounds(self.shapes.iter().filter_map(OverlayShape::bounds))
    }

    /// Leaf shapes, flattening nested groups.
    pub fn shape_count(&self) -> usize {
        fn count(shapes: &[OverlayShape]) -> usize {
            shapes
                .iter()
                .map(|shape| match shape {
                    OverlayShape::Group(children) => count(children),
                    _ => 1,
                })
                .sum()
        }
        count(&self.shapes)
    }
}

/// All six overlay groups in their natural order.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySet {
    groups: Vec<OverlayGroup>,
}

impl Default for OverlaySet {
    fn default() -> Self {
        Self {
            groups: OverlayKey::ALL.into_iter().map(OverlayGroup::new).collect(),
        }
    }
}

impl OverlaySet {
    pub fn group(&self, key: OverlayKey) -> &OverlayGroup {
        &self.groups[Self::index(key)]
    }

    pub fn group_mut(&mut self, key: OverlayKey) -> &mut OverlayGroup {
        &mut self.groups[Self::index(key)]
    }

    fn index(key: OverlayKey) -> usize {
        OverlayKey::ALL
            .iter()
            .position(|candidate| *candidate == key)
            .unwrap_or_default()
    }

    pub fn groups(&self) -> &[OverlayGroup] {
        &self.groups
    }

    /// Show exactly `keys`, hiding every other group.
    pub fn show_only(&mut self, keys: &[OverlayKey]) {
        for group in &mut self.groups {
            group.visible = keys.contains(&group.key);
        }
    }

    /// Visible groups, those named in `order` first (in that order), then the remaining
    /// visible groups in natural order.
    pub fn visible_in_order(&self, order: &[OverlayKey]) -> Vec<&OverlayGroup> {
        let mut ordered: Vec<&OverlayGroup> = order
            .iter()
            .map(|key| self.group(*key))
            .filter(|group| group.visible)
            .collect();
        for group in &self.groups {
            if group.visible && !order.contains(&group.key) {
                ordered.push(group);
            }
        }
        ordered
    }
}

/// Projects land data and country aggregates into overlay groups.
pub struct OverlayBuilder<'a> {
    projector: &'a CoordinateProjector,
    colors: &'a mut CountryColorTable,
    capital_modes: &'a CapitalColorModes,
}

impl<'a> OverlayBuilder<'a> {
    pub fn new(
        projector: &'a CoordinateProjector,
        colors: &'a mut CountryColorTable,
        capital_modes: &'a CapitalColorModes,
    ) -> Self {
        Self {
            projector,
            colors,
            capital_modes,
        }
    }

    pub fn build(&mut self, land: &LandData, data: &CountryData) -> OverlaySet {
        let mut set = OverlaySet::default();
        set.group_mut(OverlayKey::TerritoryMarkers).shapes = self.territory_markers(land);
        set.group_mut(OverlayKey::TerritoryAreas).shapes = self.territory_areas(land);
        set.group_mut(OverlayKey::CountrySpawn).shapes = self.spawns(
            &data.country_spawn,
            COUNTRY_SPAWN_STYLE,
            "出生点",
        );
        set.group_mut(OverlayKey::CountryAreas).shapes = self.country_areas(data);
        set.group_mut(OverlayKey::CountryCapitals).shapes = self.country_capitals(data);
        set.group_mut(OverlayKey::CountryCapitalsSpawn).shapes = self.spawns(
            &data.country_capitals_spawn,
            CAPITAL_SPAWN_STYLE,
            "首都出生点",
        );
        set
    }

    fn project_area(&self, area: &RawArea) -> Option<Vec<PixelPoint>> {
        let vertices: Vec<PixelPoint> = area
            .vertices()
            .filter_map(|(x, z)| self.projector.forward(x, z))
            .collect();
        (vertices.len() >= 3).then_some(vertices)
    }

    fn territory_markers(&self, land: &LandData) -> Vec<OverlayShape> {
        land.markers
            .iter()
            .filter_map(|(marker_id, marker)| {
                let (x, z) = marker.coordinates()?;
                let center = self.projector.forward(x, z)?;
                let heading = marker
                    .label
                    .clone()
                    .filter(|label| !label.is_empty())
                    .unwrap_or_else(|| marker_id.clone());
                Some(OverlayShape::Point {
                    center,
                    radius: TERRITORY_MARKER_RADIUS,
                    style: TERRITORY_MARKER_STYLE,
                    popup: Popup::new(Some(heading), marker.desc.clone()),
                })
            })
            .collect()
    }

    fn territory_areas(&self, land: &LandData) -> Vec<OverlayShape> {
        land.areas
            .iter()
            .filter_map(|(area_id, area)| {
                let vertices = self.project_area(area)?;
                let style = OverlayStyle {
                    stroke: area
                        .color
                        .as_deref()
                        .and_then(parse_css_color)
                        .unwrap_or(DEFAULT_TERRITORY_STROKE),
                    fill: area
                        .fillcolor
                        .as_deref()
                        .and_then(parse_css_color)
                        .unwrap_or(DEFAULT_TERRITORY_FILL),
                    fill_opacity: area.fillopacity.unwrap_or(RAW_AREA_FILL_OPACITY),
                    stroke_opacity: area.opacity.unwrap_or(1.0),
                    weight: area.weight.unwrap_or(1.0),
                };
                let heading = TerritoryRecord::from_area(area_id, area).display_name();
                Some(OverlayShape::Polygon {
                    vertices,
                    style,
                    popup: Popup::new(Some(heading), area.desc.clone()),
                })
            })
            .collect()
    }

    fn spawns(
        &self,
        groups: &IndexMap<String, SpawnGroup>,
        style: OverlayStyle,
        heading_suffix: &str,
    ) -> Vec<OverlayShape> {
        groups
            .iter()
            .flat_map(|(country, group)| {
                group.spawns.iter().filter_map(move |spawn| {
                    let center = self.projector.forward(spawn.x, spawn.z)?;
                    Some(OverlayShape::Point {
                        center,
                        radius: SPAWN_RADIUS,
                        style,
                        popup: Popup::new(
                            Some(format!("{country} {heading_suffix}")),
                            Some(spawn.name.clone()),
                        ),
                    })
                })
            })
            .collect()
    }

    fn country_areas(&mut self, data: &CountryData) -> Vec<OverlayShape> {
        let mut shapes = Vec::new();
        for (country, areas) in &data.country_areas {
            let color = self.colors.color_for(country);
            let style = OverlayStyle::new(color, color, COUNTRY_AREA_FILL_OPACITY, 2.0);
            for (area_id, area) in areas {
                let Some(vertices) = self.project_area(area) else {
                    continue;
                };
                let area_name = TerritoryRecord::from_area(area_id, area).display_name();
                let heading = if area_name.is_empty() {
                    country.clone()
                } else {
                    format!("{country} - {area_name}")
                };
                shapes.push(OverlayShape::Polygon {
                    vertices,
                    style,
                    popup: Popup::new(Some(heading), area.desc.clone()),
                });
            }
        }
        shapes
    }

    /// One nested group per capital area: the polygon plus its centred name label.
    fn country_capitals(&self, data: &CountryData) -> Vec<OverlayShape> {
        let mut shapes = Vec::new();
        for (country, capital) in &data.country_capitals {
            let capital_name = if capital.name.is_empty() {
                country.as_str()
            } else {
                capital.name.as_str()
            };
            let mode = self.capital_modes.mode(country);
            let scheme = mode.scheme();
            let style = OverlayStyle::new(scheme.stroke, scheme.fill, CAPITAL_AREA_FILL_OPACITY, 3.0);

            for area in capital.areas.values() {
                let Some(vertices) = self.project_area(area) else {
                    continue;
                };
                let Some(anchor) = PixelRect::bounding(vertices.iter().copied()).map(|r| r.center())
                else {
                    continue;
                };
                shapes.push(OverlayShape::Group(vec![
                    OverlayShape::Polygon {
                        vertices,
                        style,
                        popup: Popup::new(
                            Some(format!("{country} 首都")),
                            Some(capital_name.to_string()),
                        ),
                    },
                    OverlayShape::Label {
                        anchor,
                        text: capital_name.to_string(),
                        mode,
                    },
                ]));
            }
        }
        shapes
    }
}

/// Convenience wrapper over [`OverlayBuilder`].
pub fn build_overlays(
    land: &LandData,
    data: &CountryData,
    projector: &CoordinateProjector,
    colors: &mut CountryColorTable,
    capital_modes: &CapitalColorModes,
) -> OverlaySet {
    OverlayBuilder::new(projector, colors, capital_modes).build(land, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colors::country_color;
    use crate::territory::RawMarker;

    fn sample_land() -> LandData {
        let mut land = LandData::default();
        land.markers.insert(
            "dragon_spawn".to_string(),
            RawMarker {
                x: Some(100.0),
                z: Some(200.0),
                label: Some("王城".to_string()),
                desc: Some("这片领土属于国家：龙国".to_string()),
                ..RawMarker::default()
            },
        );
        land.markers.insert(
            "lost".to_string(),
            RawMarker {
                x: Some(1.0),
                ..RawMarker::default()
            },
        );
        land.areas.insert(
            "wang_world".to_string(),
            RawArea {
                x: vec![0.0, 500.0, 500.0, 0.0],
                z: vec![0.0, 0.0, 500.0, 500.0],
                color: Some("#ff0000".to_string()),
                desc: Some("<b>王城</b> 这片领土属于国家：龙国，首都：王城".to_string()),
                ..RawArea::default()
            },
        );
        land.areas.insert(
            "line_world".to_string(),
            RawArea {
                x: vec![0.0, 10.0],
                z: vec![0.0, 10.0],
                ..RawArea::default()
            },
        );
        land
    }

    #[test]
    fn overlay_keys_parse_and_dedupe() {
        assert_eq!(
            OverlayKey::parse_list("countryAreas, territoryMarkers,countryAreas").expect("valid keys"),
            vec![OverlayKey::CountryAreas, OverlayKey::TerritoryMarkers]
        );
        assert_eq!(
            OverlayKey::parse_list("countryAreas,bogus"),
            Err(UnknownOverlayKey("bogus".to_string()))
        );
        assert_eq!(OverlayKey::CountryCapitalsSpawn.to_string(), "countryCapitalsSpawn");
    }

    #[test]
    fn build_projects_every_layer() {
        let land = sample_land();
        let data = CountryData::from_land(&land);
        let projector = CoordinateProjector::default();
        let mut colors = CountryColorTable::default();
        let set = build_overlays(&land, &data, &projector, &mut colors, &CapitalColorModes::default());

        assert_eq!(set.group(OverlayKey::TerritoryMarkers).shape_count(), 1);
        // Two-vertex polygons are not drawable.
        assert_eq!(set.group(OverlayKey::TerritoryAreas).shape_count(), 1);
        assert_eq!(set.group(OverlayKey::CountrySpawn).shape_count(), 1);
        assert_eq!(set.group(OverlayKey::CountryAreas).shape_count(), 1);
        // Capital polygon plus its label.
        assert_eq!(set.group(OverlayKey::CountryCapitals).shape_count(), 2);
        assert_eq!(set.group(OverlayKey::CountryCapitalsSpawn).shape_count(), 1);
        assert_eq!(colors.len(), 1);

        let OverlayShape::Polygon { style, popup, .. } = &set.group(OverlayKey::TerritoryAreas).shapes[0]
        else {
            panic!("expected a polygon");
        };
        assert_eq!(style.stroke, (0xff, 0, 0));
        assert_eq!(style.fill, DEFAULT_TERRITORY_FILL);
        assert_eq!(style.fill_opacity, RAW_AREA_FILL_OPACITY);
        assert_eq!(popup.as_ref().and_then(|p| p.heading.as_deref()), Some("王城"));

        let OverlayShape::Polygon { style, .. } = &set.group(OverlayKey::CountryAreas).shapes[0] else {
            panic!("expected a polygon");
        };
        assert_eq!(style.stroke, country_color("龙国"));
    }

    #[test]
    fn capital_style_follows_color_mode() {
        let land = sample_land();
        let data = CountryData::from_land(&land);
        let projector = CoordinateProjector::default();
        let mut modes = CapitalColorModes::default();
        modes.toggle("龙国");
        let set = build_overlays(&land, &data, &projector, &mut CountryColorTable::default(), &modes);

        let OverlayShape::Group(children) = &set.group(OverlayKey::CountryCapitals).shapes[0] else {
            panic!("expected a nested group");
        };
        match &children[..] {
            [OverlayShape::Polygon { style, .. }, OverlayShape::Label { text, mode, .. }] => {
                assert_eq!(style.stroke, CapitalColorMode::Green.scheme().stroke);
                assert_eq!(text, "王城");
                assert_eq!(*mode, CapitalColorMode::Green);
            }
            other => panic!("unexpected capital shapes: {other:?}"),
        }
    }

    #[test]
    fn group_bounds_recurse_into_nested_groups() {
        let mut group = OverlayGroup::new(OverlayKey::CountryCapitals);
        group.shapes.push(OverlayShape::Group(vec![OverlayShape::Label {
            anchor: PixelPoint::new(5.0, 5.0),
            text: "x".to_string(),
            mode: CapitalColorMode::Red,
        }]));
        group.shapes.push(OverlayShape::Polygon {
            vertices: vec![
                PixelPoint::new(10.0, 10.0),
                PixelPoint::new(20.0, 10.0),
                PixelPoint::new(20.0, 30.0),
            ],
            style: TERRITORY_MARKER_STYLE,
            popup: None,
        });
        assert_eq!(group.bounds(), Some(PixelRect::new(5.0, 5.0, 20.0, 30.0)));
        assert_eq!(OverlayGroup::new(OverlayKey::CountrySpawn).bounds(), None);
    }

    #[test]
    fn visible_groups_follow_requested_order() {
        let mut set = OverlaySet::default();
        set.show_only(&[OverlayKey::CountryAreas, OverlayKey::TerritoryMarkers, OverlayKey::CountrySpawn]);
        let keys: Vec<OverlayKey> = set
            .visible_in_order(&[OverlayKey::CountrySpawn, OverlayKey::CountryCapitals])
            .iter()
            .map(|group| group.key)
            .collect();
        assert_eq!(
            keys,
            vec![
                OverlayKey::CountrySpawn,
                OverlayKey::TerritoryMarkers,
                OverlayKey::CountryAreas
            ]
        );
    }
}
