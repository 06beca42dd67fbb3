//! Flat, searchable listings of each overlay layer.

use std::cmp::Ordering;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::annotation::{PlayerScope, derive_grouping_name, strip_html};
use crate::country::{CountryData, SpawnGroup};
use crate::overlay::OverlayKey;
use crate::territory::{LandData, MarkerMap, RawArea, TerritoryKind, TerritoryRecord};

/// Country shown for records that do not belong to one.
pub const NO_COUNTRY: &str = "无国家";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetItem {
    pub kind: TerritoryKind,
    pub id: String,
    pub name: String,
    pub country: String,
    pub mc_x: Option<f64>,
    pub mc_z: Option<f64>,
    /// Polygon area in square blocks; 0 for points.
    pub size: f64,
    /// Vertex count for polygons; 1 for points.
    pub quantity: usize,
    pub chunks: Option<f64>,
    pub town_players: Option<f64>,
    pub country_players: Option<f64>,
    pub territory_count: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
struct TextFacts {
    chunks: Option<f64>,
    town_players: Option<f64>,
    country_players: Option<f64>,
    territory_count: Option<f64>,
}

impl TextFacts {
    fn from_record(record: TerritoryRecord<'_>) -> Self {
        Self {
            chunks: record.chunk_count(),
            town_players: record.players_total(PlayerScope::Territory),
            country_players: record.players_total(PlayerScope::Country),
            territory_count: record.country_territory_count(),
        }
    }
}

fn format_country(country: Option<&str>) -> String {
    match country.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => NO_COUNTRY.to_string(),
    }
}

fn point_item(
    id: String,
    name: String,
    country: Option<&str>,
    x: Option<f64>,
    z: Option<f64>,
    facts: TextFacts,
) -> DatasetItem {
    DatasetItem {
        kind: TerritoryKind::Point,
        id,
        name,
        country: format_country(country),
        mc_x: x.filter(|v| v.is_finite()),
        mc_z: z.filter(|v| v.is_finite()),
        size: 0.0,
        quantity: 1,
        chunks: facts.chunks,
        town_players: facts.town_players,
        country_players: facts.country_players,
        territory_count: facts.territory_count,
    }
}

/// `None` when the polygon has no usable vertex.
fn polygon_item(id: &str, area: &RawArea, name: String, country: Option<&str>) -> Option<DatasetItem> {
    let stats = area.stats()?;
    let facts = TextFacts::from_record(TerritoryRecord::from_area(id, area));
    Some(DatasetItem {
        kind: TerritoryKind::Polygon,
        id: id.to_string(),
        name,
        country: format_country(country),
        mc_x: Some(stats.center_x),
        mc_z: Some(stats.center_z),
        size: stats.area,
        quantity: stats.vertex_count,
        chunks: facts.chunks,
        town_players: facts.town_players,
        country_players: facts.country_players,
        territory_count: facts.territory_count,
    })
}

fn area_name(id: &str, area: &RawArea) -> String {
    TerritoryRecord::from_area(id, area)
        .primary_name()
        .or_else(|| derive_grouping_name(id, area.label.as_deref(), area.desc.as_deref()))
        .unwrap_or_else(|| {
            let prefix = id.split('_').next().filter(|p| !p.is_empty()).unwrap_or(id);
            format!("区域 {prefix}")
        })
}

fn spawn_items(
    groups: &IndexMap<String, SpawnGroup>,
    markers: &MarkerMap,
    tag: &str,
) -> Vec<DatasetItem> {
    let mut items = Vec::new();
    for (country, group) in groups {
        for (index, spawn) in group.spawns.iter().enumerate() {
            let id = if spawn.marker_id.is_empty() {
                format!("{country}:{tag}:{index}")
            } else {
                spawn.marker_id.clone()
            };
            let name = Some(strip_html(&spawn.name))
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| id.clone());
            let facts = markers
                .get(&spawn.marker_id)
                .map(|marker| {
                    TextFacts::from_record(TerritoryRecord::from_marker(&spawn.marker_id, marker))
                })
                .unwrap_or_default();
            items.push(point_item(
                id,
                name,
                Some(country.as_str()),
                Some(spawn.x),
                Some(spawn.z),
                facts,
            ));
        }
    }
    items
}

/// Listing rows for one overlay layer.
pub fn dataset_items(key: OverlayKey, land: &LandData, data: &CountryData) -> Vec<DatasetItem> {
    match key {
        OverlayKey::TerritoryMarkers => land
            .markers
            .iter()
            .map(|(id, marker)| {
                let name = marker
                    .label
                    .as_deref()
                    .map(strip_html)
                    .filter(|name| !name.is_empty())
                    .or_else(|| {
                        marker
                            .extra
                            .get("name")
                            .and_then(|value| value.as_str())
                            .map(strip_html)
                            .filter(|name| !name.is_empty())
                    })
                    .unwrap_or_else(|| id.clone());
                let record = TerritoryRecord::from_marker(id, marker);
                let country = record.country();
                point_item(
                    id.clone(),
                    name,
                    country.as_deref(),
                    marker.x,
                    marker.z,
                    TextFacts::from_record(record),
                )
            })
            .collect(),
        OverlayKey::TerritoryAreas => land
            .areas
            .iter()
            .filter_map(|(id, area)| {
                let country = TerritoryRecord::from_area(id, area).country();
                polygon_item(id, area, area_name(id, area), country.as_deref())
            })
            .collect(),
        OverlayKey::CountrySpawn => spawn_items(&data.country_spawn, &land.markers, "spawn"),
        OverlayKey::CountryAreas => data
            .country_areas
            .iter()
            .flat_map(|(country, areas)| {
                areas.iter().filter_map(move |(id, area)| {
                    polygon_item(id, area, area_name(id, area), Some(country.as_str()))
                })
            })
            .collect(),
        OverlayKey::CountryCapitals => data
            .country_capitals
            .iter()
            .flat_map(|(country, capital)| {
                let name = Some(strip_html(&capital.name))
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| country.clone());
                capital.areas.iter().filter_map(move |(id, area)| {
                    polygon_item(id, area, name.clone(), Some(country.as_str()))
                })
            })
            .collect(),
        OverlayKey::CountryCapitalsSpawn => {
            spawn_items(&data.country_capitals_spawn, &land.markers, "capitalSpawn")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    Id,
    Name,
    #[serde(alias = "country")]
    CountryName,
    Kind,
    Size,
    Quantity,
    Chunks,
    TownPlayers,
    CountryPlayers,
    TerritoryCount,
}

impl SortField {
    fn numeric_value(self, item: &DatasetItem) -> Option<f64> {
        let value = match self {
            Self::Size => Some(item.size),
            Self::Quantity => Some(item.quantity as f64),
            Self::Chunks => item.chunks,
            Self::TownPlayers => item.town_players,
            Self::CountryPlayers => item.country_players,
            Self::TerritoryCount => item.territory_count,
            Self::Id | Self::Name | Self::CountryName | Self::Kind => return None,
        };
        Some(value.filter(|v| v.is_finite()).unwrap_or(0.0))
    }

    fn text_value(self, item: &DatasetItem) -> &str {
        match self {
            Self::Name => &item.name,
            Self::CountryName => &item.country,
            Self::Kind => match item.kind {
                TerritoryKind::Point => "point",
                TerritoryKind::Polygon => "polygon",
            },
            _ => &item.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

fn search_haystack(item: &DatasetItem) -> String {
    let optional = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
    format!(
        "{} {} {} {} {} {}",
        item.name,
        item.id,
        item.country,
        optional(item.chunks),
        optional(item.town_players),
        optional(item.country_players)
    )
    .to_lowercase()
}

/// Case-insensitive search, then a stable sort on `field` with ties broken by id.
/// Descending order reverses both the primary comparison and the tie-break.
pub fn filter_and_sort(
    items: Vec<DatasetItem>,
    query: &str,
    field: SortField,
    direction: SortDirection,
) -> Vec<DatasetItem> {
    let query = query.trim().to_lowercase();
    let mut filtered: Vec<DatasetItem> = if query.is_empty() {
        items
    } else {
        items
            .into_iter()
            .filter(|item| search_haystack(item).contains(&query))
            .collect()
    };

    filtered.sort_by(|a, b| {
        let primary = match (field.numeric_value(a), field.numeric_value(b)) {
            (Some(av), Some(bv)) => av.partial_cmp(&bv).unwrap_or(Ordering::Equal),
            _ => field.text_value(a).cmp(field.text_value(b)),
        };
        let ordering = primary.then_with(|| a.id.cmp(&b.id));
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
    filtered
}
