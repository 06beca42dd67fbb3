//! Folding land records into per-country aggregates.
//!
//! One pass runs in three stages: markers create country buckets and spawn points, areas
//! attach to their country and report capital names, then each country resolves its
//! capital area and capital spawn. Aggregates are rebuilt from scratch on every pass.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::annotation::strip_html;
use crate::territory::{AreaMap, LandData, MarkerMap, RawArea, RawMarker, TerritoryRecord};

/// Height used for spawn points whose marker has no `y`.
pub const DEFAULT_SPAWN_Y: f64 = 64.0;

const SPAWN_MARKER_SUFFIX: &str = "_spawn";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnEntry {
    pub x: f64,
    pub z: f64,
    pub y: f64,
    pub name: String,
    pub marker_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_area_id: Option<String>,
}

impl SpawnEntry {
    /// `None` unless the marker has finite `x` and `z`.
    fn from_marker(
        marker_id: &str,
        marker: &RawMarker,
        name: String,
        source_area_id: Option<String>,
    ) -> Option<Self> {
        let (x, z) = marker.coordinates()?;
        Some(Self {
            x,
            z,
            y: marker
                .y
                .filter(|y| y.is_finite())
                .unwrap_or(DEFAULT_SPAWN_Y),
            name,
            marker_id: marker_id.to_string(),
            source_area_id,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpawnGroup {
    pub spawns: Vec<SpawnEntry>,
}

/// Capital facts gathered for one country during a pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapitalInfo {
    pub name: Option<String>,
    pub areas: AreaMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountryAggregate {
    pub name: String,
    pub spawn_points: Vec<SpawnEntry>,
    /// Ids of every marker that named this country, valid coordinates or not.
    pub marker_ids: Vec<String>,
    pub areas: AreaMap,
    pub capital: CapitalInfo,
    /// Zero or one entry.
    pub capital_spawn: Vec<SpawnEntry>,
}

impl CountryAggregate {
    pub fn new(name: String) -> Self {
        Self {
            name,
            spawn_points: Vec::new(),
            marker_ids: Vec::new(),
            areas: AreaMap::new(),
            capital: CapitalInfo::default(),
            capital_spawn: Vec::new(),
        }
    }

    pub fn has_markers(&self) -> bool {
        !self.marker_ids.is_empty()
    }

    fn add_marker(&mut self, marker_id: &str, marker: &RawMarker) {
        let name = marker
            .label
            .clone()
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| marker_id.to_string());
        if let Some(spawn) = SpawnEntry::from_marker(marker_id, marker, name, None) {
            self.spawn_points.push(spawn);
        }
        self.marker_ids.push(marker_id.to_string());
    }

    fn add_area(&mut self, area_id: &str, area: &RawArea) {
        let record = TerritoryRecord::from_area(area_id, area);

        // The capital fact is read before the geometry check: a malformed polygon can
        // still name the capital.
        let reported_capital = record.capital_name();
        if let Some(reported) = reported_capital.as_deref() {
            self.observe_capital_name(reported, area_id);
        }

        if !area.has_valid_geometry() {
            debug!(
                country = %self.name,
                area_id,
                x_len = area.x.len(),
                z_len = area.z.len(),
                "excluding area with invalid geometry"
            );
            return;
        }

        self.areas.insert(area_id.to_string(), area.clone());

        if reported_capital.is_some()
            && let Some(capital) = self.capital.name.as_deref()
            && record.matches_capital_area(capital)
        {
            self.capital
                .areas
                .insert(area_id.to_string(), area.clone());
        }
    }

    /// The first capital name observed for a country wins.
    fn observe_capital_name(&mut self, reported: &str, area_id: &str) {
        let Some(existing) = self.capital.name.as_deref() else {
            self.capital.name = Some(reported.to_string());
            return;
        };
        if existing != reported {
            debug!(
                country = %self.name,
                kept = existing,
                ignored = reported,
                area_id,
                "conflicting capital name reported; keeping the first"
            );
        }
    }

    /// Pick the capital's own area when ingestion did not attach one.
    ///
    /// Rules in order: primary name equals the capital name; stripped text contains the
    /// capital name; the country's only area. No match leaves `capital.areas` empty.
    pub fn resolve_capital_area(&mut self) {
        let Some(capital) = self.capital.name.clone() else {
            return;
        };
        if !self.capital.areas.is_empty() || self.areas.is_empty() {
            return;
        }

        let exact = self.areas.iter().find(|(id, area)| {
            TerritoryRecord::from_area(id, area).primary_name().as_deref() == Some(capital.as_str())
        });

        let contains = || {
            self.areas.iter().find(|(_, area)| {
                area.annotations()
                    .first_text()
                    .is_some_and(|text| strip_html(text).contains(capital.as_str()))
            })
        };

        let only = || {
            if self.areas.len() == 1 {
                self.areas.first()
            } else {
                None
            }
        };

        let chosen = exact
            .or_else(contains)
            .or_else(only)
            .map(|(area_id, area)| (area_id.clone(), area.clone()));
        if let Some((area_id, area)) = chosen {
            self.capital.areas.insert(area_id, area);
        }
    }

    /// Link the capital to a spawn marker.
    ///
    /// First try `<capital area id up to its last '_'>_spawn`; otherwise scan `*_spawn`
    /// markers whose label equals the capital name (the country name when no capital is
    /// known) and whose own country, if any, is this one.
    pub fn resolve_capital_spawn(&mut self, markers: &MarkerMap) {
        let target_name = self
            .capital
            .name
            .clone()
            .unwrap_or_else(|| self.name.clone());
        let source_area_id = self.capital.areas.keys().next().cloned();

        let by_area_id = source_area_id.as_deref().and_then(|area_id| {
            let candidate_id = spawn_marker_id_for_area(area_id);
            markers
                .get_key_value(&candidate_id)
                .filter(|(_, marker)| marker.coordinates().is_some())
        });

        let by_label = || {
            markers.iter().find(|(marker_id, marker)| {
                if !marker_id.ends_with(SPAWN_MARKER_SUFFIX) {
                    return false;
                }
                if marker.label.as_deref() != Some(target_name.as_str()) {
                    return false;
                }
                if let Some(country) = TerritoryRecord::from_marker(marker_id, marker).country()
                    && country != self.name
                {
                    return false;
                }
                marker.coordinates().is_some()
            })
        };

        self.capital_spawn = by_area_id
            .or_else(by_label)
            .and_then(|(marker_id, marker)| {
                SpawnEntry::from_marker(marker_id, marker, target_name.clone(), source_area_id.clone())
            })
            .into_iter()
            .collect();
    }
}

/// `abc_world` -> `abc_spawn`; ids without an inner underscore keep their full text.
fn spawn_marker_id_for_area(area_id: &str) -> String {
    let base = match area_id.rfind('_') {
        Some(idx) if idx > 0 => &area_id[..idx],
        _ => area_id,
    };
    format!("{base}{SPAWN_MARKER_SUFFIX}")
}

/// One aggregation pass over a land snapshot.
#[derive(Debug, Default)]
pub struct CountryAggregator {
    countries: IndexMap<String, CountryAggregate>,
}

impl CountryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn country_mut(&mut self, name: String) -> &mut CountryAggregate {
        self.countries
            .entry(name)
            .or_insert_with_key(|name| CountryAggregate::new(name.clone()))
    }

    /// Markers without a resolvable country are skipped.
    pub fn ingest_markers(&mut self, markers: &MarkerMap) {
        for (marker_id, marker) in markers {
            let Some(country) = TerritoryRecord::from_marker(marker_id, marker).country() else {
                continue;
            };
            self.country_mut(country).add_marker(marker_id, marker);
        }
    }

    /// Areas without a resolvable country are skipped.
    pub fn ingest_areas(&mut self, areas: &AreaMap) {
        for (area_id, area) in areas {
            let Some(country) = TerritoryRecord::from_area(area_id, area).country() else {
                continue;
            };
            self.country_mut(country).add_area(area_id, area);
        }
    }

    /// Run the capital resolution stages and return the final aggregates.
    pub fn finish(mut self, markers: &MarkerMap) -> IndexMap<String, CountryAggregate> {
        for country in self.countries.values_mut() {
            country.resolve_capital_area();
            country.resolve_capital_spawn(markers);
        }
        self.countries
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryCapital {
    pub name: String,
    pub areas: AreaMap,
}

/// The four per-country blobs produced by an aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryData {
    pub country_spawn: IndexMap<String, SpawnGroup>,
    pub country_areas: IndexMap<String, AreaMap>,
    pub country_capitals: IndexMap<String, CountryCapital>,
    pub country_capitals_spawn: IndexMap<String, SpawnGroup>,
}

impl CountryData {
    /// Full aggregation pass over `land`.
    pub fn from_land(land: &LandData) -> Self {
        let mut aggregator = CountryAggregator::new();
        aggregator.ingest_markers(&land.markers);
        aggregator.ingest_areas(&land.areas);
        let data = Self::from_aggregates(aggregator.finish(&land.markers));

        info!(
            markers = land.markers.len(),
            areas = land.areas.len(),
            spawn_groups = data.country_spawn.len(),
            area_groups = data.country_areas.len(),
            capitals = data.country_capitals.len(),
            capital_spawns = data.country_capitals_spawn.len(),
            "country data aggregated"
        );
        data
    }

    pub fn from_aggregates(countries: IndexMap<String, CountryAggregate>) -> Self {
        let mut data = Self::default();
        for (name, country) in countries {
            if country.has_markers() {
                data.country_spawn.insert(
                    name.clone(),
                    SpawnGroup {
                        spawns: country.spawn_points,
                    },
                );
            }
            if !country.areas.is_empty() {
                data.country_areas.insert(name.clone(), country.areas);
            }
            if let Some(capital_name) = country.capital.name {
                data.country_capitals.insert(
                    name.clone(),
                    CountryCapital {
                        name: capital_name,
                        areas: country.capital.areas,
                    },
                );
            }
            if !country.capital_spawn.is_empty() {
                data.country_capitals_spawn.insert(
                    name,
                    SpawnGroup {
                        spawns: country.capital_spawn,
                    },
                );
            }
        }
        data
    }

    /// Every country named by any of the four blobs, in first-seen order.
    pub fn country_names(&self) -> Vec<&str> {
        let mut names: IndexSet<&str> = IndexSet::new();
        for name in self
            .country_spawn
            .keys()
            .chain(self.country_areas.keys())
            .chain(self.country_capitals.keys())
            .chain(self.country_capitals_spawn.keys())
        {
            names.insert(name.as_str());
        }
        names.into_iter().collect()
    }
}
