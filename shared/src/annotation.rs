//! Fact extraction from the free-text annotations attached to land markers and areas.
//!
//! Annotations are human-authored, partially HTML-tagged and inconsistently formatted.
//! Every extractor here is total: a missing pattern is `None`, never an error.

use std::sync::OnceLock;

use regex::Regex;

/// One of the three text fields a raw territory may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextField {
    Markup,
    Desc,
    Label,
}

/// Order in which text fields are consulted by every extractor.
///
/// Structured markup is trusted over the free description, which is trusted over the
/// terse label. The first field that yields a fact wins.
pub const TEXT_FIELD_PRIORITY: [TextField; 3] = [TextField::Markup, TextField::Desc, TextField::Label];

/// Borrowed view over the candidate text fields of one territory.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationFields<'a> {
    pub markup: Option<&'a str>,
    pub desc: Option<&'a str>,
    pub label: Option<&'a str>,
}

impl<'a> AnnotationFields<'a> {
    pub fn get(&self, field: TextField) -> Option<&'a str> {
        match field {
            TextField::Markup => self.markup,
            TextField::Desc => self.desc,
            TextField::Label => self.label,
        }
    }

    /// Apply `extract` to each present field in [`TEXT_FIELD_PRIORITY`] order and return
    /// the first hit.
    pub fn find_map<T>(&self, mut extract: impl FnMut(&'a str) -> Option<T>) -> Option<T> {
        TEXT_FIELD_PRIORITY
            .iter()
            .filter_map(|field| self.get(*field))
            .find_map(|text| extract(text))
    }

    /// First present, non-empty field in priority order.
    pub fn first_text(&self) -> Option<&'a str> {
        TEXT_FIELD_PRIORITY
            .iter()
            .filter_map(|field| self.get(*field))
            .find(|text| !text.is_empty())
    }

    pub fn any(&self, mut predicate: impl FnMut(&'a str) -> bool) -> bool {
        TEXT_FIELD_PRIORITY
            .iter()
            .filter_map(|field| self.get(*field))
            .any(|text| predicate(text))
    }
}

/// Which player count [`extract_players_total`] should look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerScope {
    /// Parenthesised count of players living in this one territory.
    Territory,
    /// Labelled country-wide total.
    Country,
    /// Country total first, then the territory count.
    #[default]
    Auto,
}

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("valid regex"))
        }
    };
}

static_regex!(tag_regex, r"<[^>]*>");
static_regex!(whitespace_regex, r"\s+");
static_regex!(
    country_regex,
    r"这片领土属于国家[:：]?\s*([^,，.。:：\s]+)"
);
static_regex!(capital_regex, r"首都[:：]?\s*([^,，.。:：\s]+)");
static_regex!(primary_name_separator_regex, r"[\s，。:：；;]+");
static_regex!(chunk_count_regex, r"区块[:：]\s*([0-9,，\s]+)");
static_regex!(
    country_territory_count_regex,
    r"领土\s*[（(]\s*数量[:：]\s*([0-9,，\s]+)\s*[,，]"
);
static_regex!(territory_players_regex, r"玩家\s*[（(]\s*(\d+)\s*[）)]");
static_regex!(
    country_players_summary_regex,
    r"领土\s*[（(]\s*数量[:：]\s*[0-9,，\s]+\s*[,，]\s*玩家数量[:：]\s*([0-9,，\s]+)"
);
static_regex!(country_players_regex, r"玩家数量[:：]\s*([0-9,，\s]+)");
static_regex!(grouping_name_zh_regex, r"领地[:：]\s*([^，。:\s]+)");
static_regex!(
    grouping_name_en_regex,
    r"(?i)territory[:：]?\s*([A-Za-z0-9 _'()-]+)"
);
static_regex!(grouping_segment_regex, r"[，。:；;\n]");
static_regex!(
    ulid_regex,
    r"(?i)^[0-9A-HJKMNP-TV-Z]{26}(?:_[A-Za-z0-9-]+)?$"
);
static_regex!(
    uuid_regex,
    r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$"
);

/// Remove `<...>` markup, collapse whitespace runs to a single space and trim.
pub fn strip_html(text: &str) -> String {
    let without_tags = tag_regex().replace_all(text, " ");
    whitespace_regex()
        .replace_all(&without_tags, " ")
        .trim()
        .to_string()
}

/// Parse a number written with optional thousands separators (`,` or `，`) and spaces.
pub fn parse_compact_number(raw: &str) -> Option<f64> {
    let normalized: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '，') && !c.is_whitespace())
        .collect();
    if normalized.is_empty() {
        return None;
    }
    normalized.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    let clean = strip_html(text);
    if clean.is_empty() {
        return None;
    }
    re.captures(&clean)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|token| !token.is_empty())
}

fn first_number(re: &Regex, clean: &str) -> Option<f64> {
    re.captures(clean)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_compact_number(m.as_str()))
}

/// Country named by a `这片领土属于国家：NAME` clause.
pub fn extract_country(text: &str) -> Option<String> {
    first_capture(country_regex(), text)
}

/// Capital named by a `首都：NAME` clause. Independent of [`extract_country`].
pub fn extract_capital_strict(text: &str) -> Option<String> {
    first_capture(capital_regex(), text)
}

/// First token of the first line of the stripped text; the heuristic proper name of a
/// territory.
pub fn extract_primary_name(text: &str) -> Option<String> {
    let clean = strip_html(text);
    let first_line = clean.split('\n').next()?.trim();
    if first_line.is_empty() {
        return None;
    }
    primary_name_separator_regex()
        .split(first_line)
        .next()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// True when the untouched source contains `>NAME<`, i.e. the name is rendered as the
/// literal content of a tag rather than mentioned in prose.
pub fn area_contains_tag_delimited_name(source: &str, name: &str) -> bool {
    if source.is_empty() || name.is_empty() {
        return false;
    }
    source.contains(&format!(">{name}<"))
}

/// `区块：N`
pub fn extract_chunk_count(text: &str) -> Option<f64> {
    first_number(chunk_count_regex(), &strip_html(text))
}

/// `领土（数量：N，...`
pub fn extract_country_territory_count(text: &str) -> Option<f64> {
    first_number(country_territory_count_regex(), &strip_html(text))
}

/// `玩家（N）`
pub fn extract_territory_players(text: &str) -> Option<f64> {
    first_number(territory_players_regex(), &strip_html(text))
}

/// `领土（数量：N，玩家数量：M` and then any bare `玩家数量：M`.
pub fn extract_country_players_total(text: &str) -> Option<f64> {
    let clean = strip_html(text);
    first_number(country_players_summary_regex(), &clean)
        .or_else(|| first_number(country_players_regex(), &clean))
}

pub fn extract_players_total(text: &str, scope: PlayerScope) -> Option<f64> {
    match scope {
        PlayerScope::Territory => extract_territory_players(text),
        PlayerScope::Country => extract_country_players_total(text),
        PlayerScope::Auto => {
            extract_country_players_total(text).or_else(|| extract_territory_players(text))
        }
    }
}

/// Best-effort human name for grouping a territory in listings.
pub fn derive_grouping_name(id: &str, label: Option<&str>, desc: Option<&str>) -> Option<String> {
    if let Some(label) = label.map(strip_html).filter(|label| !label.is_empty()) {
        return Some(label);
    }

    let fallback = desc.map(strip_html).unwrap_or_default();
    if !fallback.is_empty() {
        for re in [grouping_name_zh_regex(), grouping_name_en_regex()] {
            if let Some(name) = re
                .captures(&fallback)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim())
                .filter(|name| !name.is_empty())
            {
                return Some(name.to_string());
            }
        }

        if let Some(segment) = grouping_segment_regex()
            .split(&fallback)
            .next()
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
        {
            return Some(segment.to_string());
        }
    }

    if id.is_empty() {
        None
    } else {
        Some(format!("Territory {id}"))
    }
}

/// Labels that are really storage identifiers (the area id itself, a ULID or a UUID)
/// and should not be shown as a name.
pub fn is_likely_internal_id(label: &str, area_id: &str) -> bool {
    let normalized: String = label.chars().filter(|c| !c.is_whitespace()).collect();
    if normalized.is_empty() {
        return false;
    }

    let normalized_area_id: String = area_id.chars().filter(|c| !c.is_whitespace()).collect();
    if !normalized_area_id.is_empty() && normalized.to_lowercase() == normalized_area_id.to_lowercase()
    {
        return true;
    }

    ulid_regex().is_match(&normalized) || uuid_regex().is_match(&normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_removes_tags_and_collapses_whitespace() {
        assert_eq!(strip_html("<b>A</b>  B"), "A B");
        assert_eq!(strip_html("  <div>\n line one </div>\t<br/>two "), "line one two");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn extract_country_stops_at_separators() {
        assert_eq!(
            extract_country("这片领土属于国家：龙国, 其他信息").as_deref(),
            Some("龙国")
        );
        assert_eq!(
            extract_country("<span>这片领土属于国家:凤国。首都：凰城</span>").as_deref(),
            Some("凤国")
        );
        assert_eq!(
            extract_country("这片领土属于国家 虎国 更多").as_deref(),
            Some("虎国")
        );
        assert_eq!(extract_country("no relevant text"), None);
    }

    #[test]
    fn extract_capital_is_independent_of_country() {
        assert_eq!(extract_capital_strict("首都：王城").as_deref(), Some("王城"));
        assert_eq!(
            extract_capital_strict("这片领土属于国家：龙国，首都: 王城，区块：12").as_deref(),
            Some("王城")
        );
        assert_eq!(extract_capital_strict("这片领土属于国家：龙国"), None);
    }

    #[test]
    fn primary_name_is_first_token_of_stripped_text() {
        assert_eq!(
            extract_primary_name("<div><b>王城</b> 这片领土属于国家：龙国</div>").as_deref(),
            Some("王城")
        );
        assert_eq!(extract_primary_name("北港；备注").as_deref(), Some("北港"));
        assert_eq!(extract_primary_name("<br/>"), None);
    }

    #[test]
    fn tag_delimited_name_requires_literal_tag_content() {
        assert!(area_contains_tag_delimited_name("<b>王城</b>", "王城"));
        assert!(!area_contains_tag_delimited_name("靠近王城的小镇", "王城"));
        assert!(!area_contains_tag_delimited_name("<b> 王城 </b>", "王城"));
        assert!(!area_contains_tag_delimited_name("<b>王城</b>", ""));
    }

    #[test]
    fn numeric_extractors_strip_thousands_separators() {
        let desc = "<div>区块：1,234</div><div>领土（数量：12，玩家数量：3，456）</div><div>玩家（7）</div>";
        assert_eq!(extract_chunk_count(desc), Some(1234.0));
        assert_eq!(extract_country_territory_count(desc), Some(12.0));
        assert_eq!(extract_players_total(desc, PlayerScope::Territory), Some(7.0));
        assert_eq!(extract_players_total(desc, PlayerScope::Country), Some(3456.0));
        assert_eq!(extract_players_total(desc, PlayerScope::Auto), Some(3456.0));
    }

    #[test]
    fn auto_player_scope_falls_back_to_territory_count() {
        assert_eq!(extract_players_total("玩家 (5)", PlayerScope::Auto), Some(5.0));
        assert_eq!(extract_players_total("玩家数量：88", PlayerScope::Country), Some(88.0));
        assert_eq!(extract_players_total("nothing here", PlayerScope::Auto), None);
    }

    #[test]
    fn parse_compact_number_rejects_garbage() {
        assert_eq!(parse_compact_number(" 1，024 "), Some(1024.0));
        assert_eq!(parse_compact_number(" , "), None);
        assert_eq!(parse_compact_number("12a"), None);
    }

    #[test]
    fn fields_are_probed_in_priority_order() {
        let fields = AnnotationFields {
            markup: Some("<p>首都：甲城</p>"),
            desc: Some("首都：乙城"),
            label: None,
        };
        assert_eq!(fields.find_map(extract_capital_strict).as_deref(), Some("甲城"));

        let fields = AnnotationFields {
            markup: Some("<p>no capital</p>"),
            desc: Some("首都：乙城"),
            label: Some("首都：丙城"),
        };
        assert_eq!(fields.find_map(extract_capital_strict).as_deref(), Some("乙城"));

        let fields = AnnotationFields {
            markup: Some(""),
            desc: None,
            label: Some("label"),
        };
        assert_eq!(fields.first_text(), Some("label"));
    }

    #[test]
    fn grouping_name_prefers_label_then_desc_patterns() {
        assert_eq!(
            derive_grouping_name("a1", Some("<b>Harbor</b>"), None).as_deref(),
            Some("Harbor")
        );
        assert_eq!(
            derive_grouping_name("a1", None, Some("说明；领地：青山，其他")).as_deref(),
            Some("青山")
        );
        assert_eq!(
            derive_grouping_name("a1", None, Some("Territory: Oak Hill")).as_deref(),
            Some("Oak Hill")
        );
        assert_eq!(
            derive_grouping_name("a1", None, Some("第一段，第二段")).as_deref(),
            Some("第一段")
        );
        assert_eq!(derive_grouping_name("a1", None, None).as_deref(), Some("Territory a1"));
        assert_eq!(derive_grouping_name("", None, None), None);
    }

    #[test]
    fn internal_id_labels_are_detected() {
        assert!(is_likely_internal_id("01HZX3V8K9Q2M7N4P5R6S7T8VW", ""));
        assert!(is_likely_internal_id("01HZX3V8K9Q2M7N4P5R6S7T8VW_world", ""));
        assert!(is_likely_internal_id(
            "123e4567-e89b-12d3-a456-426614174000",
            ""
        ));
        assert!(is_likely_internal_id("Area 51", "area51"));
        assert!(!is_likely_internal_id("王城", "area51"));
        assert!(!is_likely_internal_id("  ", "area51"));
    }
}
