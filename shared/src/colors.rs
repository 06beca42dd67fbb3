use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub type Rgb = (u8, u8, u8);

pub const DEFAULT_TERRITORY_STROKE: Rgb = (0x00, 0x99, 0x33);
pub const DEFAULT_TERRITORY_FILL: Rgb = (0x00, 0xff, 0x00);

/// Deterministic country hue: sum of code points modulo 360.
pub fn country_hue(name: &str) -> f64 {
    let sum: u64 = name.chars().map(|c| c as u64).sum();
    (sum % 360) as f64
}

/// Country colour as `hsl(hue, 70%, 50%)` converted to RGB.
pub fn country_color(name: &str) -> Rgb {
    hsl_to_rgb(country_hue(name), 0.7, 0.5)
}

/// Memoised country colours owned by the rendering side.
///
/// Cleared by the owner whenever a new aggregation pass replaces the country set.
#[derive(Debug, Clone, Default)]
pub struct CountryColorTable {
    colors: HashMap<String, Rgb>,
}

impl CountryColorTable {
    pub fn color_for(&mut self, country: &str) -> Rgb {
        if let Some(&rgb) = self.colors.get(country) {
            return rgb;
        }
        let rgb = country_color(country);
        self.colors.insert(country.to_string(), rgb);
        rgb
    }

    pub fn clear(&mut self) {
        self.colors.clear();
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapitalColorMode {
    #[default]
    Red,
    Green,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapitalColorScheme {
    pub stroke: Rgb,
    pub fill: Rgb,
}

impl CapitalColorMode {
    pub fn scheme(self) -> CapitalColorScheme {
        match self {
            Self::Red => CapitalColorScheme {
                stroke: (0xdc, 0x26, 0x26),
                fill: (0xef, 0x44, 0x44),
            },
            Self::Green => CapitalColorScheme {
                stroke: (0x15, 0x80, 0x3d),
                fill: (0x22, 0xc5, 0x5e),
            },
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Red => Self::Green,
            Self::Green => Self::Red,
        }
    }
}

/// Per-country capital colour overrides. Only non-default (`green`) entries are kept, so
/// the serialised form is exactly the set of overridden countries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapitalColorModes {
    overrides: IndexMap<String, CapitalColorMode>,
}

impl CapitalColorModes {
    /// Load from a stored JSON object, ignoring anything that is not `"green"`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let overrides = value
            .as_object()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, mode)| mode.as_str() == Some("green"))
                    .map(|(country, _)| (country.clone(), CapitalColorMode::Green))
                    .collect()
            })
            .unwrap_or_default();
        Self { overrides }
    }

    pub fn mode(&self, country: &str) -> CapitalColorMode {
        self.overrides.get(country).copied().unwrap_or_default()
    }

    /// Flip the mode for `country` and return the new mode.
    pub fn toggle(&mut self, country: &str) -> CapitalColorMode {
        let next = self.mode(country).toggled();
        match next {
            CapitalColorMode::Red => {
                self.overrides.shift_remove(country);
            }
            CapitalColorMode::Green => {
                self.overrides.insert(country.to_string(), next);
            }
        }
        next
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

/// Parse the colour strings found on raw areas: `#rgb`, `#rrggbb`, `rgb(r, g, b)` and
/// `rgba(r, g, b, a)`.
pub fn parse_css_color(value: &str) -> Option<Rgb> {
    let raw = value.trim().to_ascii_lowercase();
    if raw.is_empty() {
        return None;
    }

    if let Some(args) = raw
        .strip_prefix("rgba(")
        .or_else(|| raw.strip_prefix("rgb("))
    {
        let mut channels = args
            .trim_end_matches(')')
            .split(',')
            .map(|part| part.trim().parse::<f64>().ok());
        let mut next_channel = || -> Option<u8> {
            let value = channels.next()??;
            Some(value.round().clamp(0.0, 255.0) as u8)
        };
        return Some((next_channel()?, next_channel()?, next_channel()?));
    }

    let hex = raw.strip_prefix('#')?;
    let digit = |c: u8| (c as char).to_digit(16).map(|v| v as u8);
    let bytes = hex.as_bytes();
    match bytes.len() {
        3 => {
            let expand = |c: u8| digit(c).map(|v| (v << 4) | v);
            Some((expand(bytes[0])?, expand(bytes[1])?, expand(bytes[2])?))
        }
        6 => {
            let pair = |i: usize| Some((digit(bytes[i])? << 4) | digit(bytes[i + 1])?);
            Some((pair(0)?, pair(2)?, pair(4)?))
        }
        _ => None,
    }
}

/// Convert HSL (`h` in degrees, `s`/`l` in 0..1) to RGB.
pub fn hsl_to_rgb(h: f64, s: f64, l: f64) -> Rgb {
    if s.abs() < f64::EPSILON {
        let v = (l * 255.0).round() as u8;
        return (v, v, v);
    }

    let q = if l < 0.5 {
        l * (1.0 + s)
    } else {
        l + s - l * s
    };
    let p = 2.0 * l - q;
    let h = h / 360.0;

    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);

    (
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    )
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 1.0 / 2.0 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}
