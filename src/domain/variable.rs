// Display metadata for weather variables
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Colors handed out to variables that have no configured color.
const FALLBACK_PALETTE: [Color; 8] = [
    Color::rgb(0x1f, 0x77, 0xb4),
    Color::rgb(0xff, 0x7f, 0x0e),
    Color::rgb(0x2c, 0xa0, 0x2c),
    Color::rgb(0xd6, 0x27, 0x28),
    Color::rgb(0x94, 0x67, 0xbd),
    Color::rgb(0x8c, 0x56, 0x4b),
    Color::rgb(0xe3, 0x77, 0xc2),
    Color::rgb(0x7f, 0x7f, 0x7f),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB` or `0xRRGGBB`.
    pub fn parse_hex(text: &str) -> Option<Self> {
        let hex = text
            .trim()
            .strip_prefix('#')
            .or_else(|| text.trim().strip_prefix("0x"))?;
        if hex.len() != 6 {
            return None;
        }
        let value = u32::from_str_radix(hex, 16).ok()?;
        Some(Self::rgb(
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ))
    }

    /// Stable color for a key without configuration.
    fn fallback_for(key: &str) -> Self {
        let hash = key
            .bytes()
            .fold(0x811c_9dc5_u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193));
        FALLBACK_PALETTE[hash as usize % FALLBACK_PALETTE.len()]
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VariableProperty {
    pub display_name: String,
    pub units: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub color: Option<Color>,
    /// Unused variables are hidden from pickers but still plot if loaded.
    pub used: bool,
    /// Position in pickers; unordered variables come last.
    pub order: Option<u32>,
}

/// Shared lookup of per-variable display metadata.
#[derive(Debug, Clone, Default)]
pub struct VariableProperties {
    properties: HashMap<String, VariableProperty>,
}

impl VariableProperties {
    pub fn new(properties: HashMap<String, VariableProperty>) -> Self {
        Self { properties }
    }

    pub fn get(&self, key: &str) -> Option<&VariableProperty> {
        self.properties.get(key)
    }

    pub fn color(&self, key: &str) -> Color {
        self.properties
            .get(key)
            .and_then(|p| p.color)
            .unwrap_or_else(|| Color::fallback_for(key))
    }

    pub fn display_name(&self, key: &str) -> String {
        self.properties
            .get(key)
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| key.to_string())
    }

    /// Keys of the used variables in display order. Ties and unordered
    /// variables fall back to key order.
    pub fn ordering(&self) -> Vec<&str> {
        let mut used: Vec<(&String, &VariableProperty)> =
            self.properties.iter().filter(|(_, p)| p.used).collect();
        used.sort_by(|(a_key, a), (b_key, b)| {
            (a.order.is_none(), a.order, a_key).cmp(&(b.order.is_none(), b.order, b_key))
        });
        used.into_iter().map(|(key, _)| key.as_str()).collect()
    }
}
