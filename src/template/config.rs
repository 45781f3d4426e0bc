//! Wire format of a sheet template
//!
//! Templates arrive as JSON blobs (inline in a scan request or as files in the
//! templates directory). Field names follow the camelCase layout the sheet
//! designer writes. Nothing here is validated; see [`super::Template`].

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const DEFAULT_PAGE_DIMENSIONS: [u32; 2] = [1700, 2600];
pub const DEFAULT_BUBBLE_DIMENSIONS: [u32; 2] = [42, 42];
pub const DEFAULT_SHEET_TO_MARKER_RATIO: f32 = 17.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateConfig {
    #[serde(default = "default_page_dimensions")]
    pub page_dimensions: [u32; 2],
    #[serde(default = "default_bubble_dimensions")]
    pub bubble_dimensions: [u32; 2],
    pub field_blocks: FieldBlocks,
    #[serde(default)]
    pub output_columns: Vec<String>,
    /// Accepted for compatibility; unmarked questions are reported explicitly.
    #[serde(default)]
    pub empty_value: String,
    #[serde(default = "default_marker_ratio")]
    pub sheet_to_marker_width_ratio: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldBlockConfig {
    #[serde(default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub bubble_values: Vec<String>,
    #[serde(default)]
    pub direction: Option<String>,
    pub field_labels: Vec<String>,
    pub origin: [f64; 2],
    pub bubbles_gap: f64,
    pub labels_gap: f64,
    #[serde(default)]
    pub bubble_dimensions: Option<[u32; 2]>,
}

/// Field blocks keyed by name, in declaration order
///
/// Questions are numbered in the order their blocks are declared, so the JSON
/// object order is kept as written.
#[derive(Debug, Clone, Default)]
pub struct FieldBlocks(Vec<(String, FieldBlockConfig)>);

impl FieldBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block at the end, or replace a block of the same name in place
    pub fn insert(&mut self, name: impl Into<String>, block: FieldBlockConfig) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = block,
            None => self.0.push((name, block)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldBlockConfig> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FieldBlockConfig> {
        self.0.iter_mut().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldBlockConfig> {
        let index = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldBlockConfig)> {
        self.0.iter().map(|(n, b)| (n.as_str(), b))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut FieldBlockConfig> {
        self.0.iter_mut().map(|(_, b)| b)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, FieldBlockConfig)> for FieldBlocks {
    fn from_iter<I: IntoIterator<Item = (S, FieldBlockConfig)>>(iter: I) -> Self {
        let mut blocks = Self::new();
        for (name, block) in iter {
            blocks.insert(name, block);
        }
        blocks
    }
}

impl Serialize for FieldBlocks {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, block) in &self.0 {
            map.serialize_entry(name, block)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldBlocks {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldBlocksVisitor;

        impl<'de> Visitor<'de> for FieldBlocksVisitor {
            type Value = FieldBlocks;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of field blocks keyed by name")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldBlocks, A::Error> {
                let mut blocks = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, block)) = access.next_entry::<String, FieldBlockConfig>()? {
                    if blocks.iter().any(|(n, _)| *n == name) {
                        return Err(de::Error::custom(format!(
                            "field block {} is declared twice",
                            name
                        )));
                    }
                    blocks.push((name, block));
                }
                Ok(FieldBlocks(blocks))
            }
        }

        deserializer.deserialize_map(FieldBlocksVisitor)
    }
}

fn default_page_dimensions() -> [u32; 2] {
    DEFAULT_PAGE_DIMENSIONS
}

fn default_bubble_dimensions() -> [u32; 2] {
    DEFAULT_BUBBLE_DIMENSIONS
}

fn default_marker_ratio() -> f32 {
    DEFAULT_SHEET_TO_MARKER_RATIO
}

/// Choice labels and layout direction implied by a named field type
pub fn field_type_preset(name: &str) -> Option<(&'static [&'static str], &'static str)> {
    match name {
        "QTYPE_INT" => Some((
            &["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"],
            "vertical",
        )),
        "QTYPE_INT_FROM_1" => Some((
            &["1", "2", "3", "4", "5", "6", "7", "8", "9", "0"],
            "vertical",
        )),
        "QTYPE_MCQ4" => Some((&["A", "B", "C", "D"], "horizontal")),
        "QTYPE_MCQ5" => Some((&["A", "B", "C", "D", "E"], "horizontal")),
        _ => None,
    }
}

/// The built-in 100-question, five-choice sheet
pub fn default_template_config() -> TemplateConfig {
    let column = |first: usize, x: f64| FieldBlockConfig {
        field_type: Some("QTYPE_MCQ5".to_string()),
        bubble_values: Vec::new(),
        direction: None,
        field_labels: (first..first + 25).map(|i| format!("q{}", i)).collect(),
        origin: [x, 680.0],
        bubbles_gap: 57.0,
        labels_gap: 75.6,
        bubble_dimensions: None,
    };

    let field_blocks = FieldBlocks::from_iter([
        ("Column1_Q1_25", column(1, 90.0)),
        ("Column2_Q26_50", column(26, 530.0)),
        ("Column3_Q51_75", column(51, 970.0)),
        ("Column4_Q76_100", column(76, 1410.0)),
    ]);

    TemplateConfig {
        page_dimensions: DEFAULT_PAGE_DIMENSIONS,
        bubble_dimensions: DEFAULT_BUBBLE_DIMENSIONS,
        field_blocks,
        output_columns: (1..=100).map(|i| format!("q{}", i)).collect(),
        empty_value: String::new(),
        sheet_to_marker_width_ratio: DEFAULT_SHEET_TO_MARKER_RATIO,
    }
}
