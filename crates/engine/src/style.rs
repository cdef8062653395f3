//! Cell styles, borders and number formats, interned per workbook.
//!
//! Cells never hold a style object directly; they hold a small integer id
//! into an [`InternTable`]. Two structurally equal styles always get the
//! same id, so comparing ids is comparing styles.

use std::hash::Hash;

use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Horizontal text alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    Center,
    Right,
}

/// Style properties. Every field is optional: `None` means "not set", and
/// [`Style::patched`] overlays only the fields that are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Style {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strikethrough: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<Alignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<OrderedFloat<f64>>,
}

impl Style {
    pub fn is_empty(&self) -> bool {
        *self == Style::default()
    }

    /// `self` with every set field of `patch` written over it.
    pub fn patched(&self, patch: &Style) -> Style {
        Style {
            bold: patch.bold.or(self.bold),
            italic: patch.italic.or(self.italic),
            underline: patch.underline.or(self.underline),
            strikethrough: patch.strikethrough.or(self.strikethrough),
            align: patch.align.or(self.align),
            fill_color: patch.fill_color.clone().or_else(|| self.fill_color.clone()),
            text_color: patch.text_color.clone().or_else(|| self.text_color.clone()),
            font_size: patch.font_size.or(self.font_size),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorderStyle {
    Thin,
    Medium,
    Thick,
    Dashed,
    Dotted,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BorderSide {
    pub style: BorderStyle,
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Border {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<BorderSide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<BorderSide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bottom: Option<BorderSide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<BorderSide>,
}

impl Border {
    pub fn is_empty(&self) -> bool {
        *self == Border::default()
    }
}

macro_rules! intern_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);
    };
}

intern_id!(StyleId);
intern_id!(BorderId);
intern_id!(FormatId);

/// Append-only table that maps structurally equal values to one id.
///
/// Entries are never removed: undo records keep ids, and an id must keep
/// meaning the same value for the lifetime of the workbook.
#[derive(Debug, Clone)]
pub struct InternTable<T> {
    items: Vec<T>,
    index: FxHashMap<T, u32>,
}

impl<T> Default for InternTable<T> {
    fn default() -> Self {
        Self { items: Vec::new(), index: FxHashMap::default() }
    }
}

impl<T: Clone + Eq + Hash> InternTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: T) -> u32 {
        if let Some(&id) = self.index.get(&value) {
            return id;
        }
        let id = self.items.len() as u32;
        self.items.push(value.clone());
        self.index.insert(value, id);
        id
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.items.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The three interned tables of a workbook.
#[derive(Debug, Clone, Default)]
pub struct StyleTables {
    pub styles: InternTable<Style>,
    pub borders: InternTable<Border>,
    pub formats: InternTable<String>,
}

impl StyleTables {
    pub fn intern_style(&mut self, style: Style) -> Option<StyleId> {
        (!style.is_empty()).then(|| StyleId(self.styles.intern(style)))
    }

    pub fn intern_border(&mut self, border: Border) -> Option<BorderId> {
        (!border.is_empty()).then(|| BorderId(self.borders.intern(border)))
    }

    pub fn intern_format(&mut self, format: String) -> Option<FormatId> {
        (!format.is_empty()).then(|| FormatId(self.formats.intern(format)))
    }

    pub fn style(&self, id: StyleId) -> Option<&Style> {
        self.styles.get(id.0)
    }

    pub fn border(&self, id: BorderId) -> Option<&Border> {
        self.borders.get(id.0)
    }

    pub fn format(&self, id: FormatId) -> Option<&str> {
        self.formats.get(id.0).map(|s| s.as_str())
    }
}
