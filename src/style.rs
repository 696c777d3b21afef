//! The fixed house stylesheet used when laying out the PDF.
//!
//! Values mirror the article CSS the web front-end uses (Open-Sans-like body
//! at 14 px / 1.7, slate text, rules under `h1`/`h2`, blue links and quote
//! bars, grey code and table chrome) converted to points at 0.75 pt per CSS
//! pixel. Every struct is `#[serde(default)]`, so a JSON override only needs
//! the fields it changes:
//!
//! ```json
//! { "body": { "font_size_pt": 12.0 }, "link": { "color": "#aa0000" } }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An sRGB colour, serialised as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Channels scaled to `0.0..=1.0` as PDF colour operators expect.
    pub fn unit(&self) -> (f32, f32, f32) {
        (
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        )
    }
}

impl FromStr for RgbColor {
    type Err = String;

    /// Accepts `#rgb` and `#rrggbb` (the leading `#` is optional).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid colour '{s}': non-hex digit"));
        }
        let expanded: String = match hex.len() {
            3 => hex.chars().flat_map(|c| [c, c]).collect(),
            6 => hex.to_string(),
            _ => return Err(format!("invalid colour '{s}': expected #rgb or #rrggbb")),
        };
        let channel = |i: usize| {
            u8::from_str_radix(&expanded[i..i + 2], 16)
                .map_err(|_| format!("invalid colour '{s}': non-hex digit"))
        };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl TryFrom<String> for RgbColor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RgbColor> for String {
    fn from(c: RgbColor) -> Self {
        c.to_string()
    }
}

impl fmt::Display for RgbColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Complete set of layout parameters for one rendered document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Stylesheet {
    pub page: PageStyle,
    pub body: BodyStyle,
    pub headings: HeadingStyle,
    pub link: LinkStyle,
    pub blockquote: BlockquoteStyle,
    pub code: CodeStyle,
    pub table: TableStyle,
    pub list: ListStyle,
    pub rule: RuleStyle,
}

/// Paper size and margins. Default: A4 with 20 mm margins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageStyle {
    pub width_mm: f32,
    pub height_mm: f32,
    pub margin_mm: f32,
}

impl Default for PageStyle {
    fn default() -> Self {
        Self {
            width_mm: 210.0,
            height_mm: 297.0,
            margin_mm: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyStyle {
    pub font_size_pt: f32,
    /// Multiple of `font_size_pt`.
    pub line_height: f32,
    pub color: RgbColor,
    /// Space after each paragraph.
    pub paragraph_spacing_pt: f32,
}

impl Default for BodyStyle {
    fn default() -> Self {
        Self {
            font_size_pt: 10.5,
            line_height: 1.7,
            color: RgbColor::new(0x2c, 0x3e, 0x50),
            paragraph_spacing_pt: 12.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadingStyle {
    /// Font sizes for `h1` … `h6`.
    pub sizes_pt: [f32; 6],
    pub line_height: f32,
    pub color: RgbColor,
    /// `h6` is rendered in a muted colour.
    pub h6_color: RgbColor,
    pub margin_top_pt: f32,
    pub margin_bottom_pt: f32,
    pub rule_color: RgbColor,
    /// Thickness of the rule under `h1`.
    pub h1_rule_pt: f32,
    /// Thickness of the rule under `h2`.
    pub h2_rule_pt: f32,
}

impl HeadingStyle {
    /// Font size for a heading level, clamping out-of-range levels.
    pub fn size_for(&self, level: u8) -> f32 {
        let idx = (level.clamp(1, 6) - 1) as usize;
        self.sizes_pt[idx]
    }

    pub fn color_for(&self, level: u8) -> RgbColor {
        if level >= 6 {
            self.h6_color
        } else {
            self.color
        }
    }
}

impl Default for HeadingStyle {
    fn default() -> Self {
        Self {
            sizes_pt: [24.0, 18.0, 15.0, 13.5, 12.0, 10.5],
            line_height: 1.3,
            color: RgbColor::new(0x1a, 0x1a, 0x1a),
            h6_color: RgbColor::new(0x55, 0x55, 0x55),
            margin_top_pt: 18.0,
            margin_bottom_pt: 9.0,
            rule_color: RgbColor::new(0xee, 0xee, 0xee),
            h1_rule_pt: 1.5,
            h2_rule_pt: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkStyle {
    pub color: RgbColor,
    /// Draw a thin rule under link text.
    pub underline: bool,
}

impl Default for LinkStyle {
    fn default() -> Self {
        Self {
            color: RgbColor::new(0x00, 0x7a, 0xcc),
            underline: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockquoteStyle {
    pub bar_color: RgbColor,
    pub bar_width_pt: f32,
    pub text_color: RgbColor,
    pub background: RgbColor,
    /// Gap between the bar and the quoted text.
    pub padding_pt: f32,
    /// Space above and below the quote.
    pub margin_pt: f32,
    pub italic: bool,
}

impl Default for BlockquoteStyle {
    fn default() -> Self {
        Self {
            bar_color: RgbColor::new(0x00, 0x7a, 0xcc),
            bar_width_pt: 3.0,
            text_color: RgbColor::new(0x55, 0x55, 0x55),
            background: RgbColor::new(0xf9, 0xf9, 0xf9),
            padding_pt: 12.0,
            margin_pt: 18.0,
            italic: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeStyle {
    pub background: RgbColor,
    pub color: RgbColor,
    /// Inline code size relative to the surrounding text.
    pub inline_scale: f32,
    pub block_font_size_pt: f32,
    pub block_line_height: f32,
    pub block_padding_pt: f32,
}

impl Default for CodeStyle {
    fn default() -> Self {
        Self {
            background: RgbColor::new(0xf4, 0xf4, 0xf4),
            color: RgbColor::new(0x2c, 0x3e, 0x50),
            inline_scale: 0.9,
            block_font_size_pt: 9.75,
            block_line_height: 1.6,
            block_padding_pt: 9.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableStyle {
    pub font_size_pt: f32,
    pub border_color: RgbColor,
    pub border_pt: f32,
    pub header_background: RgbColor,
    pub cell_padding_pt: f32,
    pub margin_pt: f32,
}

impl Default for TableStyle {
    fn default() -> Self {
        Self {
            font_size_pt: 10.5,
            border_color: RgbColor::new(0xdd, 0xdd, 0xdd),
            border_pt: 0.75,
            header_background: RgbColor::new(0xf2, 0xf2, 0xf2),
            cell_padding_pt: 6.0,
            margin_pt: 18.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListStyle {
    pub indent_pt: f32,
    pub item_spacing_pt: f32,
}

impl Default for ListStyle {
    fn default() -> Self {
        Self {
            indent_pt: 24.0,
            item_spacing_pt: 2.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleStyle {
    pub color: RgbColor,
    pub thickness_pt: f32,
    pub margin_pt: f32,
}

impl Default for RuleStyle {
    fn default() -> Self {
        Self {
            color: RgbColor::new(0xe0, 0xe0, 0xe0),
            thickness_pt: 0.75,
            margin_pt: 24.0,
        }
    }
}
