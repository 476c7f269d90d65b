//! Simplified style configuration and its mapping onto WordprocessingML units.

use serde::Deserialize;
use tracing::warn;

pub const TWIPS_PER_INCH: f64 = 1440.0;
pub const TWIPS_PER_POINT: f64 = 20.0;
pub const LINE_UNITS_PER_MULTIPLE: f64 = 240.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

impl Alignment {
    /// Value of `w:jc`.
    pub fn as_ooxml(self) -> &'static str {
        match self {
            Alignment::Left => "left",
            Alignment::Center => "center",
            Alignment::Right => "right",
            Alignment::Justify => "both",
        }
    }
}

/// User-facing attributes of one paragraph style. Sizes and spacing are in points.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StyleBlock {
    pub font: Option<String>,
    pub size: Option<f64>,
    pub color: Option<String>,
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub alignment: Option<Alignment>,
    pub spacing_before: Option<f64>,
    pub spacing_after: Option<f64>,
    /// Line spacing as a multiple of single spacing.
    pub line_spacing: Option<f64>,
}

/// Page margins in inches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Margins {
    pub top: Option<f64>,
    pub right: Option<f64>,
    pub bottom: Option<f64>,
    pub left: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StyleConfig {
    pub paragraph: Option<StyleBlock>,
    pub heading1: Option<StyleBlock>,
    pub heading2: Option<StyleBlock>,
    pub heading3: Option<StyleBlock>,
    pub heading4: Option<StyleBlock>,
    pub margins: Option<Margins>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
}

impl StyleConfig {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_margins(mut self, margins: Margins) -> Self {
        self.margins = Some(margins);
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct ThemeStyle {
    font: &'static str,
    size: f64,
    color: &'static str,
    bold: bool,
    italic: bool,
    spacing_before: f64,
    spacing_after: f64,
    line_spacing: f64,
}

pub const BODY_FONT: &str = "Calibri";
pub const HEADING_FONT: &str = "Calibri Light";
pub const HEADING_COLOR: &str = "2F5496";

const BODY: ThemeStyle = ThemeStyle {
    font: BODY_FONT,
    size: 11.0,
    color: "000000",
    bold: false,
    italic: false,
    spacing_before: 0.0,
    spacing_after: 8.0,
    line_spacing: 1.08,
};

const fn heading(size: f64, before: f64, after: f64, italic: bool) -> ThemeStyle {
    ThemeStyle {
        font: HEADING_FONT,
        size,
        color: HEADING_COLOR,
        bold: false,
        italic,
        spacing_before: before,
        spacing_after: after,
        line_spacing: 1.0,
    }
}

const HEADINGS: [ThemeStyle; 4] = [
    heading(20.0, 12.0, 6.0, false),
    heading(16.0, 10.0, 4.0, false),
    heading(14.0, 8.0, 4.0, false),
    heading(12.0, 6.0, 2.0, true),
];

/// A paragraph style in the units `styles.xml` expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStyle {
    pub font: String,
    /// Half-points.
    pub size: u32,
    /// `RRGGBB`, upper-case, no `#`.
    pub color: String,
    pub bold: bool,
    pub italic: bool,
    pub alignment: Alignment,
    /// Twips.
    pub spacing_before: u32,
    /// Twips.
    pub spacing_after: u32,
    /// 240ths of a line.
    pub line: u32,
}

/// Page margins in twips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMargins {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocxProps {
    pub paragraph: ResolvedStyle,
    /// Heading 1..6; 5 and 6 are copies of 4.
    pub headings: [ResolvedStyle; 6],
    pub margins: PageMargins,
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
}

impl DocxProps {
    /// `level` is 1-based and clamped into 1..=6.
    pub fn heading(&self, level: u8) -> &ResolvedStyle {
        let idx = usize::from(level.clamp(1, 6)) - 1;
        &self.headings[idx]
    }
}

impl Default for DocxProps {
    fn default() -> Self {
        build_docx_props(&StyleConfig::default())
    }
}

pub fn half_points(pt: f64) -> u32 {
    (pt.max(0.0) * 2.0).round() as u32
}

pub fn points_to_twips(pt: f64) -> u32 {
    (pt.max(0.0) * TWIPS_PER_POINT).round() as u32
}

pub fn inches_to_twips(inches: f64) -> u32 {
    (inches.max(0.0) * TWIPS_PER_INCH).round() as u32
}

fn line_units(multiple: f64) -> u32 {
    (multiple.max(0.0) * LINE_UNITS_PER_MULTIPLE).round() as u32
}

fn normalize_color(raw: &str) -> Option<String> {
    let hex = raw.trim().trim_start_matches('#');
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex.to_ascii_uppercase())
    } else {
        None
    }
}

fn resolve(user: Option<&StyleBlock>, base: ThemeStyle) -> ResolvedStyle {
    let empty = StyleBlock::default();
    let user = user.unwrap_or(&empty);

    let color = match user.color.as_deref() {
        Some(raw) => normalize_color(raw).unwrap_or_else(|| {
            warn!(color = raw, "ignoring malformed style color");
            base.color.to_string()
        }),
        None => base.color.to_string(),
    };

    ResolvedStyle {
        font: user.font.clone().unwrap_or_else(|| base.font.to_string()),
        size: half_points(user.size.unwrap_or(base.size)),
        color,
        bold: user.bold.unwrap_or(base.bold),
        italic: user.italic.unwrap_or(base.italic),
        alignment: user.alignment.unwrap_or_default(),
        spacing_before: points_to_twips(user.spacing_before.unwrap_or(base.spacing_before)),
        spacing_after: points_to_twips(user.spacing_after.unwrap_or(base.spacing_after)),
        line: line_units(user.line_spacing.unwrap_or(base.line_spacing)),
    }
}

/// Resolves a style configuration against the built-in theme.
pub fn build_docx_props(config: &StyleConfig) -> DocxProps {
    let paragraph = resolve(config.paragraph.as_ref(), BODY);
    let h1 = resolve(config.heading1.as_ref(), HEADINGS[0]);
    let h2 = resolve(config.heading2.as_ref(), HEADINGS[1]);
    let h3 = resolve(config.heading3.as_ref(), HEADINGS[2]);
    let h4 = resolve(config.heading4.as_ref(), HEADINGS[3]);

    let m = config.margins.unwrap_or_default();
    let margins = PageMargins {
        top: inches_to_twips(m.top.unwrap_or(1.0)),
        right: inches_to_twips(m.right.unwrap_or(1.0)),
        bottom: inches_to_twips(m.bottom.unwrap_or(1.0)),
        left: inches_to_twips(m.left.unwrap_or(1.0)),
    };

    DocxProps {
        paragraph,
        headings: [h1, h2, h3, h4.clone(), h4.clone(), h4],
        margins,
        title: config.title.clone(),
        author: config.author.clone(),
        description: config.description.clone(),
    }
}
