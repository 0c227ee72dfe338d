//! Shared template-engine specification models.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::conf::{C_GLYPH_CHECKED, C_GLYPH_UNCHECKED, derive_default_row_height_policy};
use crate::util::{derive_a1_range, format_number_plain};

////////////////////////////////////////////////////////////////////////////////
// #region CellStyleSpecification

/// Cell style record carried by every template cell.
///
/// Styles are plain values: copying a style deep-clones it, so two cells never
/// share one mutable record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecCellStyle {
    /// Font family name.
    pub font_name: Option<String>,
    /// Font size in points.
    pub font_size: Option<f64>,
    /// Bold style.
    pub bold: Option<bool>,
    /// Italic style.
    pub italic: Option<bool>,
    /// Single underline.
    pub underline: Option<bool>,
    /// Font color (`#RRGGBB`).
    pub font_color: Option<String>,

    /// Horizontal alignment.
    pub align: Option<String>,
    /// Vertical alignment.
    pub valign: Option<String>,
    /// Text wrap.
    pub text_wrap: Option<bool>,

    /// Top border style.
    pub top: Option<i64>,
    /// Bottom border style.
    pub bottom: Option<i64>,
    /// Left border style.
    pub left: Option<i64>,
    /// Right border style.
    pub right: Option<i64>,

    /// Custom number format code.
    pub num_format: Option<String>,
    /// Built-in number format index.
    pub num_format_index: Option<u8>,
    /// Background fill color (`#RRGGBB`).
    pub bg_color: Option<String>,
}

impl SpecCellStyle {
    /// Return a new style by overlaying `patch` onto `self`.
    pub fn with_(&self, patch: SpecCellStyle) -> SpecCellStyle {
        self.merge(&patch)
    }

    /// Merge two styles with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecCellStyle) -> SpecCellStyle {
        SpecCellStyle {
            font_name: other.font_name.clone().or_else(|| self.font_name.clone()),
            font_size: other.font_size.or(self.font_size),
            bold: other.bold.or(self.bold),
            italic: other.italic.or(self.italic),
            underline: other.underline.or(self.underline),
            font_color: other.font_color.clone().or_else(|| self.font_color.clone()),
            align: other.align.clone().or_else(|| self.align.clone()),
            valign: other.valign.clone().or_else(|| self.valign.clone()),
            text_wrap: other.text_wrap.or(self.text_wrap),
            top: other.top.or(self.top),
            bottom: other.bottom.or(self.bottom),
            left: other.left.or(self.left),
            right: other.right.or(self.right),
            num_format: other.num_format.clone().or_else(|| self.num_format.clone()),
            num_format_index: other.num_format_index.or(self.num_format_index),
            bg_color: other.bg_color.clone().or_else(|| self.bg_color.clone()),
        }
    }

    /// Font portion of the style, inherited by rich-text runs.
    pub fn font(&self) -> SpecFont {
        SpecFont {
            name: self.font_name.clone(),
            size: self.font_size,
            color: self.font_color.clone(),
        }
    }
}

/// Font attributes shared by every run of one rich-text cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecFont {
    /// Font family name.
    pub name: Option<String>,
    /// Font size in points.
    pub size: Option<f64>,
    /// Font color (`#RRGGBB`).
    pub color: Option<String>,
}

/// One styled run of a rich-text cell.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecTextRun {
    /// Run text.
    pub text: String,
    /// Bold flag.
    pub bold: bool,
    /// Inherited font.
    pub font: SpecFont,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellValueSpecification

/// Value held by one worksheet cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EnumCellValue {
    /// Missing/blank value.
    #[default]
    None,
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
    /// Formula text (leading `=` optional).
    Formula(String),
    /// Mixed-style text.
    RichText(Vec<SpecTextRun>),
}

impl EnumCellValue {
    /// Borrow text content of a plain string cell.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EnumCellValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the cell displays nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            EnumCellValue::None => true,
            EnumCellValue::String(s) => s.is_empty(),
            EnumCellValue::RichText(runs) => runs.iter().all(|run| run.text.is_empty()),
            _ => false,
        }
    }

    /// Stringify cell content for comparisons and length estimates.
    pub fn to_text(&self) -> String {
        match self {
            EnumCellValue::None => String::new(),
            EnumCellValue::String(s) => s.clone(),
            EnumCellValue::Number(n) => format_number_plain(*n),
            EnumCellValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            EnumCellValue::Formula(f) => {
                if f.starts_with('=') {
                    f.clone()
                } else {
                    format!("={f}")
                }
            }
            EnumCellValue::RichText(runs) => runs.iter().map(|run| run.text.as_str()).collect(),
        }
    }
}

/// Result of numeric coercion of bound table text.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCoercedValue {
    /// Kept as text (not numeric, or a protected leading-zero identifier).
    Text(String),
    /// Integral numeric value.
    Integer(i64),
    /// Fractional numeric value.
    Float(f64),
}

impl EnumCoercedValue {
    /// Convert into a cell value.
    pub fn into_cell_value(self) -> EnumCellValue {
        match self {
            EnumCoercedValue::Text(s) => EnumCellValue::String(s),
            EnumCoercedValue::Integer(n) => EnumCellValue::Number(n as f64),
            EnumCoercedValue::Float(n) => EnumCellValue::Number(n),
        }
    }
}

/// One cell of the in-memory working copy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecCell {
    /// Cell value.
    pub value: EnumCellValue,
    /// Cell style, `None` when the template cell is unstyled.
    pub style: Option<SpecCellStyle>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region MergeRangeSpecification

/// Rectangular merged region (zero-based, inclusive bounds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecMergeRange {
    /// First row.
    pub row_min: usize,
    /// Last row.
    pub row_max: usize,
    /// First column.
    pub col_min: usize,
    /// Last column.
    pub col_max: usize,
}

impl SpecMergeRange {
    /// Build a range, normalizing swapped bounds.
    pub fn new(row_a: usize, col_a: usize, row_b: usize, col_b: usize) -> Self {
        Self {
            row_min: row_a.min(row_b),
            row_max: row_a.max(row_b),
            col_min: col_a.min(col_b),
            col_max: col_a.max(col_b),
        }
    }

    /// Whether the range covers exactly one cell.
    pub fn is_single_cell(&self) -> bool {
        self.row_min == self.row_max && self.col_min == self.col_max
    }

    /// Whether `(row, col)` lies inside the range.
    pub fn contains(&self, row: usize, col: usize) -> bool {
        (self.row_min..=self.row_max).contains(&row) && (self.col_min..=self.col_max).contains(&col)
    }

    /// Whether two ranges share at least one cell.
    pub fn intersects(&self, other: &SpecMergeRange) -> bool {
        self.row_min <= other.row_max
            && other.row_min <= self.row_max
            && self.col_min <= other.col_max
            && other.col_min <= self.col_max
    }

    /// Same range shifted down by `n_rows`.
    pub fn offset_rows(&self, n_rows: usize) -> SpecMergeRange {
        SpecMergeRange {
            row_min: self.row_min + n_rows,
            row_max: self.row_max + n_rows,
            ..*self
        }
    }

    /// A1-style reference, e.g. `A1:C2`.
    pub fn to_a1(&self) -> String {
        derive_a1_range(self.row_min, self.col_min, self.row_max, self.col_max)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FillOptions

/// Row-height estimation policy used when merged cells hold wrapped text.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecRowHeightPolicy {
    /// Height per estimated text line (points).
    pub height_line_base: f64,
    /// Height used when the text fits one line (points).
    pub height_single_line: f64,
    /// Padding added on top of the estimate (points).
    pub height_padding: f64,
    /// Height assumed for rows without an explicit height (points).
    pub height_row_default: f64,
    /// Width assumed for columns without an explicit width (characters).
    pub width_col_default: f64,
    /// Characters per unit of column width.
    pub ratio_chars_per_width: f64,
    /// Below this many characters per line the column width is ignored.
    pub n_chars_per_line_min: usize,
}

impl Default for SpecRowHeightPolicy {
    fn default() -> Self {
        Self {
            height_line_base: 25.0,
            height_single_line: 30.0,
            height_padding: 10.0,
            height_row_default: 15.0,
            width_col_default: 30.0,
            ratio_chars_per_width: 1.2,
            n_chars_per_line_min: 10,
        }
    }
}

/// Options of one table expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecTableExpandOptions {
    /// Rows between the template row and the start of the static footer.
    ///
    /// When set, row insertion goes through footer relocation.
    pub footer_offset: Option<usize>,
    /// Strip literal `None` from bound cell text.
    pub if_strip_none_literal: bool,
}

impl Default for SpecTableExpandOptions {
    fn default() -> Self {
        Self {
            footer_offset: None,
            if_strip_none_literal: true,
        }
    }
}

/// Merge-coalescing options for one table column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecCoalesceOptions {
    /// Columns merged over the same runs as the key column.
    pub cols_companion: Vec<usize>,
    /// Row-height estimation policy.
    pub policy_row_height: SpecRowHeightPolicy,
}

/// Filler-wide options.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecFillOptions {
    /// Glyph of a checked option.
    pub glyph_checked: String,
    /// Glyph of an unchecked option.
    pub glyph_unchecked: String,
    /// Strip literal `None` from resolved cell text.
    pub if_strip_none_literal: bool,
    /// Row-height estimation policy.
    pub policy_row_height: SpecRowHeightPolicy,
}

impl Default for SpecFillOptions {
    fn default() -> Self {
        Self {
            glyph_checked: C_GLYPH_CHECKED.to_string(),
            glyph_unchecked: C_GLYPH_UNCHECKED.to_string(),
            if_strip_none_literal: true,
            policy_row_height: derive_default_row_height_policy(),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region DocumentPlan

/// Aggregate function written into a totals row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumTotalFunction {
    /// `SUM` over the generated rows.
    #[default]
    Sum,
    /// `COUNTA` over the generated rows.
    Counta,
}

impl EnumTotalFunction {
    /// Spreadsheet function name.
    pub fn name(&self) -> &'static str {
        match self {
            EnumTotalFunction::Sum => "SUM",
            EnumTotalFunction::Counta => "COUNTA",
        }
    }
}

/// Totals formula anchored on a labelled row below a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecTotalFormula {
    /// Column holding the row label.
    pub label_col: usize,
    /// Exact label text (e.g. `Total`).
    pub label: String,
    /// Column receiving the formula and aggregated over the table rows.
    pub target_col: usize,
    /// Aggregate function.
    #[serde(default)]
    pub function: EnumTotalFunction,
}

/// Placeholder rendered as a checkbox block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecCheckboxField {
    /// Data-context key of the selected value (`{{key}}` in the template).
    pub key: String,
    /// Ordered option labels.
    pub options: Vec<String>,
    /// Uppercase option labels.
    pub uppercase: bool,
}

/// Column whose text before a delimiter is rendered bold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecBoldPrefixColumn {
    /// Target column.
    pub col: usize,
    /// Delimiter character.
    #[serde(default = "derive_default_delimiter")]
    pub delimiter: char,
}

fn derive_default_delimiter() -> char {
    '-'
}

/// Column whose text is bolded where it contains a record field's name prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecBoldTargetColumn {
    /// Target column.
    pub col: usize,
    /// Record key holding the name whose leading text is bolded.
    pub key: String,
}

/// Merge-coalescing settings of one table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecCoalesceBinding {
    /// Key column compared row by row.
    pub col: usize,
    /// Columns merged along with the key column.
    pub cols_companion: Vec<usize>,
}

/// Binding between a table marker and a record list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecTableBinding {
    /// Marker name (`{{TableStart:<name>}}`).
    pub name: String,
    /// Record list key; defaults to `name`.
    pub records_key: Option<String>,
    /// Fail the document when the marker is absent.
    #[serde(default = "derive_default_true")]
    pub if_required: bool,
    /// Rows between the template row and the static footer.
    pub footer_offset: Option<usize>,
    /// Merge identical consecutive values.
    pub coalesce: Option<SpecCoalesceBinding>,
    /// Columns rendered bold before a delimiter.
    pub cols_bold_prefix: Vec<SpecBoldPrefixColumn>,
    /// Columns bolded on a record name prefix.
    pub cols_bold_target: Vec<SpecBoldTargetColumn>,
    /// Columns holding HTML-sourced rich text.
    pub cols_html: Vec<usize>,
    /// Columns holding HTML flattened to plain multi-line text.
    pub cols_html_plain: Vec<usize>,
    /// Totals formulas below the table.
    pub total_formulas: Vec<SpecTotalFormula>,
}

fn derive_default_true() -> bool {
    true
}

impl SpecTableBinding {
    /// Record list key used to look up rows.
    pub fn records_key(&self) -> &str {
        self.records_key.as_deref().unwrap_or(&self.name)
    }
}

/// Amount spelled out in words when the target field is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecAmountWords {
    /// Numeric source key.
    pub source_key: String,
    /// Text target key.
    pub target_key: String,
}

/// Per-document-type generation plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecDocumentPlan {
    /// Output file name prefix (e.g. `PI_NoDiscount_`).
    pub doc_prefix: String,
    /// Business identifier embedded in the output file name.
    pub entity_id: String,
    /// Sheet to fill; the active sheet when `None`.
    pub sheet_name: Option<String>,
    /// Placeholders rendered as checkbox blocks.
    pub checkbox_fields: Vec<SpecCheckboxField>,
    /// Table bindings, processed in order.
    pub tables: Vec<SpecTableBinding>,
    /// Column span merged across the Subtotal..Total block.
    pub totals_block_cols: Option<(usize, usize)>,
    /// Amounts spelled out in words.
    pub amount_words: Vec<SpecAmountWords>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportSpecification

/// Outcome of one table expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecTableReport {
    /// Marker name.
    pub name: String,
    /// Template row index.
    pub row_template: usize,
    /// Bound record count.
    pub n_records: usize,
    /// Runs merged by coalescing.
    pub n_runs_merged: usize,
}

/// Per-document fill report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecFillReport {
    /// Filled sheet name.
    pub sheet_name: String,
    /// Expanded tables.
    pub tables: Vec<SpecTableReport>,
    /// Placeholder keys that did not resolve.
    pub keys_missing: BTreeSet<String>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecFillReport {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.warnings.push(msg.as_ref().to_string());
    }
}

/// Finished document handed to the uploader collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecDocumentOutput {
    /// Final output path.
    pub path_file: PathBuf,
    /// Output file name.
    pub file_name: String,
    /// Fill report.
    pub report: SpecFillReport,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
