//! Template-engine constants and default preset factories.

use crate::spec::{SpecFillOptions, SpecRowHeightPolicy};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Widest `<col min max>` span expanded into per-column widths when loading templates.
pub const N_NCOLS_TEMPLATE_WIDTH_MAX: usize = 1_024;

/// Glyph marking the selected option of a checkbox block.
pub const C_GLYPH_CHECKED: &str = "\u{2611}";
/// Glyph marking an unselected option of a checkbox block.
pub const C_GLYPH_UNCHECKED: &str = "\u{2610}";

/// Prefix of the table start sentinel (`{{TableStart:<Name>}}`).
pub const C_TABLE_START_PREFIX: &str = "TableStart:";
/// Prefix of the table end sentinel (`{{TableEnd:<Name>}}`).
pub const C_TABLE_END_PREFIX: &str = "TableEnd:";

/// Literal left behind by upstream null stringification.
pub const C_NONE_LITERAL: &str = "None";

/// Characters replaced in output file names.
pub const TUP_FILE_NAME_ILLEGAL: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
/// File name used when the business identifier is blank.
pub const C_FILE_NAME_FALLBACK: &str = "Unknown";
/// Output file extension.
pub const C_FILE_EXTENSION: &str = "xlsx";

/// First column scanned by the Subtotal/Total keyword heuristic (column B).
pub const N_COL_TOTALS_SCAN_MIN: usize = 1;
/// Exclusive end of the same scan.
pub const N_COL_TOTALS_SCAN_END: usize = 15;
/// Keywords opening the totals block (upper-case).
pub const TUP_SUBTOTAL_KEYWORDS: [&str; 3] = ["SUBTOTAL", "SUB TOTAL", "SUB-TOTAL"];
/// Keywords closing the totals block (upper-case).
pub const TUP_TOTAL_KEYWORDS: [&str; 2] = ["T\u{1ed4}NG C\u{1ed8}NG", "GRAND TOTAL"];

/// Build default row-height estimation policy used by merge coalescing.
pub fn derive_default_row_height_policy() -> SpecRowHeightPolicy {
    SpecRowHeightPolicy::default()
}

/// Build default filler options.
pub fn derive_default_fill_options() -> SpecFillOptions {
    SpecFillOptions::default()
}
