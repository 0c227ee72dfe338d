//! `reportkit_xlsx` v1:
//! Template-driven XLSX report kernel.
//!
//! Modules:
//! - `conf`        : constants and default presets
//! - `spec`        : specs/models/options and document plans
//! - `error`       : error types
//! - `util`        : pure helper functions (refs, numbers, dates, naming)
//! - `sheet`       : in-memory working copy of a workbook
//! - `reader`      : XLSX template loader
//! - `theme`       : theme and indexed color palettes
//! - `writer`      : rust_xlsxwriter-backed serializer
//! - `context`     : data context and record lists
//! - `token`       : placeholder resolution
//! - `conditional` : inline `{{#if}}` blocks
//! - `checkbox`    : checkbox block rendering
//! - `table`       : table region expansion and totals formulas
//! - `footer`      : footer relocation below tables
//! - `coalesce`    : identical-value merging and totals block
//! - `richtext`    : bold/HTML run segmentation
//! - `filler`      : document pipeline
pub mod checkbox;
pub mod coalesce;
pub mod conditional;
pub mod conf;
pub mod context;
pub mod error;
pub mod filler;
pub mod footer;
pub mod reader;
pub mod richtext;
pub mod sheet;
pub mod spec;
pub mod table;
pub mod theme;
pub mod token;
pub mod util;
pub mod writer;

pub use checkbox::{render_checkboxes, render_checkboxes_with_glyphs};
pub use coalesce::{adjust_row_height_for_merged_cell, merge_identical_cells, merge_totals_block};
pub use conditional::{EnumConditionOp, evaluate_conditionals, strip_conditionals};
pub use conf::{
    C_GLYPH_CHECKED, C_GLYPH_UNCHECKED, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX,
    derive_default_fill_options, derive_default_row_height_policy,
};
pub use context::{DataContext, EnumScalarValue, LayeredScope, LookupScope, SpecRecord};
pub use error::{Result, TemplateError, XlsxReadError};
pub use filler::{SpecDocumentRequest, TemplateFiller};
pub use footer::{FooterSnapshot, relocate_footer};
pub use reader::{read_workbook_from_bytes, read_workbook_from_path};
pub use richtext::{html_to_plain_text, segment_before_delimiter, segment_bold_target, segment_html};
pub use sheet::{SheetGrid, SpecWorkbook};
pub use spec::{
    EnumCellValue, EnumCoercedValue, EnumTotalFunction, SpecAmountWords, SpecBoldPrefixColumn,
    SpecBoldTargetColumn, SpecCell, SpecCellStyle, SpecCheckboxField, SpecCoalesceBinding,
    SpecCoalesceOptions, SpecDocumentOutput, SpecDocumentPlan, SpecFillOptions, SpecFillReport,
    SpecFont, SpecMergeRange, SpecRowHeightPolicy, SpecTableBinding, SpecTableExpandOptions,
    SpecTableReport, SpecTextRun, SpecTotalFormula,
};
pub use table::{
    derive_table_tags, expand_table, expand_table_with_report, locate_table_markers,
    locate_table_row, write_total_formulas,
};
pub use token::{SpecResolvedText, resolve_cell, resolve_tokens, strip_tokens};
pub use util::{coerce_numeric_text, derive_output_file_name, sanitize_file_name, spell_amount_usd};
pub use writer::{write_workbook_to_buffer, write_workbook_to_path};
