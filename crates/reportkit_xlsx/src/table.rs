//! Table region expansion: one template row becomes one row per record.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::conditional::{evaluate_conditionals, strip_conditionals};
use crate::conf::{C_TABLE_END_PREFIX, C_TABLE_START_PREFIX};
use crate::context::{DataContext, LayeredScope, LookupScope, SpecRecord};
use crate::error::{Result, TemplateError};
use crate::footer::relocate_footer;
use crate::sheet::SheetGrid;
use crate::spec::{
    EnumCellValue, SpecCell, SpecFillReport, SpecMergeRange, SpecTableExpandOptions,
    SpecTotalFormula,
};
use crate::token::{resolve_tokens, strip_none_literal, strip_tokens};
use crate::util::{coerce_numeric_text, derive_col_name};

static RE_TABLE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{TableStart:([^{}]+?)\}\}").expect("table marker regex is valid")
});

////////////////////////////////////////////////////////////////////////////////
// #region Markers

/// Build the `({{TableStart:name}}, {{TableEnd:name}})` tag pair.
pub fn derive_table_tags(name: &str) -> (String, String) {
    (
        format!("{{{{{C_TABLE_START_PREFIX}{name}}}}}"),
        format!("{{{{{C_TABLE_END_PREFIX}{name}}}}}"),
    )
}

/// First row (top-to-bottom, left-to-right) whose text contains `tag`.
pub fn locate_table_row(sheet: &SheetGrid, tag: &str) -> Option<usize> {
    sheet
        .iter_cells()
        .find(|(_, cell)| cell.value.as_str().is_some_and(|text| text.contains(tag)))
        .map(|(&(row, _), _)| row)
}

/// Index every table start marker by name in one scan; the first row wins.
pub fn locate_table_markers(sheet: &SheetGrid) -> BTreeMap<String, usize> {
    let mut dict_markers = BTreeMap::new();
    for (&(row, _), cell) in sheet.iter_cells() {
        let Some(text) = cell.value.as_str() else {
            continue;
        };
        for caps in RE_TABLE_START.captures_iter(text) {
            dict_markers.entry(caps[1].trim().to_string()).or_insert(row);
        }
    }
    dict_markers
}

/// Whether `row` holds any table marker.
pub fn is_table_marker_row(sheet: &SheetGrid, row: usize) -> bool {
    sheet.iter_row(row).any(|(_, cell)| {
        cell.value.as_str().is_some_and(|text| {
            text.contains(&format!("{{{{{C_TABLE_START_PREFIX}"))
                || text.contains(&format!("{{{{{C_TABLE_END_PREFIX}"))
        })
    })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Expansion

/// Expand the table whose template row carries `start_tag`.
///
/// Returns the template row index. A missing marker is a
/// [`TemplateError::TemplateStructure`] error. Keys absent from a record
/// resolve to empty; use [`expand_table_with_report`] to fall back to a
/// [`DataContext`].
pub fn expand_table(
    sheet: &mut SheetGrid,
    start_tag: &str,
    end_tag: &str,
    records: &[SpecRecord],
    options: &SpecTableExpandOptions,
) -> Result<usize> {
    let mut report = SpecFillReport::default();
    expand_table_with_report(
        sheet,
        start_tag,
        end_tag,
        records,
        &DataContext::default(),
        options,
        &mut report,
    )
}

/// [`expand_table`] that resolves each row against its record layered over
/// `fallback`, and records warnings and unresolved keys into `report`.
pub fn expand_table_with_report<S: LookupScope + ?Sized>(
    sheet: &mut SheetGrid,
    start_tag: &str,
    end_tag: &str,
    records: &[SpecRecord],
    fallback: &S,
    options: &SpecTableExpandOptions,
    report: &mut SpecFillReport,
) -> Result<usize> {
    if options.footer_offset == Some(0) {
        return Err(TemplateError::InvalidArgument(format!(
            "footer offset for {start_tag} must be at least 1"
        )));
    }
    let row_template = locate_table_row(sheet, start_tag).ok_or_else(|| {
        TemplateError::TemplateStructure {
            marker: start_tag.to_string(),
            sheet: sheet.name().to_string(),
        }
    })?;

    if records.is_empty() {
        clear_template_row(sheet, row_template, start_tag, end_tag);
        debug!(sheet = %sheet.name(), marker = %start_tag, row = row_template, "Empty table cleared");
        return Ok(row_template);
    }

    let n_rows_added = records.len() - 1;
    // capture
    let l_template_cells: Vec<(usize, SpecCell)> = sheet
        .iter_row(row_template)
        .map(|(col, cell)| (col, cell.clone()))
        .collect();
    let height_template = sheet.row_height(row_template);
    let l_merges_below: Vec<SpecMergeRange> = sheet
        .merges()
        .iter()
        .filter(|mr| mr.row_min > row_template)
        .copied()
        .collect();
    let l_merges_template: Vec<SpecMergeRange> = sheet
        .merges()
        .iter()
        .filter(|mr| mr.row_min == row_template && mr.row_max == row_template)
        .copied()
        .collect();

    if n_rows_added > 0 {
        for mr in &l_merges_below {
            sheet.unmerge(mr);
        }

        match options.footer_offset {
            Some(n_offset) => {
                relocate_footer(sheet, row_template, row_template + n_offset, n_rows_added)?;
            }
            None => sheet.insert_rows(row_template + 1, n_rows_added)?,
        }

        for idx in 1..=n_rows_added {
            let row = row_template + idx;
            for (col, cell) in &l_template_cells {
                sheet.insert_cell(row, *col, cell.clone());
            }
            if let Some(height) = height_template {
                sheet.set_row_height(row, height);
            }
            for mr in &l_merges_template {
                if let Err(err) = sheet.merge(mr.offset_rows(idx)) {
                    warn!(sheet = %sheet.name(), error = %err, "Skipping template row merge copy");
                    report.warn(format!("{err}"));
                }
            }
        }

        for mr in &l_merges_below {
            let range = mr.offset_rows(n_rows_added);
            if let Err(err) = sheet.merge(range) {
                warn!(sheet = %sheet.name(), error = %err, "Skipping conflicting merge after table expansion");
                report.warn(format!("{err}"));
            }
        }
    }

    for (idx, record) in records.iter().enumerate() {
        let l_keys_missing = bind_record_row(
            sheet,
            row_template + idx,
            start_tag,
            end_tag,
            &LayeredScope::new(record, fallback),
            options.if_strip_none_literal,
        );
        report.keys_missing.extend(l_keys_missing);
    }

    debug!(
        sheet = %sheet.name(),
        marker = %start_tag,
        row = row_template,
        n_records = records.len(),
        "Expanded table"
    );
    Ok(row_template)
}

fn clear_template_row(sheet: &mut SheetGrid, row: usize, start_tag: &str, end_tag: &str) {
    for col in sheet.cols_in_row(row) {
        let Some(text) = sheet.text(row, col) else {
            continue;
        };
        let c_clean = text.replace(start_tag, "").replace(end_tag, "");
        let c_clean = strip_tokens(&strip_conditionals(&c_clean));
        sheet.set_value(row, col, EnumCellValue::String(c_clean));
    }
}

/// Bind one record into one row: strip tags, evaluate conditionals, resolve
/// tokens, then coerce numeric-looking text. Returns unresolved keys.
///
/// `scope` is usually a [`LayeredScope`] of the record over the context.
pub fn bind_record_row<S: LookupScope + ?Sized>(
    sheet: &mut SheetGrid,
    row: usize,
    start_tag: &str,
    end_tag: &str,
    scope: &S,
    if_strip_none_literal: bool,
) -> Vec<String> {
    let mut l_keys_missing = Vec::new();
    for col in sheet.cols_in_row(row) {
        let Some(text) = sheet.text(row, col) else {
            continue;
        };
        let c_text = text.replace(start_tag, "").replace(end_tag, "");
        let c_text = evaluate_conditionals(&c_text, scope);
        let resolved = resolve_tokens(&c_text, scope);
        l_keys_missing.extend(resolved.keys_missing);
        let c_text = if if_strip_none_literal {
            strip_none_literal(&resolved.text)
        } else {
            resolved.text
        };
        sheet.set_value(row, col, coerce_numeric_text(&c_text).into_cell_value());
    }
    l_keys_missing
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TotalFormulas

/// Write aggregate formulas on labelled rows below an expanded table.
///
/// Data rows are `row_template .. row_template + max(n_records, 1)`. The label
/// row is the first row after them whose `label_col` text equals the label.
pub fn write_total_formulas(
    sheet: &mut SheetGrid,
    row_template: usize,
    n_records: usize,
    specs: &[SpecTotalFormula],
    report: &mut SpecFillReport,
) {
    let n_rows_data = n_records.max(1);
    let row_first = row_template;
    let row_last = row_template + n_rows_data - 1;
    let row_scan_end = sheet.max_row().unwrap_or(row_last);

    for spec in specs {
        let row_label = (row_last + 1..=row_scan_end).find(|&row| {
            sheet
                .value(row, spec.label_col)
                .to_text()
                .trim()
                == spec.label
        });
        let Some(row_label) = row_label else {
            warn!(sheet = %sheet.name(), label = %spec.label, "Totals label row not found");
            report.warn(format!("totals label `{}` not found below table", spec.label));
            continue;
        };

        let c_col = derive_col_name(spec.target_col);
        let c_formula = format!(
            "={}({c_col}{}:{c_col}{})",
            spec.function.name(),
            row_first + 1,
            row_last + 1
        );
        sheet.set_value(row_label, spec.target_col, EnumCellValue::Formula(c_formula));
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Tests


// #endregion
////////////////////////////////////////////////////////////////////////////////
