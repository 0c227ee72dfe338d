//! Vertical merging of identical consecutive values in a table column.

use tracing::{debug, warn};

use crate::conf::{
    N_COL_TOTALS_SCAN_END, N_COL_TOTALS_SCAN_MIN, TUP_SUBTOTAL_KEYWORDS, TUP_TOTAL_KEYWORDS,
};
use crate::sheet::SheetGrid;
use crate::spec::{SpecCellStyle, SpecCoalesceOptions, SpecMergeRange, SpecRowHeightPolicy};
use crate::util::{derive_required_height, estimate_line_count};

////////////////////////////////////////////////////////////////////////////////
// #region Coalesce

fn derive_key_patch() -> SpecCellStyle {
    SpecCellStyle {
        align: Some("left".to_string()),
        valign: Some("vcenter".to_string()),
        text_wrap: Some(true),
        ..SpecCellStyle::default()
    }
}

fn derive_companion_patch() -> SpecCellStyle {
    SpecCellStyle {
        align: Some("center".to_string()),
        valign: Some("vcenter".to_string()),
        ..SpecCellStyle::default()
    }
}

/// Merge runs of identical consecutive values in `col` over
/// `start_row .. start_row + count`.
///
/// Comparison is exact on stringified content; blank cells never start a run.
/// Each run of two or more rows is merged, left/vcenter aligned with wrap, and
/// its rows grow when the merged text needs more height than they offer.
/// Returns the merged key-column ranges.
pub fn merge_identical_cells(
    sheet: &mut SheetGrid,
    start_row: usize,
    count: usize,
    col: usize,
    options: &SpecCoalesceOptions,
) -> Vec<SpecMergeRange> {
    let l_values: Vec<String> = (start_row..start_row + count)
        .map(|row| sheet.value(row, col).to_text())
        .collect();

    let mut l_runs: Vec<(usize, usize)> = Vec::new();
    let mut idx = 0;
    while idx < l_values.len() {
        let mut idx_end = idx;
        while idx_end + 1 < l_values.len() && l_values[idx_end + 1] == l_values[idx] {
            idx_end += 1;
        }
        if idx_end > idx && !l_values[idx].trim().is_empty() {
            l_runs.push((start_row + idx, start_row + idx_end));
        }
        idx = idx_end + 1;
    }

    let mut l_merged = Vec::with_capacity(l_runs.len());
    for (row_min, row_max) in l_runs {
        let range = SpecMergeRange::new(row_min, col, row_max, col);
        if let Err(err) = sheet.merge(range) {
            warn!(sheet = %sheet.name(), error = %err, "Skipping coalesce run");
            continue;
        }
        sheet.patch_style(row_min, col, derive_key_patch());

        for &col_companion in &options.cols_companion {
            let range_companion = SpecMergeRange::new(row_min, col_companion, row_max, col_companion);
            match sheet.merge(range_companion) {
                Ok(()) => sheet.patch_style(row_min, col_companion, derive_companion_patch()),
                Err(err) => {
                    warn!(sheet = %sheet.name(), error = %err, "Skipping companion coalesce run");
                }
            }
        }

        adjust_row_height_for_merged_cell(sheet, &range, &options.policy_row_height);
        l_merged.push(range);
    }

    debug!(
        sheet = %sheet.name(),
        col,
        start_row,
        count,
        n_runs = l_merged.len(),
        "Coalesced identical cells"
    );
    l_merged
}

/// Grow the rows of a merged range so its anchor text fits.
///
/// The deficit between the required height and the current total (rows
/// without an explicit height count as the policy default) is spread evenly.
pub fn adjust_row_height_for_merged_cell(
    sheet: &mut SheetGrid,
    range: &SpecMergeRange,
    policy: &SpecRowHeightPolicy,
) {
    let c_text = sheet.value(range.row_min, range.col_min).to_text();
    let width_col = sheet.col_width(range.col_min);
    let n_lines = estimate_line_count(&c_text, width_col, policy);
    let height_required = derive_required_height(n_lines, policy);

    let height_total: f64 = (range.row_min..=range.row_max)
        .map(|row| sheet.row_height(row).unwrap_or(policy.height_row_default))
        .sum();
    if height_total >= height_required {
        return;
    }

    let n_rows = (range.row_max - range.row_min + 1) as f64;
    let height_extra = (height_required - height_total) / n_rows;
    for row in range.row_min..=range.row_max {
        let height = sheet.row_height(row).unwrap_or(policy.height_row_default);
        sheet.set_row_height(row, height + height_extra);
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TotalsBlock

/// Upper-cased label text of the scanned columns, concatenated without a
/// separator (`Sub` + `total` reads as `SUBTOTAL`).
fn derive_row_text_upper(sheet: &SheetGrid, row: usize) -> String {
    sheet
        .iter_row(row)
        .filter(|(col, _)| (N_COL_TOTALS_SCAN_MIN..N_COL_TOTALS_SCAN_END).contains(col))
        .map(|(_, cell)| cell.value.to_text().to_uppercase())
        .collect()
}

fn is_total_row(c_upper: &str) -> bool {
    (c_upper.contains("TOTAL") && !c_upper.contains("SUB"))
        || TUP_TOTAL_KEYWORDS.iter().any(|kw| c_upper.contains(kw))
}

/// Merge the Subtotal..Total block over `col_min ..= col_max`.
///
/// The block starts at the first row whose first columns mention a subtotal
/// keyword and ends at the last later row mentioning a total. Rows
/// `[subtotal, total - 1]` become one merge and the total row another.
/// Keyword matching is a heuristic on label text; `None` means no block.
pub fn merge_totals_block(
    sheet: &mut SheetGrid,
    col_min: usize,
    col_max: usize,
) -> Option<(SpecMergeRange, SpecMergeRange)> {
    let row_max = sheet.max_row()?;
    let row_subtotal = (0..=row_max).find(|&row| {
        let c_upper = derive_row_text_upper(sheet, row);
        TUP_SUBTOTAL_KEYWORDS.iter().any(|kw| c_upper.contains(kw))
    })?;
    let row_total = (row_subtotal + 1..=row_max)
        .rev()
        .find(|&row| is_total_row(&derive_row_text_upper(sheet, row)))?;

    let range_body = SpecMergeRange::new(row_subtotal, col_min, row_total - 1, col_max);
    let range_total = SpecMergeRange::new(row_total, col_min, row_total, col_max);
    for range in [&range_body, &range_total] {
        sheet.unmerge_intersecting(range);
    }
    for range in [range_body, range_total] {
        if let Err(err) = sheet.merge(range) {
            warn!(sheet = %sheet.name(), error = %err, "Skipping totals block merge");
        }
    }
    debug!(
        sheet = %sheet.name(),
        row_subtotal,
        row_total,
        "Merged totals block"
    );
    Some((range_body, range_total))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Tests


// #endregion
////////////////////////////////////////////////////////////////////////////////
