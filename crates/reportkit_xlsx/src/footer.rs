//! Footer relocation below a variable-length table.
//!
//! Every non-empty cell, explicit row height and wholly-contained merge at or
//! below the footer start is captured as an offset snapshot, detached, and
//! replayed below the inserted rows.

use tracing::debug;

use crate::error::{Result, TemplateError};
use crate::sheet::SheetGrid;
use crate::spec::{EnumCellValue, SpecCellStyle, SpecMergeRange};

/// Footer cell captured relative to the footer start row.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecFooterCell {
    /// Rows below the footer start.
    pub row_offset: usize,
    /// Column index.
    pub col: usize,
    /// Captured value.
    pub value: EnumCellValue,
    /// Captured style (deep copy).
    pub style: Option<SpecCellStyle>,
}

/// Offset snapshot of the static content below a table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FooterSnapshot {
    /// Footer start row at capture time.
    pub row_start: usize,
    /// Non-empty cells.
    pub cells: Vec<SpecFooterCell>,
    /// Explicit row heights as `(row offset, height)`.
    pub heights: Vec<(usize, f64)>,
    /// Merges wholly inside the footer zone, rows stored as offsets.
    pub merges: Vec<SpecMergeRange>,
}

impl FooterSnapshot {
    /// Capture the footer zone starting at `row_start`.
    pub fn capture(sheet: &SheetGrid, row_start: usize) -> Self {
        let cells = sheet
            .iter_cells()
            .filter(|&(&(row, _), cell)| row >= row_start && !cell.value.is_empty())
            .map(|(&(row, col), cell)| SpecFooterCell {
                row_offset: row - row_start,
                col,
                value: cell.value.clone(),
                style: cell.style.clone(),
            })
            .collect();
        let heights = sheet
            .row_heights()
            .range(row_start..)
            .map(|(&row, &height)| (row - row_start, height))
            .collect();
        let merges = sheet
            .merges()
            .iter()
            .filter(|mr| mr.row_min >= row_start)
            .map(|mr| SpecMergeRange {
                row_min: mr.row_min - row_start,
                row_max: mr.row_max - row_start,
                ..*mr
            })
            .collect();
        Self {
            row_start,
            cells,
            heights,
            merges,
        }
    }

    /// Remove the captured content from the sheet.
    ///
    /// Style-only cells stay in place and move with row insertion.
    pub fn detach(&self, sheet: &mut SheetGrid) {
        for cell in &self.cells {
            sheet.take_cell(self.row_start + cell.row_offset, cell.col);
        }
        for (row_offset, _) in &self.heights {
            sheet.clear_row_height(self.row_start + row_offset);
        }
        for mr in &self.merges {
            sheet.unmerge(&mr.offset_rows(self.row_start));
        }
    }

    /// Replay the snapshot with its first row at `row_start_new`.
    ///
    /// Whatever merge intersects a replayed merge is removed first.
    pub fn restore(&self, sheet: &mut SheetGrid, row_start_new: usize) -> Result<()> {
        for mr in &self.merges {
            let range = mr.offset_rows(row_start_new);
            let l_removed = sheet.unmerge_intersecting(&range);
            if !l_removed.is_empty() {
                debug!(
                    sheet = %sheet.name(),
                    merge = %range.to_a1(),
                    n_removed = l_removed.len(),
                    "Cleared merges overlapping relocated footer merge"
                );
            }
            sheet.merge(range)?;
        }
        for cell in &self.cells {
            let row = row_start_new + cell.row_offset;
            let dst = sheet.cell_mut(row, cell.col);
            dst.value = cell.value.clone();
            dst.style = cell.style.clone();
        }
        for &(row_offset, height) in &self.heights {
            sheet.set_row_height(row_start_new + row_offset, height);
        }
        Ok(())
    }
}

/// Insert `n_rows_inserted` rows after `table_start` while keeping the footer
/// that starts at `footer_start_original` intact. Returns the new footer start.
pub fn relocate_footer(
    sheet: &mut SheetGrid,
    table_start: usize,
    footer_start_original: usize,
    n_rows_inserted: usize,
) -> Result<usize> {
    if footer_start_original <= table_start {
        return Err(TemplateError::InvalidArgument(format!(
            "footer start {footer_start_original} must lie below table row {table_start}"
        )));
    }
    let snapshot = FooterSnapshot::capture(sheet, footer_start_original);
    snapshot.detach(sheet);
    sheet.insert_rows(table_start + 1, n_rows_inserted)?;

    let row_start_new = footer_start_original + n_rows_inserted;
    snapshot.restore(sheet, row_start_new)?;
    debug!(
        sheet = %sheet.name(),
        footer_start_original,
        row_start_new,
        n_cells = snapshot.cells.len(),
        "Relocated footer"
    );
    Ok(row_start_new)
}
