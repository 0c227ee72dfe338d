//! In-memory working copy of a template workbook.
//!
//! All template mutation (placeholder binding, row insertion, merge edits)
//! happens on these grids; the on-disk template is never touched.

use std::collections::BTreeMap;

use tracing::debug;

use crate::conf::N_NROWS_EXCEL_MAX;
use crate::error::{Result, TemplateError};
use crate::spec::{EnumCellValue, SpecCell, SpecCellStyle, SpecMergeRange};

static CELL_VALUE_NONE: EnumCellValue = EnumCellValue::None;

////////////////////////////////////////////////////////////////////////////////
// #region SheetGrid

/// Sparse worksheet grid keyed by zero-based `(row, col)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetGrid {
    name: String,
    dict_cells: BTreeMap<(usize, usize), SpecCell>,
    dict_row_heights: BTreeMap<usize, f64>,
    dict_col_widths: BTreeMap<usize, f64>,
    l_merges: Vec<SpecMergeRange>,
}

impl SheetGrid {
    /// Create an empty sheet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sheet name.
    pub fn name(&self) -> &str {
        &self.name
    }

    // Cells

    /// Borrow a cell.
    pub fn cell(&self, row: usize, col: usize) -> Option<&SpecCell> {
        self.dict_cells.get(&(row, col))
    }

    /// Borrow a cell mutably, creating a blank one when absent.
    pub fn cell_mut(&mut self, row: usize, col: usize) -> &mut SpecCell {
        self.dict_cells.entry((row, col)).or_default()
    }

    /// Cell value, `None` for absent cells.
    pub fn value(&self, row: usize, col: usize) -> &EnumCellValue {
        self.cell(row, col)
            .map(|cell| &cell.value)
            .unwrap_or(&CELL_VALUE_NONE)
    }

    /// Text of a plain string cell.
    pub fn text(&self, row: usize, col: usize) -> Option<&str> {
        self.value(row, col).as_str()
    }

    /// Cell style.
    pub fn style(&self, row: usize, col: usize) -> Option<&SpecCellStyle> {
        self.cell(row, col).and_then(|cell| cell.style.as_ref())
    }

    /// Overwrite a cell value, keeping its style.
    pub fn set_value(&mut self, row: usize, col: usize, value: EnumCellValue) {
        self.cell_mut(row, col).value = value;
    }

    /// Overwrite a cell style, keeping its value.
    pub fn set_style(&mut self, row: usize, col: usize, style: Option<SpecCellStyle>) {
        self.cell_mut(row, col).style = style;
    }

    /// Patch a cell style field by field (absent style starts from default).
    pub fn patch_style(&mut self, row: usize, col: usize, patch: SpecCellStyle) {
        let cell = self.cell_mut(row, col);
        let base = cell.style.clone().unwrap_or_default();
        cell.style = Some(base.with_(patch));
    }

    /// Replace a whole cell.
    pub fn insert_cell(&mut self, row: usize, col: usize, cell: SpecCell) {
        self.dict_cells.insert((row, col), cell);
    }

    /// Remove and return a cell.
    pub fn take_cell(&mut self, row: usize, col: usize) -> Option<SpecCell> {
        self.dict_cells.remove(&(row, col))
    }

    /// Iterate all stored cells in row-major order.
    pub fn iter_cells(&self) -> impl Iterator<Item = (&(usize, usize), &SpecCell)> {
        self.dict_cells.iter()
    }

    /// Iterate the stored cells of one row, left to right.
    pub fn iter_row(&self, row: usize) -> impl Iterator<Item = (usize, &SpecCell)> {
        self.dict_cells
            .range((row, 0)..=(row, usize::MAX))
            .map(|(&(_, col), cell)| (col, cell))
    }

    /// Stored column indices of one row.
    pub fn cols_in_row(&self, row: usize) -> Vec<usize> {
        self.iter_row(row).map(|(col, _)| col).collect()
    }

    /// Last row holding a stored cell.
    pub fn max_row(&self) -> Option<usize> {
        self.dict_cells.keys().next_back().map(|&(row, _)| row)
    }

    // Dimensions

    /// Explicit row height (points).
    pub fn row_height(&self, row: usize) -> Option<f64> {
        self.dict_row_heights.get(&row).copied()
    }

    /// Set an explicit row height.
    pub fn set_row_height(&mut self, row: usize, height: f64) {
        self.dict_row_heights.insert(row, height);
    }

    /// Drop an explicit row height.
    pub fn clear_row_height(&mut self, row: usize) -> Option<f64> {
        self.dict_row_heights.remove(&row)
    }

    /// All explicit row heights.
    pub fn row_heights(&self) -> &BTreeMap<usize, f64> {
        &self.dict_row_heights
    }

    /// Explicit column width (characters).
    pub fn col_width(&self, col: usize) -> Option<f64> {
        self.dict_col_widths.get(&col).copied()
    }

    /// Set an explicit column width.
    pub fn set_col_width(&mut self, col: usize, width: f64) {
        self.dict_col_widths.insert(col, width);
    }

    /// All explicit column widths.
    pub fn col_widths(&self) -> &BTreeMap<usize, f64> {
        &self.dict_col_widths
    }

    // Merges

    /// Current merged ranges.
    pub fn merges(&self) -> &[SpecMergeRange] {
        &self.l_merges
    }

    /// Merged range covering `(row, col)`.
    pub fn merge_at(&self, row: usize, col: usize) -> Option<&SpecMergeRange> {
        self.l_merges.iter().find(|mr| mr.contains(row, col))
    }

    /// Register a merged range.
    ///
    /// Single-cell ranges are ignored; a range overlapping an existing merge is
    /// rejected with [`TemplateError::MergeConflict`] and the sheet is unchanged.
    pub fn merge(&mut self, range: SpecMergeRange) -> Result<()> {
        if range.is_single_cell() {
            return Ok(());
        }
        if let Some(existing) = self.l_merges.iter().find(|mr| mr.intersects(&range)) {
            if *existing == range {
                return Ok(());
            }
            return Err(TemplateError::MergeConflict {
                range,
                existing: *existing,
            });
        }
        self.l_merges.push(range);
        Ok(())
    }

    /// Remove an exact merged range. Returns whether it existed.
    pub fn unmerge(&mut self, range: &SpecMergeRange) -> bool {
        let n_before = self.l_merges.len();
        self.l_merges.retain(|mr| mr != range);
        self.l_merges.len() != n_before
    }

    /// Remove every merged range intersecting `range`, returning them.
    pub fn unmerge_intersecting(&mut self, range: &SpecMergeRange) -> Vec<SpecMergeRange> {
        let (l_hit, l_keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.l_merges)
            .into_iter()
            .partition(|mr| mr.intersects(range));
        self.l_merges = l_keep;
        l_hit
    }

    // Structure

    /// Insert `n_rows` blank rows before row `row_at`.
    ///
    /// Cells, row heights and merges starting at or below `row_at` shift
    /// down. A merge that starts above `row_at` keeps its range, even when it
    /// straddles the insertion point.
    pub fn insert_rows(&mut self, row_at: usize, n_rows: usize) -> Result<()> {
        if n_rows == 0 {
            return Ok(());
        }
        if let Some(row_last) = self.max_row()
            && row_last >= row_at
            && row_last + n_rows >= N_NROWS_EXCEL_MAX
        {
            return Err(TemplateError::IndexOverflow {
                axis: "row",
                value: row_last + n_rows,
            });
        }

        let dict_tail = self.dict_cells.split_off(&(row_at, 0));
        self.dict_cells.extend(
            dict_tail
                .into_iter()
                .map(|((row, col), cell)| ((row + n_rows, col), cell)),
        );

        let dict_heights_tail = self.dict_row_heights.split_off(&row_at);
        self.dict_row_heights.extend(
            dict_heights_tail
                .into_iter()
                .map(|(row, height)| (row + n_rows, height)),
        );

        for mr in self.l_merges.iter_mut() {
            if mr.row_min >= row_at {
                *mr = mr.offset_rows(n_rows);
            } else if mr.row_max >= row_at {
                debug!(
                    sheet = %self.name,
                    merge = %mr.to_a1(),
                    "Merged range straddles inserted rows; left unchanged"
                );
            }
        }
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Workbook

/// Ordered sheets plus the active sheet index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecWorkbook {
    /// Sheets in tab order.
    pub sheets: Vec<SheetGrid>,
    /// Active tab index.
    pub idx_active: usize,
}

impl SpecWorkbook {
    /// Sheet names in tab order.
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(SheetGrid::name).collect()
    }

    /// Borrow a sheet by name.
    pub fn sheet(&self, name: &str) -> Option<&SheetGrid> {
        self.sheets.iter().find(|sheet| sheet.name() == name)
    }

    /// Borrow a sheet mutably by name.
    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut SheetGrid> {
        self.sheets.iter_mut().find(|sheet| sheet.name() == name)
    }

    /// Resolve the sheet to fill: the named one, or the active one.
    pub fn resolve_sheet_mut(&mut self, name: Option<&str>) -> Result<&mut SheetGrid> {
        match name {
            Some(val) => self
                .sheet_mut(val)
                .ok_or_else(|| TemplateError::SheetNotFound(val.to_string())),
            None => {
                let idx = self.idx_active.min(self.sheets.len().saturating_sub(1));
                self.sheets
                    .get_mut(idx)
                    .ok_or_else(|| TemplateError::SheetNotFound("<active>".to_string()))
            }
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Tests

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(s: &str) -> EnumCellValue {
        EnumCellValue::String(s.to_string())
    }

    #[test]
    fn test_insert_rows_shifts_cells_heights_and_merges() {
        let mut sheet = SheetGrid::new("S");
        sheet.set_value(0, 0, text("head"));
        sheet.set_value(2, 1, text("tail"));
        sheet.set_row_height(2, 22.0);
        sheet.merge(SpecMergeRange::new(2, 0, 3, 2)).unwrap();
        sheet.merge(SpecMergeRange::new(0, 3, 0, 4)).unwrap();

        sheet.insert_rows(1, 2).unwrap();

        assert_eq!(sheet.text(0, 0), Some("head"));
        assert_eq!(sheet.text(2, 1), None);
        assert_eq!(sheet.text(4, 1), Some("tail"));
        assert_eq!(sheet.row_height(4), Some(22.0));
        assert_eq!(sheet.row_height(2), None);
        assert_eq!(
            sheet.merges(),
            &[SpecMergeRange::new(4, 0, 5, 2), SpecMergeRange::new(0, 3, 0, 4)]
        );
    }

    #[test]
    fn test_insert_rows_keeps_straddling_merge() {
        let mut sheet = SheetGrid::new("S");
        sheet.merge(SpecMergeRange::new(2, 5, 4, 5)).unwrap();
        sheet.merge(SpecMergeRange::new(6, 0, 6, 2)).unwrap();
        sheet.insert_rows(4, 3).unwrap();
        assert_eq!(
            sheet.merges(),
            &[SpecMergeRange::new(2, 5, 4, 5), SpecMergeRange::new(9, 0, 9, 2)]
        );
    }

    #[test]
    fn test_merge_conflict_is_rejected() {
        let mut sheet = SheetGrid::new("S");
        sheet.merge(SpecMergeRange::new(0, 0, 1, 1)).unwrap();
        let err = sheet.merge(SpecMergeRange::new(1, 1, 2, 2)).unwrap_err();
        assert!(matches!(err, TemplateError::MergeConflict { .. }));
        assert_eq!(sheet.merges().len(), 1);

        // single cells and duplicates are no-ops
        sheet.merge(SpecMergeRange::new(5, 5, 5, 5)).unwrap();
        sheet.merge(SpecMergeRange::new(0, 0, 1, 1)).unwrap();
        assert_eq!(sheet.merges().len(), 1);
    }

    #[test]
    fn test_unmerge_intersecting() {
        let mut sheet = SheetGrid::new("S");
        sheet.merge(SpecMergeRange::new(0, 0, 0, 3)).unwrap();
        sheet.merge(SpecMergeRange::new(2, 0, 2, 3)).unwrap();
        let l_hit = sheet.unmerge_intersecting(&SpecMergeRange::new(0, 2, 1, 2));
        assert_eq!(l_hit, vec![SpecMergeRange::new(0, 0, 0, 3)]);
        assert_eq!(sheet.merges(), &[SpecMergeRange::new(2, 0, 2, 3)]);
        assert!(sheet.unmerge(&SpecMergeRange::new(2, 0, 2, 3)));
        assert!(sheet.merges().is_empty());
    }

    #[test]
    fn test_resolve_sheet() {
        let mut wb = SpecWorkbook {
            sheets: vec![SheetGrid::new("A"), SheetGrid::new("B")],
            idx_active: 1,
        };
        assert_eq!(wb.resolve_sheet_mut(None).unwrap().name(), "B");
        assert_eq!(wb.resolve_sheet_mut(Some("A")).unwrap().name(), "A");
        assert!(matches!(
            wb.resolve_sheet_mut(Some("Z")),
            Err(TemplateError::SheetNotFound(_))
        ));
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
