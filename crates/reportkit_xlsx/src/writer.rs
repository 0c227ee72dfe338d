//! XLSX serializer for the filled working copy.

use std::path::Path;

use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, FormatUnderline, Workbook, Worksheet};

use crate::error::{Result, TemplateError};
use crate::sheet::{SheetGrid, SpecWorkbook};
use crate::spec::{EnumCellValue, SpecCell, SpecCellStyle, SpecTextRun};

////////////////////////////////////////////////////////////////////////////////
// #region EntryPoints

/// Serialize the working copy into a new output file.
pub fn write_workbook_to_path(workbook: &SpecWorkbook, path_file_out: &Path) -> Result<()> {
    let mut wb = derive_rust_xlsx_workbook(workbook)?;
    wb.save(path_file_out)?;
    Ok(())
}

/// Serialize the working copy into an in-memory XLSX payload.
pub fn write_workbook_to_buffer(workbook: &SpecWorkbook) -> Result<Vec<u8>> {
    let mut wb = derive_rust_xlsx_workbook(workbook)?;
    Ok(wb.save_to_buffer()?)
}

/// Build a `rust_xlsxwriter` workbook mirroring every sheet of the working copy.
pub fn derive_rust_xlsx_workbook(workbook: &SpecWorkbook) -> Result<Workbook> {
    let mut wb = Workbook::new();
    for (idx, sheet) in workbook.sheets.iter().enumerate() {
        let worksheet = wb.add_worksheet();
        worksheet.set_name(sheet.name())?;
        write_sheet(worksheet, sheet)?;
        if idx == workbook.idx_active {
            worksheet.set_active(true);
        }
    }
    Ok(wb)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetWrite

fn write_sheet(worksheet: &mut Worksheet, sheet: &SheetGrid) -> Result<()> {
    for (&col, &width) in sheet.col_widths() {
        worksheet.set_column_width(cast_col_num(col)?, width)?;
    }
    for (&row, &height) in sheet.row_heights() {
        worksheet.set_row_height(cast_row_num(row)?, height)?;
    }

    // merge first, then overwrite anchors with typed values
    for mr in sheet.merges() {
        let format = sheet
            .style(mr.row_min, mr.col_min)
            .map(derive_rust_xlsx_format)
            .unwrap_or_else(Format::new);
        worksheet.merge_range(
            cast_row_num(mr.row_min)?,
            cast_col_num(mr.col_min)?,
            cast_row_num(mr.row_max)?,
            cast_col_num(mr.col_max)?,
            "",
            &format,
        )?;
    }

    for (&(row, col), cell) in sheet.iter_cells() {
        let if_covered = sheet
            .merge_at(row, col)
            .is_some_and(|mr| (mr.row_min, mr.col_min) != (row, col));
        if if_covered {
            if let Some(style) = &cell.style {
                worksheet.write_blank(
                    cast_row_num(row)?,
                    cast_col_num(col)?,
                    &derive_rust_xlsx_format(style),
                )?;
            }
            continue;
        }
        write_cell(worksheet, row, col, cell)?;
    }
    Ok(())
}

fn write_cell(worksheet: &mut Worksheet, row_idx: usize, col_idx: usize, cell: &SpecCell) -> Result<()> {
    let row = cast_row_num(row_idx)?;
    let col = cast_col_num(col_idx)?;
    let format = cell
        .style
        .as_ref()
        .map(derive_rust_xlsx_format)
        .unwrap_or_else(Format::new);

    match &cell.value {
        EnumCellValue::None => {
            if cell.style.is_some() {
                worksheet.write_blank(row, col, &format)?;
            }
        }
        EnumCellValue::String(val) => {
            if val.is_empty() {
                if cell.style.is_some() {
                    worksheet.write_blank(row, col, &format)?;
                }
            } else {
                worksheet.write_string_with_format(row, col, val, &format)?;
            }
        }
        EnumCellValue::Number(val) => {
            worksheet.write_number_with_format(row, col, *val, &format)?;
        }
        EnumCellValue::Boolean(val) => {
            worksheet.write_boolean_with_format(row, col, *val, &format)?;
        }
        EnumCellValue::Formula(val) => {
            worksheet.write_formula_with_format(row, col, val.as_str(), &format)?;
        }
        EnumCellValue::RichText(runs) => {
            write_rich_text(worksheet, row, col, runs, &format)?;
        }
    }
    Ok(())
}

fn write_rich_text(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    runs: &[SpecTextRun],
    format: &Format,
) -> Result<()> {
    let l_runs: Vec<&SpecTextRun> = runs.iter().filter(|run| !run.text.is_empty()).collect();
    if l_runs.is_empty() {
        worksheet.write_blank(row, col, format)?;
        return Ok(());
    }

    let l_formats: Vec<Format> = l_runs.iter().map(|run| derive_run_format(run)).collect();
    let l_segments: Vec<(&Format, &str)> = l_formats
        .iter()
        .zip(l_runs.iter())
        .map(|(fmt, run)| (fmt, run.text.as_str()))
        .collect();
    worksheet.write_rich_string_with_format(row, col, &l_segments, format)?;
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FormatMapping

fn derive_run_format(run: &SpecTextRun) -> Format {
    let mut format = Format::new();
    if let Some(val) = &run.font.name {
        format = format.set_font_name(val.clone());
    }
    if let Some(val) = run.font.size {
        format = format.set_font_size(val);
    }
    if let Some(val) = &run.font.color {
        format = format.set_font_color(val.as_str());
    }
    if run.bold {
        format = format.set_bold();
    }
    format
}

/// Map a cell style record onto a `rust_xlsxwriter` format.
pub fn derive_rust_xlsx_format(spec: &SpecCellStyle) -> Format {
    let mut format = Format::new();

    if let Some(val) = &spec.font_name {
        format = format.set_font_name(val.clone());
    }
    if let Some(val) = spec.font_size {
        format = format.set_font_size(val);
    }
    if spec.bold.unwrap_or(false) {
        format = format.set_bold();
    }
    if spec.italic.unwrap_or(false) {
        format = format.set_italic();
    }
    if spec.underline.unwrap_or(false) {
        format = format.set_underline(FormatUnderline::Single);
    }

    if let Some(val) = &spec.align
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }
    if let Some(val) = &spec.valign
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }

    if let Some(val) = &spec.num_format {
        format = format.set_num_format(val.clone());
    } else if let Some(val) = spec.num_format_index {
        format = format.set_num_format_index(val);
    }
    if let Some(val) = &spec.bg_color {
        format = format.set_background_color(val.as_str());
    }
    if let Some(val) = &spec.font_color {
        format = format.set_font_color(val.as_str());
    }

    if let Some(val) = spec.top {
        format = format.set_border_top(derive_format_border(val));
    }
    if let Some(val) = spec.bottom {
        format = format.set_border_bottom(derive_format_border(val));
    }
    if let Some(val) = spec.left {
        format = format.set_border_left(derive_format_border(val));
    }
    if let Some(val) = spec.right {
        format = format.set_border_right(derive_format_border(val));
    }

    if spec.text_wrap.unwrap_or(false) {
        format = format.set_text_wrap();
    }

    format
}

fn derive_format_border(border: i64) -> FormatBorder {
    match border {
        1 => FormatBorder::Thin,
        2 => FormatBorder::Medium,
        3 => FormatBorder::Dashed,
        4 => FormatBorder::Dotted,
        5 => FormatBorder::Thick,
        6 => FormatBorder::Double,
        7 => FormatBorder::Hair,
        8 => FormatBorder::MediumDashed,
        9 => FormatBorder::DashDot,
        10 => FormatBorder::MediumDashDot,
        11 => FormatBorder::DashDotDot,
        12 => FormatBorder::MediumDashDotDot,
        13 => FormatBorder::SlantDashDot,
        _ => FormatBorder::None,
    }
}

fn derive_format_align(align: &str) -> Option<FormatAlign> {
    let value = align.trim().to_ascii_lowercase();
    match value.as_str() {
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "fill" => Some(FormatAlign::Fill),
        "justify" => Some(FormatAlign::Justify),
        "center_across" => Some(FormatAlign::CenterAcross),
        "distributed" => Some(FormatAlign::Distributed),
        "top" => Some(FormatAlign::Top),
        "bottom" => Some(FormatAlign::Bottom),
        "vcenter" => Some(FormatAlign::VerticalCenter),
        "vjustify" => Some(FormatAlign::VerticalJustify),
        "vdistributed" => Some(FormatAlign::VerticalDistributed),
        _ => None,
    }
}

fn cast_row_num(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| TemplateError::IndexOverflow { axis: "row", value })
}

fn cast_col_num(value: usize) -> Result<u16> {
    u16::try_from(value).map_err(|_| TemplateError::IndexOverflow { axis: "column", value })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Tests


// #endregion
////////////////////////////////////////////////////////////////////////////////
