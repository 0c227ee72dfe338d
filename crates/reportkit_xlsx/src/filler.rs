//! Document pipeline: load a template, bind a data context, save the result.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::checkbox::render_checkboxes_with_glyphs;
use crate::coalesce::{merge_identical_cells, merge_totals_block};
use crate::conditional::evaluate_conditionals;
use crate::context::{DataContext, LookupScope, SpecRecord};
use crate::error::Result;
use crate::reader::{read_workbook_from_bytes, read_workbook_from_path};
use crate::richtext::{
    html_to_plain_text, segment_before_delimiter, segment_bold_target, segment_html,
};
use crate::sheet::{SheetGrid, SpecWorkbook};
use crate::spec::{
    EnumCellValue, SpecCellStyle, SpecCheckboxField, SpecCoalesceOptions, SpecDocumentOutput,
    SpecDocumentPlan, SpecFillOptions, SpecFillReport, SpecFont, SpecTableBinding,
    SpecTableExpandOptions, SpecTableReport, SpecTextRun,
};
use crate::table::{
    derive_table_tags, expand_table_with_report, is_table_marker_row, locate_table_row,
    write_total_formulas,
};
use crate::token::{resolve_tokens, strip_none_literal};
use crate::util::{derive_output_file_name, spell_amount_usd};
use crate::writer::{write_workbook_to_buffer, write_workbook_to_path};

/// One independent document generation request.
#[derive(Debug, Clone)]
pub struct SpecDocumentRequest {
    /// Template workbook path.
    pub path_template: PathBuf,
    /// Data context bound into the template.
    pub context: DataContext,
    /// Generation plan.
    pub plan: SpecDocumentPlan,
    /// Output directory.
    pub dir_out: PathBuf,
}

/// Template filler carrying the options shared by every document.
#[derive(Debug, Clone, Default)]
pub struct TemplateFiller {
    options: SpecFillOptions,
}

impl TemplateFiller {
    pub fn new(options: SpecFillOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SpecFillOptions {
        &self.options
    }

    ////////////////////////////////////////////////////////////////////////////
    // #region Fill

    /// Fill the plan's sheet of `workbook` in place.
    ///
    /// Stages run in order: amount words, global fields (checkboxes,
    /// conditionals, placeholders), tables in plan order, totals block.
    pub fn fill_workbook(
        &self,
        workbook: &mut SpecWorkbook,
        ctx: &DataContext,
        plan: &SpecDocumentPlan,
    ) -> Result<SpecFillReport> {
        let ctx_filled = self.derive_context_with_amount_words(ctx, plan);
        let ctx = ctx_filled.as_ref().unwrap_or(ctx);

        let sheet = workbook.resolve_sheet_mut(plan.sheet_name.as_deref())?;
        let mut report = SpecFillReport {
            sheet_name: sheet.name().to_string(),
            ..SpecFillReport::default()
        };

        self.fill_global_fields(sheet, ctx, &plan.checkbox_fields, &mut report);
        for binding in &plan.tables {
            self.fill_table(sheet, ctx, binding, &mut report)?;
        }
        if let Some((col_min, col_max)) = plan.totals_block_cols
            && merge_totals_block(sheet, col_min, col_max).is_none()
        {
            warn!(sheet = %sheet.name(), "Totals block keywords not found");
            report.warn("totals block keywords not found");
        }

        debug!(
            sheet = %report.sheet_name,
            n_tables = report.tables.len(),
            n_keys_missing = report.keys_missing.len(),
            n_warnings = report.warnings.len(),
            "Filled workbook"
        );
        Ok(report)
    }

    fn derive_context_with_amount_words(
        &self,
        ctx: &DataContext,
        plan: &SpecDocumentPlan,
    ) -> Option<DataContext> {
        if plan.amount_words.is_empty() {
            return None;
        }
        let mut ctx_new = ctx.clone();
        for spec in &plan.amount_words {
            let if_target_blank = ctx.field(&spec.target_key).is_none_or(|val| val.is_blank());
            if !if_target_blank {
                continue;
            }
            match ctx.field(&spec.source_key).and_then(|val| val.as_f64()) {
                Some(amount) => ctx_new.insert_field(spec.target_key.clone(), spell_amount_usd(amount)),
                None => debug!(key = %spec.source_key, "Amount source missing or not numeric"),
            }
        }
        Some(ctx_new)
    }

    fn fill_global_fields(
        &self,
        sheet: &mut SheetGrid,
        ctx: &DataContext,
        checkbox_fields: &[SpecCheckboxField],
        report: &mut SpecFillReport,
    ) {
        let set_rows_marker: BTreeSet<usize> = sheet
            .iter_cells()
            .map(|(&(row, _), _)| row)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|&row| is_table_marker_row(sheet, row))
            .collect();
        let l_keys: Vec<(usize, usize)> = sheet
            .iter_cells()
            .filter(|&(&(row, _), cell)| {
                !set_rows_marker.contains(&row)
                    && cell.value.as_str().is_some_and(|text| text.contains("{{"))
            })
            .map(|(&key, _)| key)
            .collect();

        for (row, col) in l_keys {
            let Some(text) = sheet.text(row, col).map(str::to_string) else {
                continue;
            };

            if let Some(field) = checkbox_fields
                .iter()
                .find(|field| text.trim() == format!("{{{{{}}}}}", field.key))
            {
                let c_selected = ctx.lookup(&field.key).map(|val| val.to_text()).unwrap_or_default();
                let c_block = render_checkboxes_with_glyphs(
                    &field.options,
                    &c_selected,
                    field.uppercase,
                    &self.options.glyph_checked,
                    &self.options.glyph_unchecked,
                );
                sheet.set_value(row, col, EnumCellValue::String(c_block));
                sheet.patch_style(
                    row,
                    col,
                    SpecCellStyle {
                        text_wrap: Some(true),
                        ..SpecCellStyle::default()
                    },
                );
                continue;
            }

            let c_text = evaluate_conditionals(&text, ctx);
            let resolved = resolve_tokens(&c_text, ctx);
            report.keys_missing.extend(resolved.keys_missing);
            let c_text = if self.options.if_strip_none_literal {
                strip_none_literal(&resolved.text)
            } else {
                resolved.text
            };
            sheet.set_value(row, col, EnumCellValue::String(c_text));
        }
    }

    fn fill_table(
        &self,
        sheet: &mut SheetGrid,
        ctx: &DataContext,
        binding: &SpecTableBinding,
        report: &mut SpecFillReport,
    ) -> Result<()> {
        let (start_tag, end_tag) = derive_table_tags(&binding.name);
        if !binding.if_required && locate_table_row(sheet, &start_tag).is_none() {
            warn!(sheet = %sheet.name(), marker = %start_tag, "Optional table marker not found");
            report.warn(format!("optional table `{}` not found", binding.name));
            return Ok(());
        }

        let records = ctx.records(binding.records_key());
        let options = SpecTableExpandOptions {
            footer_offset: binding.footer_offset,
            if_strip_none_literal: self.options.if_strip_none_literal,
        };
        let row_template =
            expand_table_with_report(sheet, &start_tag, &end_tag, records, ctx, &options, report)?;
        let n_records = records.len();

        for spec in &binding.cols_bold_prefix {
            for row in row_template..row_template + n_records {
                apply_rich_text(sheet, row, spec.col, |text, font| {
                    segment_before_delimiter(text, spec.delimiter, font)
                });
            }
        }
        for spec in &binding.cols_bold_target {
            for (idx, record) in records.iter().enumerate() {
                let c_name = derive_record_text(record, &spec.key);
                apply_rich_text(sheet, row_template + idx, spec.col, |text, font| {
                    segment_bold_target(text, &c_name, font)
                });
            }
        }
        for &col in &binding.cols_html {
            for row in row_template..row_template + n_records {
                apply_html(sheet, row, col);
            }
        }
        for &col in &binding.cols_html_plain {
            for row in row_template..row_template + n_records {
                apply_html_plain(sheet, row, col);
            }
        }

        let mut n_runs_merged = 0;
        if let Some(coalesce) = &binding.coalesce
            && n_records > 1
        {
            let options_coalesce = SpecCoalesceOptions {
                cols_companion: coalesce.cols_companion.clone(),
                policy_row_height: self.options.policy_row_height.clone(),
            };
            n_runs_merged =
                merge_identical_cells(sheet, row_template, n_records, coalesce.col, &options_coalesce)
                    .len();
        }

        write_total_formulas(sheet, row_template, n_records, &binding.total_formulas, report);
        report.tables.push(SpecTableReport {
            name: binding.name.clone(),
            row_template,
            n_records,
            n_runs_merged,
        });
        Ok(())
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Output

    /// Fill an in-memory template and serialize the result.
    pub fn render_to_buffer(
        &self,
        v_template: &[u8],
        ctx: &DataContext,
        plan: &SpecDocumentPlan,
    ) -> Result<Vec<u8>> {
        let mut workbook = read_workbook_from_bytes(v_template)?;
        self.fill_workbook(&mut workbook, ctx, plan)?;
        write_workbook_to_buffer(&workbook)
    }

    /// Generate one document into `dir_out`.
    ///
    /// Bytes go to a temp file inside `dir_out`, renamed into place only after
    /// a complete write. On error the temp file is removed.
    pub fn generate_document(
        &self,
        path_template: &Path,
        ctx: &DataContext,
        plan: &SpecDocumentPlan,
        dir_out: &Path,
    ) -> Result<SpecDocumentOutput> {
        let mut workbook = read_workbook_from_path(path_template)?;
        let report = self.fill_workbook(&mut workbook, ctx, plan)?;

        let file_name =
            derive_output_file_name(&plan.doc_prefix, &plan.entity_id, Local::now().naive_local());
        fs::create_dir_all(dir_out)?;
        let path_file = dir_out.join(&file_name);

        let file_tmp = tempfile::NamedTempFile::new_in(dir_out)?;
        write_workbook_to_path(&workbook, file_tmp.path())?;
        file_tmp.persist(&path_file)?;

        info!(
            path = %path_file.display(),
            n_tables = report.tables.len(),
            n_warnings = report.warnings.len(),
            "Generated document"
        );
        Ok(SpecDocumentOutput {
            path_file,
            file_name,
            report,
        })
    }

    /// Generate independent documents on a rayon pool of `n_workers` threads.
    ///
    /// Results keep request order. When the pool cannot be built the requests
    /// run serially.
    pub fn generate_documents_parallel(
        &self,
        requests: &[SpecDocumentRequest],
        n_workers: usize,
    ) -> Vec<Result<SpecDocumentOutput>> {
        let run = |req: &SpecDocumentRequest| {
            self.generate_document(&req.path_template, &req.context, &req.plan, &req.dir_out)
        };
        if n_workers <= 1 || requests.len() <= 1 {
            return requests.iter().map(run).collect();
        }

        let thread_pool = ThreadPoolBuilder::new().num_threads(n_workers).build();
        let Ok(thread_pool) = thread_pool else {
            warn!(
                n_workers,
                "Failed to initialize thread pool; fallback to serial generation"
            );
            return requests.iter().map(run).collect();
        };
        thread_pool.install(|| requests.par_iter().map(run).collect())
    }

    // #endregion
}

fn derive_record_text(record: &SpecRecord, key: &str) -> String {
    record.get(key).map(|val| val.to_text()).unwrap_or_default()
}

fn apply_rich_text<F>(sheet: &mut SheetGrid, row: usize, col: usize, segment: F)
where
    F: FnOnce(&str, &SpecFont) -> Vec<SpecTextRun>,
{
    let Some(text) = sheet.text(row, col).filter(|text| !text.is_empty()) else {
        return;
    };
    let font = sheet.style(row, col).map(SpecCellStyle::font).unwrap_or_default();
    let l_runs = segment(text, &font);
    if l_runs.len() > 1 {
        sheet.set_value(row, col, EnumCellValue::RichText(l_runs));
    }
}

fn apply_html(sheet: &mut SheetGrid, row: usize, col: usize) {
    let Some(text) = sheet.text(row, col) else {
        return;
    };
    let font = sheet.style(row, col).map(SpecCellStyle::font).unwrap_or_default();
    let mut l_runs = segment_html(text, &font);
    let value = match l_runs.len() {
        0 => EnumCellValue::String(String::new()),
        1 if !l_runs[0].bold => EnumCellValue::String(l_runs.remove(0).text),
        _ => EnumCellValue::RichText(l_runs),
    };
    sheet.set_value(row, col, value);
    sheet.patch_style(
        row,
        col,
        SpecCellStyle {
            text_wrap: Some(true),
            ..SpecCellStyle::default()
        },
    );
}

fn apply_html_plain(sheet: &mut SheetGrid, row: usize, col: usize) {
    let Some(text) = sheet.text(row, col) else {
        return;
    };
    let c_plain = html_to_plain_text(text);
    sheet.set_value(row, col, EnumCellValue::String(c_plain));
    sheet.patch_style(
        row,
        col,
        SpecCellStyle {
            text_wrap: Some(true),
            ..SpecCellStyle::default()
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EnumScalarValue;
    use crate::error::TemplateError;
    use crate::spec::{
        EnumTotalFunction, SpecAmountWords, SpecBoldPrefixColumn, SpecCoalesceBinding,
        SpecMergeRange, SpecTotalFormula,
    };
    use pretty_assertions::assert_eq;

    fn text(s: &str) -> EnumCellValue {
        EnumCellValue::String(s.to_string())
    }

    fn derive_record(pairs: &[(&str, &str)]) -> SpecRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), EnumScalarValue::from(*v)))
            .collect()
    }

    fn derive_workbook() -> SpecWorkbook {
        let mut sheet = SheetGrid::new("PI");
        sheet.set_value(0, 0, text("Invoice {{Name}}"));
        sheet.set_value(1, 0, text("{{#if Status '==' 'Paid'}}PAID{{else}}UNPAID{{/if}}"));
        sheet.set_value(2, 0, text("{{Incoterms}}"));
        sheet.set_value(3, 0, text("{{AmountWords}}"));
        sheet.set_value(5, 0, text("{{TableStart:Items}}{{Product}}"));
        sheet.set_value(5, 1, text("{{Desc}}"));
        sheet.set_value(5, 2, text("{{Qty}}{{TableEnd:Items}}"));
        sheet.set_value(6, 0, text("Total"));
        sheet.set_value(8, 0, text("Owner: {{Owner}}"));
        SpecWorkbook {
            sheets: vec![sheet],
            idx_active: 0,
        }
    }

    fn derive_plan() -> SpecDocumentPlan {
        SpecDocumentPlan {
            doc_prefix: "PI_".to_string(),
            entity_id: "Q-0001".to_string(),
            checkbox_fields: vec![SpecCheckboxField {
                key: "Incoterms".to_string(),
                options: vec!["FOB".to_string(), "CIF".to_string()],
                uppercase: false,
            }],
            tables: vec![SpecTableBinding {
                name: "Items".to_string(),
                if_required: true,
                coalesce: Some(SpecCoalesceBinding {
                    col: 0,
                    cols_companion: Vec::new(),
                }),
                cols_bold_prefix: vec![SpecBoldPrefixColumn { col: 1, delimiter: '-' }],
                total_formulas: vec![SpecTotalFormula {
                    label_col: 0,
                    label: "Total".to_string(),
                    target_col: 2,
                    function: EnumTotalFunction::Sum,
                }],
                ..SpecTableBinding::default()
            }],
            amount_words: vec![SpecAmountWords {
                source_key: "Amount".to_string(),
                target_key: "AmountWords".to_string(),
            }],
            ..SpecDocumentPlan::default()
        }
    }

    fn derive_context() -> DataContext {
        DataContext::new()
            .with_field("Name", "Acme")
            .with_field("Status", "paid")
            .with_field("Incoterms", "cif")
            .with_field("Amount", 12.5)
            .with_records(
                "Items",
                vec![
                    derive_record(&[("Product", "Granite"), ("Desc", "Black - polished"), ("Qty", "5")]),
                    derive_record(&[("Product", "Granite"), ("Desc", "Grey - flamed"), ("Qty", "7")]),
                ],
            )
    }

    #[test]
    fn test_fill_workbook_end_to_end() {
        let mut workbook = derive_workbook();
        let filler = TemplateFiller::default();
        let report = filler
            .fill_workbook(&mut workbook, &derive_context(), &derive_plan())
            .unwrap();
        let sheet = &workbook.sheets[0];

        assert_eq!(sheet.text(0, 0), Some("Invoice Acme"));
        assert_eq!(sheet.text(1, 0), Some("PAID"));
        assert_eq!(sheet.text(2, 0), Some("\u{2610} FOB\n\u{2611} CIF"));
        assert_eq!(sheet.style(2, 0).and_then(|s| s.text_wrap), Some(true));
        assert_eq!(
            sheet.text(3, 0),
            Some("Twelve US Dollars And Fifty Cents Only")
        );
        assert_eq!(sheet.text(5, 0), Some("Granite"));
        assert_eq!(sheet.value(6, 2), &EnumCellValue::Number(7.0));
        assert!(matches!(sheet.value(5, 1), EnumCellValue::RichText(runs) if runs[0].bold));
        assert_eq!(sheet.merges(), &[SpecMergeRange::new(5, 0, 6, 0)]);
        assert_eq!(
            sheet.value(7, 2),
            &EnumCellValue::Formula("=SUM(C6:C7)".to_string())
        );
        assert_eq!(sheet.text(9, 0), Some("Owner: "));

        assert_eq!(report.sheet_name, "PI");
        assert_eq!(
            report.tables,
            vec![SpecTableReport {
                name: "Items".to_string(),
                row_template: 5,
                n_records: 2,
                n_runs_merged: 1,
            }]
        );
        assert!(report.keys_missing.contains("Owner"));
    }

    #[test]
    fn test_table_row_falls_back_to_context_fields() {
        let mut sheet = SheetGrid::new("PO");
        sheet.set_value(0, 0, text("{{TableStart:Items}}{{desc}}"));
        sheet.set_value(0, 1, text("{{Contract.No}}"));
        sheet.set_value(
            0,
            2,
            text("{{#if Currency '==' 'USD'}}$ {{price}}{{else}}{{price}} VND{{/if}}{{TableEnd:Items}}"),
        );
        let mut workbook = SpecWorkbook {
            sheets: vec![sheet],
            idx_active: 0,
        };
        let mut ctx = DataContext::new()
            .with_field("Currency", "usd")
            .with_field("Contract.No", "HD-2024-07");
        ctx.insert_records(
            "Items",
            vec![
                derive_record(&[("desc", "Slab"), ("price", "5")]),
                derive_record(&[("desc", "Tile"), ("price", "8")]),
            ],
        );
        let plan = SpecDocumentPlan {
            tables: vec![SpecTableBinding {
                name: "Items".to_string(),
                if_required: true,
                ..SpecTableBinding::default()
            }],
            ..SpecDocumentPlan::default()
        };

        let report = TemplateFiller::default()
            .fill_workbook(&mut workbook, &ctx, &plan)
            .unwrap();
        let sheet = &workbook.sheets[0];
        assert_eq!(sheet.text(0, 0), Some("Slab"));
        assert_eq!(sheet.text(0, 1), Some("HD-2024-07"));
        assert_eq!(sheet.text(0, 2), Some("$ 5"));
        assert_eq!(sheet.text(1, 1), Some("HD-2024-07"));
        assert_eq!(sheet.text(1, 2), Some("$ 8"));
        assert!(report.keys_missing.is_empty());
    }

    #[test]
    fn test_required_table_missing_is_fatal() {
        let mut workbook = derive_workbook();
        let mut plan = derive_plan();
        plan.tables[0].name = "Fees".to_string();
        let err = TemplateFiller::default()
            .fill_workbook(&mut workbook, &derive_context(), &plan)
            .unwrap_err();
        assert!(matches!(err, TemplateError::TemplateStructure { .. }));
    }

    #[test]
    fn test_optional_table_missing_is_warning() {
        let mut workbook = derive_workbook();
        let mut plan = derive_plan();
        plan.tables.push(SpecTableBinding {
            name: "Fees".to_string(),
            if_required: false,
            ..SpecTableBinding::default()
        });
        let report = TemplateFiller::default()
            .fill_workbook(&mut workbook, &derive_context(), &plan)
            .unwrap();
        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.warnings, vec!["optional table `Fees` not found".to_string()]);
    }

    #[test]
    fn test_amount_words_keep_existing_target() {
        let ctx = derive_context().with_field("AmountWords", "Prefilled");
        let mut workbook = derive_workbook();
        TemplateFiller::default()
            .fill_workbook(&mut workbook, &ctx, &derive_plan())
            .unwrap();
        assert_eq!(workbook.sheets[0].text(3, 0), Some("Prefilled"));
    }

    #[test]
    fn test_unknown_sheet_is_fatal() {
        let mut workbook = derive_workbook();
        let mut plan = derive_plan();
        plan.sheet_name = Some("Missing".to_string());
        let err = TemplateFiller::default()
            .fill_workbook(&mut workbook, &derive_context(), &plan)
            .unwrap_err();
        assert!(matches!(err, TemplateError::SheetNotFound(_)));
    }

    #[test]
    fn test_apply_html_plain_column() {
        let mut sheet = SheetGrid::new("QC");
        sheet.set_value(0, 0, text("<ul><li>Chipped</li><li>Scratched</li></ul>"));
        apply_html_plain(&mut sheet, 0, 0);
        assert_eq!(sheet.text(0, 0), Some("- Chipped\n- Scratched"));
        assert_eq!(sheet.style(0, 0).and_then(|s| s.text_wrap), Some(true));
    }

    #[test]
    fn test_apply_html_column() {
        let mut sheet = SheetGrid::new("QC");
        sheet.set_value(0, 0, text("<p>Issue: <b>chipped</b></p>"));
        sheet.set_value(1, 0, text("<p>plain</p>"));
        apply_html(&mut sheet, 0, 0);
        apply_html(&mut sheet, 1, 0);
        assert!(matches!(sheet.value(0, 0), EnumCellValue::RichText(runs) if runs.len() == 2));
        assert_eq!(sheet.text(1, 0), Some("plain"));
    }
}
