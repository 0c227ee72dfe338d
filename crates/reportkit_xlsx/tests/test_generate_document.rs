use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use reportkit_xlsx::{
    DataContext, EnumCellValue, EnumTotalFunction, SpecDocumentPlan, SpecDocumentRequest,
    SpecMergeRange, SpecTableBinding, SpecTotalFormula, TemplateError, TemplateFiller,
    read_workbook_from_bytes, read_workbook_from_path,
};
use rust_xlsxwriter::{Format, Workbook};

fn derive_template_bytes() -> Vec<u8> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Invoice").unwrap();
    let fmt_bold = Format::new().set_bold();

    worksheet.write_string(0, 0, "Invoice for {{Customer.Name}}").unwrap();
    worksheet
        .write_string(1, 0, "{{#if Status '==' 'Paid'}}PAID{{else}}UNPAID{{/if}}")
        .unwrap();
    worksheet
        .write_string_with_format(3, 0, "{{TableStart:Items}}{{desc}}", &fmt_bold)
        .unwrap();
    worksheet.write_string(3, 1, "{{qty}}").unwrap();
    worksheet.write_string(3, 2, "{{price}}{{TableEnd:Items}}").unwrap();
    worksheet.set_row_height(3, 22.0).unwrap();
    worksheet.write_string(4, 0, "Total").unwrap();
    worksheet
        .merge_range(6, 0, 7, 2, "Signature {{Owner}}", &Format::new())
        .unwrap();
    worksheet.set_row_height(6, 30.0).unwrap();
    worksheet.set_column_width(0, 28.0).unwrap();

    workbook.save_to_buffer().unwrap()
}

fn derive_context(n_items: usize) -> DataContext {
    let l_items: Vec<serde_json::Value> = (0..n_items)
        .map(|idx| {
            serde_json::json!({
                "desc": format!("Item {idx}"),
                "qty": idx + 1,
                "price": "0012",
            })
        })
        .collect();
    let value = serde_json::json!({
        "Customer": {"Name": "Acme Stone"},
        "Status": "paid",
        "Owner": "J. Doe",
        "Items": l_items,
    });
    DataContext::from_json_value(&value).unwrap()
}

fn derive_plan(entity_id: &str) -> SpecDocumentPlan {
    SpecDocumentPlan {
        doc_prefix: "INV_".to_string(),
        entity_id: entity_id.to_string(),
        tables: vec![SpecTableBinding {
            name: "Items".to_string(),
            if_required: true,
            footer_offset: Some(3),
            total_formulas: vec![SpecTotalFormula {
                label_col: 0,
                label: "Total".to_string(),
                target_col: 1,
                function: EnumTotalFunction::Sum,
            }],
            ..SpecTableBinding::default()
        }],
        ..SpecDocumentPlan::default()
    }
}

fn write_template(dir: &Path) -> std::path::PathBuf {
    let path_template = dir.join("template.xlsx");
    fs::write(&path_template, derive_template_bytes()).unwrap();
    path_template
}

#[test]
fn test_generate_document_expands_and_relocates() {
    let dir_tmp = tempfile::tempdir().unwrap();
    let path_template = write_template(dir_tmp.path());
    let dir_out = dir_tmp.path().join("out");

    let output = TemplateFiller::default()
        .generate_document(&path_template, &derive_context(3), &derive_plan("Q/001"), &dir_out)
        .unwrap();
    assert!(output.file_name.starts_with("INV_Q_001_"));
    assert!(output.file_name.ends_with(".xlsx"));
    assert!(output.path_file.is_file());

    let workbook = read_workbook_from_path(&output.path_file).unwrap();
    let sheet = workbook.sheet("Invoice").unwrap();
    assert_eq!(sheet.text(0, 0), Some("Invoice for Acme Stone"));
    assert_eq!(sheet.text(1, 0), Some("PAID"));
    for idx in 0..3 {
        let row = 3 + idx;
        assert_eq!(sheet.text(row, 0), Some(format!("Item {idx}").as_str()));
        assert_eq!(sheet.style(row, 0).and_then(|s| s.bold), Some(true));
        assert_eq!(sheet.value(row, 1), &EnumCellValue::Number((idx + 1) as f64));
        assert_eq!(sheet.text(row, 2), Some("0012"));
        assert_eq!(sheet.row_height(row), Some(22.0));
    }
    assert_eq!(sheet.text(6, 0), Some("Total"));
    assert_eq!(
        sheet.value(6, 1),
        &EnumCellValue::Formula("SUM(B4:B6)".to_string())
    );
    assert_eq!(sheet.text(8, 0), Some("Signature J. Doe"));
    assert_eq!(sheet.row_height(8), Some(30.0));
    assert_eq!(sheet.merges(), &[SpecMergeRange::new(8, 0, 9, 2)]);
    assert!(output.report.keys_missing.is_empty());
}

#[test]
fn test_render_empty_table_leaves_layout() {
    let v_xlsx = TemplateFiller::default()
        .render_to_buffer(&derive_template_bytes(), &derive_context(0), &derive_plan("Q-2"))
        .unwrap();
    let workbook = read_workbook_from_bytes(&v_xlsx).unwrap();
    let sheet = workbook.sheet("Invoice").unwrap();
    for col in 0..3 {
        assert!(sheet.value(3, col).is_empty());
    }
    assert_eq!(sheet.text(4, 0), Some("Total"));
    assert_eq!(sheet.text(6, 0), Some("Signature J. Doe"));
    assert_eq!(sheet.merges(), &[SpecMergeRange::new(6, 0, 7, 2)]);
}

#[test]
fn test_failed_document_leaves_no_output() {
    let dir_tmp = tempfile::tempdir().unwrap();
    let path_template = write_template(dir_tmp.path());
    let dir_out = dir_tmp.path().join("out");
    fs::create_dir_all(&dir_out).unwrap();

    let mut plan = derive_plan("Q-3");
    plan.tables[0].name = "Missing".to_string();
    let err = TemplateFiller::default()
        .generate_document(&path_template, &derive_context(2), &plan, &dir_out)
        .unwrap_err();
    assert!(matches!(err, TemplateError::TemplateStructure { .. }));
    assert_eq!(fs::read_dir(&dir_out).unwrap().count(), 0);
}

#[test]
fn test_generate_documents_parallel_keeps_order() {
    let dir_tmp = tempfile::tempdir().unwrap();
    let path_template = write_template(dir_tmp.path());
    let requests: Vec<SpecDocumentRequest> = ["A-1", "B-2", "C-3"]
        .iter()
        .map(|entity_id| SpecDocumentRequest {
            path_template: path_template.clone(),
            context: derive_context(2),
            plan: derive_plan(entity_id),
            dir_out: dir_tmp.path().join("out"),
        })
        .collect();

    let l_results = TemplateFiller::default().generate_documents_parallel(&requests, 2);
    assert_eq!(l_results.len(), 3);
    for (result, entity_id) in l_results.iter().zip(["A-1", "B-2", "C-3"]) {
        let output = result.as_ref().unwrap();
        assert!(output.file_name.starts_with(&format!("INV_{entity_id}_")));
        assert_eq!(output.report.tables[0].n_records, 2);
    }
}
