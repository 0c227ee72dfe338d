//! Command dispatch.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use reportkit_xlsx::{
    DataContext, SpecDocumentPlan, TemplateFiller, derive_default_fill_options,
    locate_table_markers, read_workbook_from_path,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::{Args, Commands, parse_named_path};

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
    debug!("Logging initialized with level: {}", log_level);
}

pub fn run(args: Args) -> Result<()> {
    init_logging(args.verbose);
    info!("Starting reportkit v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Commands::Fill {
            template,
            context,
            plan,
            out_dir,
            records_ipc,
        } => run_fill(&template, &context, &plan, &out_dir, &records_ipc),
        Commands::Inspect { template } => run_inspect(&template),
    }
}

fn load_context(path_context: &Path, records_ipc: &[String]) -> Result<DataContext> {
    let text = fs::read_to_string(path_context)
        .with_context(|| format!("Failed to read data context {}", path_context.display()))?;
    let mut ctx = DataContext::from_json_str(&text)
        .with_context(|| format!("Failed to parse data context {}", path_context.display()))?;

    for raw in records_ipc {
        let Some((name, path_ipc)) = parse_named_path(raw) else {
            bail!("Invalid --records-ipc value `{raw}`, expected NAME=PATH");
        };
        let v_ipc = fs::read(&path_ipc)
            .with_context(|| format!("Failed to read IPC file {}", path_ipc.display()))?;
        ctx.insert_records_from_ipc_bytes(name.as_str(), &v_ipc)
            .with_context(|| format!("Failed to load records `{name}`"))?;
        debug!(name = %name, n_records = ctx.records(&name).len(), "Loaded IPC records");
    }
    debug!(lists = ?ctx.record_list_names(), n_fields = ctx.fields().len(), "Loaded data context");
    Ok(ctx)
}

fn load_plan(path_plan: &Path) -> Result<SpecDocumentPlan> {
    let text = fs::read_to_string(path_plan)
        .with_context(|| format!("Failed to read plan {}", path_plan.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse plan {}", path_plan.display()))
}

fn run_fill(
    path_template: &Path,
    path_context: &Path,
    path_plan: &Path,
    dir_out: &Path,
    records_ipc: &[String],
) -> Result<()> {
    let ctx = load_context(path_context, records_ipc)?;
    let plan = load_plan(path_plan)?;

    let output = TemplateFiller::new(derive_default_fill_options())
        .generate_document(path_template, &ctx, &plan, dir_out)
        .with_context(|| format!("Failed to generate document from {}", path_template.display()))?;

    for msg in &output.report.warnings {
        warn!("{msg}");
    }
    if !output.report.keys_missing.is_empty() {
        let l_keys: Vec<&str> = output.report.keys_missing.iter().map(String::as_str).collect();
        warn!(keys = %l_keys.join(", "), "Unresolved placeholders");
    }
    for table in &output.report.tables {
        info!(
            table = %table.name,
            row = table.row_template + 1,
            n_records = table.n_records,
            n_runs_merged = table.n_runs_merged,
            "Table filled"
        );
    }
    println!("{}", output.path_file.display());
    Ok(())
}

fn run_inspect(path_template: &Path) -> Result<()> {
    let workbook = read_workbook_from_path(path_template)
        .with_context(|| format!("Failed to read template {}", path_template.display()))?;

    for (idx, sheet) in workbook.sheets.iter().enumerate() {
        let c_active = if idx == workbook.idx_active { " (active)" } else { "" };
        println!("{}{c_active}", sheet.name());
        for (name, row) in locate_table_markers(sheet) {
            println!("  {name}: row {}", row + 1);
        }
    }
    Ok(())
}
