//! Command line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "reportkit")]
#[command(about = "Fill XLSX report templates from a JSON data context")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable debug logging")]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Generate one document from a template, a data context and a plan
    Fill {
        #[arg(short, long, help = "Path to the XLSX template")]
        template: PathBuf,

        #[arg(short, long, help = "Path to the data context JSON")]
        context: PathBuf,

        #[arg(short, long, help = "Path to the document plan JSON")]
        plan: PathBuf,

        #[arg(short, long = "out-dir", help = "Output directory")]
        out_dir: PathBuf,

        #[arg(
            long = "records-ipc",
            value_name = "NAME=PATH",
            help = "Load a record list from a Polars IPC file"
        )]
        records_ipc: Vec<String>,
    },

    /// List sheets and table markers of a template
    Inspect {
        #[arg(short, long, help = "Path to the XLSX template")]
        template: PathBuf,
    },
}

/// Split a `NAME=PATH` pair.
pub fn parse_named_path(raw: &str) -> Option<(String, PathBuf)> {
    let (name, path) = raw.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || path.trim().is_empty() {
        return None;
    }
    Some((name.to_string(), PathBuf::from(path.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_fill_command() {
        let args = Args::try_parse_from([
            "reportkit",
            "fill",
            "--template",
            "t.xlsx",
            "--context",
            "c.json",
            "--plan",
            "p.json",
            "--out-dir",
            "out",
            "--records-ipc",
            "Items=items.arrow",
            "-v",
        ])
        .unwrap();
        assert!(args.verbose);
        let Commands::Fill { records_ipc, out_dir, .. } = args.command else {
            panic!("expected fill command");
        };
        assert_eq!(out_dir, PathBuf::from("out"));
        assert_eq!(
            parse_named_path(&records_ipc[0]),
            Some(("Items".to_string(), PathBuf::from("items.arrow")))
        );
    }

    #[test]
    fn test_parse_named_path_rejects_malformed() {
        assert_eq!(parse_named_path("items.arrow"), None);
        assert_eq!(parse_named_path("=items.arrow"), None);
        assert_eq!(parse_named_path("Items="), None);
    }
}
