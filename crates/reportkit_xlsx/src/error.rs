//! Error taxonomy of the template engine.

use rust_xlsxwriter::XlsxError;
use thiserror::Error;

use crate::spec::SpecMergeRange;

/// Failures while loading an XLSX template package.
#[derive(Debug, Error)]
pub enum XlsxReadError {
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid cell reference: {0}")]
    InvalidRef(String),
    #[error("missing package part: {0}")]
    MissingPart(String),
    #[error("malformed package part `{part}`: {reason}")]
    Malformed { part: String, reason: String },
}

/// Failures of one document generation.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A required table marker is absent from the template.
    #[error("table marker `{marker}` not found in sheet `{sheet}`")]
    TemplateStructure { marker: String, sheet: String },
    #[error("sheet not found: {0}")]
    SheetNotFound(String),
    /// Merge range overlapping an existing merge.
    #[error("merge {} overlaps existing merge {}", range.to_a1(), existing.to_a1())]
    MergeConflict {
        range: SpecMergeRange,
        existing: SpecMergeRange,
    },
    #[error("{axis} index overflow: {value}")]
    IndexOverflow { axis: &'static str, value: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("template read error: {0}")]
    Read(#[from] XlsxReadError),
    #[error("xlsx write error: {0}")]
    Write(#[from] XlsxError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("data context error: {0}")]
    Context(String),
    #[error("failed to persist output file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Result alias used across the kernel.
pub type Result<T, E = TemplateError> = std::result::Result<T, E>;
