//! Runtime data context: scalar fields plus named record lists.

use std::collections::BTreeMap;
use std::io::Cursor;

use polars::prelude::{AnyValue, DataFrame, IpcReader, SerReader};
use serde_json::Value;

use crate::error::{Result, TemplateError};
use crate::util::format_number_plain;

////////////////////////////////////////////////////////////////////////////////
// #region ScalarValue

/// Scalar value bound into placeholders.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EnumScalarValue {
    /// Missing value.
    #[default]
    Null,
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
}

impl EnumScalarValue {
    /// Stringify the value; `Null` becomes empty.
    pub fn to_text(&self) -> String {
        match self {
            EnumScalarValue::Null => String::new(),
            EnumScalarValue::String(s) => s.clone(),
            EnumScalarValue::Number(n) => format_number_plain(*n),
            EnumScalarValue::Boolean(b) => if *b { "True" } else { "False" }.to_string(),
        }
    }

    /// Numeric view: numbers, and text that parses as a finite number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EnumScalarValue::Number(n) => Some(*n),
            EnumScalarValue::String(s) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
            _ => None,
        }
    }

    /// Whether the value is `Null` or blank text.
    pub fn is_blank(&self) -> bool {
        match self {
            EnumScalarValue::Null => true,
            EnumScalarValue::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for EnumScalarValue {
    fn from(value: &str) -> Self {
        EnumScalarValue::String(value.to_string())
    }
}

impl From<String> for EnumScalarValue {
    fn from(value: String) -> Self {
        EnumScalarValue::String(value)
    }
}

impl From<f64> for EnumScalarValue {
    fn from(value: f64) -> Self {
        EnumScalarValue::Number(value)
    }
}

impl From<i64> for EnumScalarValue {
    fn from(value: i64) -> Self {
        EnumScalarValue::Number(value as f64)
    }
}

impl From<bool> for EnumScalarValue {
    fn from(value: bool) -> Self {
        EnumScalarValue::Boolean(value)
    }
}

/// One row of a record list.
pub type SpecRecord = BTreeMap<String, EnumScalarValue>;

/// Anything placeholders can be resolved against.
pub trait LookupScope {
    /// Look up a dotted key.
    fn lookup(&self, key: &str) -> Option<&EnumScalarValue>;
}

impl LookupScope for SpecRecord {
    fn lookup(&self, key: &str) -> Option<&EnumScalarValue> {
        self.get(key)
    }
}

/// A record layered over a fallback scope: record keys win, everything else
/// falls through to `fallback` (usually the [`DataContext`]).
#[derive(Debug)]
pub struct LayeredScope<'a, S: ?Sized> {
    record: &'a SpecRecord,
    fallback: &'a S,
}

impl<'a, S: LookupScope + ?Sized> LayeredScope<'a, S> {
    pub fn new(record: &'a SpecRecord, fallback: &'a S) -> Self {
        Self { record, fallback }
    }
}

impl<S: LookupScope + ?Sized> LookupScope for LayeredScope<'_, S> {
    fn lookup(&self, key: &str) -> Option<&EnumScalarValue> {
        self.record.get(key).or_else(|| self.fallback.lookup(key))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region DataContext

/// Read-only key/value and key/record-list structure of one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataContext {
    dict_fields: BTreeMap<String, EnumScalarValue>,
    dict_records: BTreeMap<String, Vec<SpecRecord>>,
}

impl LookupScope for DataContext {
    fn lookup(&self, key: &str) -> Option<&EnumScalarValue> {
        self.dict_fields.get(key)
    }
}

impl DataContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace one scalar field.
    pub fn insert_field(&mut self, key: impl Into<String>, value: impl Into<EnumScalarValue>) {
        self.dict_fields.insert(key.into(), value.into());
    }

    /// Builder-style variant of [`Self::insert_field`].
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<EnumScalarValue>) -> Self {
        self.insert_field(key, value);
        self
    }

    /// Borrow one scalar field.
    pub fn field(&self, key: &str) -> Option<&EnumScalarValue> {
        self.dict_fields.get(key)
    }

    /// All scalar fields.
    pub fn fields(&self) -> &BTreeMap<String, EnumScalarValue> {
        &self.dict_fields
    }

    /// Insert or replace one record list.
    pub fn insert_records(&mut self, name: impl Into<String>, records: Vec<SpecRecord>) {
        self.dict_records.insert(name.into(), records);
    }

    /// Builder-style variant of [`Self::insert_records`].
    pub fn with_records(mut self, name: impl Into<String>, records: Vec<SpecRecord>) -> Self {
        self.insert_records(name, records);
        self
    }

    /// Records of a named list; empty when absent.
    pub fn records(&self, name: &str) -> &[SpecRecord] {
        self.dict_records
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Names of all record lists.
    pub fn record_list_names(&self) -> Vec<&str> {
        self.dict_records.keys().map(String::as_str).collect()
    }

    // JSON

    /// Build a context from a JSON object.
    ///
    /// Nested objects flatten into dotted keys (`Contract__r.Name`); arrays of
    /// objects become record lists under their dotted key; arrays of scalars
    /// are joined with `, `.
    pub fn from_json_value(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(TemplateError::Context(
                "data context root must be a JSON object".to_string(),
            ));
        };
        let mut ctx = DataContext::new();
        for (key, val) in map {
            ctx.insert_json(key, val);
        }
        Ok(ctx)
    }

    /// Build a context from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| TemplateError::Context(format!("invalid data context JSON: {err}")))?;
        Self::from_json_value(&value)
    }

    fn insert_json(&mut self, key: &str, value: &Value) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    self.insert_json(&format!("{key}.{k}"), v);
                }
            }
            Value::Array(items) if items.iter().any(Value::is_object) => {
                let l_records = items
                    .iter()
                    .filter_map(|item| match item {
                        Value::Object(_) => {
                            let mut record = SpecRecord::new();
                            flatten_json_into(&mut record, None, item);
                            Some(record)
                        }
                        _ => None,
                    })
                    .collect();
                self.insert_records(key, l_records);
            }
            _ => {
                self.dict_fields
                    .insert(key.to_string(), derive_scalar_from_json(value));
            }
        }
    }

    // DataFrame

    /// Insert a record list from a DataFrame (one record per row).
    pub fn insert_records_from_dataframe(&mut self, name: impl Into<String>, df: &DataFrame) -> Result<()> {
        let l_cols = df.get_columns();
        let mut l_records = Vec::with_capacity(df.height());
        for idx_row in 0..df.height() {
            let mut record = SpecRecord::new();
            for col in l_cols {
                let value = col.get(idx_row).map_err(|err| {
                    TemplateError::Context(format!("Failed to read record value: {err}"))
                })?;
                record.insert(col.name().to_string(), derive_scalar_from_any_value(value));
            }
            l_records.push(record);
        }
        self.insert_records(name, l_records);
        Ok(())
    }

    /// Insert a record list from Polars IPC bytes.
    pub fn insert_records_from_ipc_bytes(&mut self, name: impl Into<String>, v_ipc_df: &[u8]) -> Result<()> {
        let df = derive_dataframe_from_ipc_bytes(v_ipc_df)?;
        self.insert_records_from_dataframe(name, &df)
    }
}

fn flatten_json_into(record: &mut SpecRecord, prefix: Option<&str>, value: &Value) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = match prefix {
                    Some(p) => format!("{p}.{k}"),
                    None => k.clone(),
                };
                flatten_json_into(record, Some(&key), v);
            }
        }
        _ => {
            if let Some(key) = prefix {
                record.insert(key.to_string(), derive_scalar_from_json(value));
            }
        }
    }
}

fn derive_scalar_from_json(value: &Value) -> EnumScalarValue {
    match value {
        Value::Null => EnumScalarValue::Null,
        Value::Bool(b) => EnumScalarValue::Boolean(*b),
        Value::Number(n) => n
            .as_f64()
            .map(EnumScalarValue::Number)
            .unwrap_or_else(|| EnumScalarValue::String(n.to_string())),
        Value::String(s) => EnumScalarValue::String(s.clone()),
        Value::Array(items) => EnumScalarValue::String(
            items
                .iter()
                .map(|item| derive_scalar_from_json(item).to_text())
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Value::Object(_) => EnumScalarValue::String(value.to_string()),
    }
}

fn derive_dataframe_from_ipc_bytes(v_ipc_df: &[u8]) -> Result<DataFrame> {
    IpcReader::new(Cursor::new(v_ipc_df))
        .finish()
        .map_err(|err| TemplateError::Context(format!("Failed to read IPC DataFrame bytes: {err}")))
}

fn derive_scalar_from_any_value(value: AnyValue<'_>) -> EnumScalarValue {
    match value {
        AnyValue::Null => EnumScalarValue::Null,
        AnyValue::String(val) => EnumScalarValue::String(val.to_string()),
        AnyValue::StringOwned(val) => EnumScalarValue::String(val.to_string()),
        AnyValue::Boolean(val) => EnumScalarValue::Boolean(val),
        AnyValue::UInt8(val) => EnumScalarValue::Number(val as f64),
        AnyValue::UInt16(val) => EnumScalarValue::Number(val as f64),
        AnyValue::UInt32(val) => EnumScalarValue::Number(val as f64),
        AnyValue::UInt64(val) => EnumScalarValue::Number(val as f64),
        AnyValue::Int8(val) => EnumScalarValue::Number(val as f64),
        AnyValue::Int16(val) => EnumScalarValue::Number(val as f64),
        AnyValue::Int32(val) => EnumScalarValue::Number(val as f64),
        AnyValue::Int64(val) => EnumScalarValue::Number(val as f64),
        AnyValue::Int128(val) => EnumScalarValue::Number(val as f64),
        AnyValue::Float32(val) => EnumScalarValue::Number(val as f64),
        AnyValue::Float64(val) => EnumScalarValue::Number(val),
        _ => EnumScalarValue::String(value.to_string()),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Tests


// #endregion
////////////////////////////////////////////////////////////////////////////////
