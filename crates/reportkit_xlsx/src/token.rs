//! Placeholder token resolution (`{{key}}`, `{{key\#fmt}}`, `{{key\@fmt}}`).

use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::conf::{C_NONE_LITERAL, C_TABLE_END_PREFIX, C_TABLE_START_PREFIX};
use crate::context::{EnumScalarValue, LookupScope};
use crate::util::{format_grouped_decimal, format_iso_date, is_date_pattern, is_grouped_number_format};

static RE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]+?)\}\}").expect("token regex is valid"));
static RE_ANY_BRACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{.*?\}\}").expect("brace regex is valid"));

/// Resolved cell text plus the keys that did not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecResolvedText {
    /// Text with every placeholder substituted.
    pub text: String,
    /// Keys absent from the scope, in order of appearance.
    pub keys_missing: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumTokenFormat<'a> {
    Plain,
    Number(&'a str),
    Date(&'a str),
}

/// Whether text holds at least one `{{...}}` sequence.
pub fn has_tokens(text: &str) -> bool {
    text.contains("{{") && RE_ANY_BRACES.is_match(text)
}

/// Resolve every placeholder in `text` against `scope`.
///
/// Missing keys and `Null` values resolve to empty text. Table markers and
/// conditional syntax are left untouched.
pub fn resolve_tokens<S: LookupScope + ?Sized>(text: &str, scope: &S) -> SpecResolvedText {
    if !text.contains("{{") {
        return SpecResolvedText {
            text: text.to_string(),
            keys_missing: Vec::new(),
        };
    }

    let mut keys_missing = Vec::new();
    let text = RE_TOKEN
        .replace_all(text, |caps: &Captures<'_>| {
            let c_inner = &caps[1];
            if is_reserved_token(c_inner) {
                return caps[0].to_string();
            }
            let (key, fmt) = split_token(c_inner);
            match scope.lookup(key) {
                Some(value) => render_value(value, fmt),
                None => {
                    debug!(key = %key, "Placeholder key not found in scope; resolving to empty");
                    keys_missing.push(key.to_string());
                    String::new()
                }
            }
        })
        .into_owned();
    SpecResolvedText { text, keys_missing }
}

/// Resolve placeholders in one cell's text.
pub fn resolve_cell<S: LookupScope + ?Sized>(text: &str, scope: &S) -> String {
    resolve_tokens(text, scope).text
}

/// Remove every `{{...}}` sequence, markers included.
pub fn strip_tokens(text: &str) -> String {
    RE_ANY_BRACES.replace_all(text, "").into_owned()
}

/// Remove literal `None` left behind by upstream null stringification.
pub fn strip_none_literal(text: &str) -> String {
    text.replace(C_NONE_LITERAL, "")
}

fn is_reserved_token(inner: &str) -> bool {
    let c_inner = inner.trim_start();
    c_inner.starts_with("#if")
        || c_inner.starts_with("/if")
        || c_inner.trim_end() == "else"
        || c_inner.starts_with(C_TABLE_START_PREFIX)
        || c_inner.starts_with(C_TABLE_END_PREFIX)
}

fn split_token(inner: &str) -> (&str, EnumTokenFormat<'_>) {
    if let Some((key, fmt)) = inner.split_once("\\#") {
        return (key.trim(), EnumTokenFormat::Number(fmt.trim()));
    }
    if let Some((key, fmt)) = inner.split_once("\\@") {
        return (key.trim(), EnumTokenFormat::Date(fmt.trim()));
    }
    (inner.trim(), EnumTokenFormat::Plain)
}

fn render_value(value: &EnumScalarValue, fmt: EnumTokenFormat<'_>) -> String {
    if matches!(value, EnumScalarValue::Null) {
        return String::new();
    }
    let c_text = value.to_text();
    match fmt {
        EnumTokenFormat::Plain => c_text,
        EnumTokenFormat::Number(fmt) => {
            if is_grouped_number_format(fmt)
                && let Some(x) = value.as_f64()
            {
                return format_grouped_decimal(x, 2);
            }
            if is_date_pattern(fmt)
                && let Some(c_date) = format_iso_date(&c_text, fmt)
            {
                return c_date;
            }
            c_text
        }
        EnumTokenFormat::Date(fmt) => format_iso_date(&c_text, fmt).unwrap_or(c_text),
    }
}
