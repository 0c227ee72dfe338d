//! Stateless helper utilities used by the template engine.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};

use crate::conf::{
    C_FILE_EXTENSION, C_FILE_NAME_FALLBACK, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX,
    TUP_FILE_NAME_ILLEGAL,
};
use crate::spec::{EnumCoercedValue, SpecRowHeightPolicy};

static RE_A1_CELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\$?)([A-Z]{1,3})(\$?)([0-9]{1,7})").expect("a1 cell regex is valid")
});

////////////////////////////////////////////////////////////////////////////////
// #region CellReference

/// Convert a zero-based column index into its letter name (`0` -> `A`).
pub fn derive_col_name(col: usize) -> String {
    let mut n = col + 1;
    let mut l_chars = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        l_chars.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    l_chars.iter().rev().collect()
}

/// Parse a column letter name into a zero-based index (`AA` -> `26`).
pub fn parse_col_name(name: &str) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    let mut n: usize = 0;
    for ch in name.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let digit = (ch.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        n = n.checked_mul(26)?.checked_add(digit)?;
    }
    Some(n - 1)
}

/// Build an A1 reference from zero-based indices (`(0, 0)` -> `A1`).
pub fn derive_a1_ref(row: usize, col: usize) -> String {
    format!("{}{}", derive_col_name(col), row + 1)
}

/// Build an A1 range reference from zero-based bounds.
pub fn derive_a1_range(row_min: usize, col_min: usize, row_max: usize, col_max: usize) -> String {
    format!(
        "{}:{}",
        derive_a1_ref(row_min, col_min),
        derive_a1_ref(row_max, col_max)
    )
}

/// Parse an A1 reference (absolute `$` markers allowed) into zero-based `(row, col)`.
pub fn parse_a1_ref(reference: &str) -> Option<(usize, usize)> {
    let c_ref = reference.replace('$', "");
    let n_split = c_ref.find(|ch: char| ch.is_ascii_digit())?;
    let (c_col, c_row) = c_ref.split_at(n_split);
    let col = parse_col_name(c_col)?;
    let row = c_row.parse::<usize>().ok()?.checked_sub(1)?;
    Some((row, col))
}

/// Parse an A1 range (`A1:C3`, or a single cell) into zero-based bounds
/// `(row_min, col_min, row_max, col_max)`.
pub fn parse_a1_range(reference: &str) -> Option<(usize, usize, usize, usize)> {
    match reference.split_once(':') {
        Some((c_start, c_end)) => {
            let (row_a, col_a) = parse_a1_ref(c_start)?;
            let (row_b, col_b) = parse_a1_ref(c_end)?;
            Some((row_a, col_a, row_b, col_b))
        }
        None => {
            let (row, col) = parse_a1_ref(reference)?;
            Some((row, col, row, col))
        }
    }
}

/// Shift the relative parts of every A1 reference in `formula` by
/// `(n_rows, n_cols)`.
///
/// `$`-anchored parts stay fixed. Text inside string literals and quoted sheet
/// names is left alone, as are function names such as `LOG10(`. A reference
/// pushed above row 1 or left of column A becomes `#REF!`.
pub fn shift_formula_refs(formula: &str, n_rows: i64, n_cols: i64) -> String {
    let mut c_out = String::with_capacity(formula.len());
    let mut idx_last = 0usize;
    for caps in RE_A1_CELL.captures_iter(formula) {
        let Some(m) = caps.get(0) else {
            continue;
        };
        if !is_standalone_ref(formula, m.start(), m.end()) {
            continue;
        }
        let Some(c_ref) = derive_shifted_ref(&caps, n_rows, n_cols) else {
            continue;
        };
        c_out.push_str(&formula[idx_last..m.start()]);
        c_out.push_str(&c_ref);
        idx_last = m.end();
    }
    c_out.push_str(&formula[idx_last..]);
    c_out
}

fn is_standalone_ref(formula: &str, start: usize, end: usize) -> bool {
    let c_before = &formula[..start];
    if c_before.matches('"').count() % 2 == 1 || c_before.matches('\'').count() % 2 == 1 {
        return false;
    }
    let if_glued_before = c_before
        .chars()
        .next_back()
        .is_some_and(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.'));
    let if_glued_after = formula[end..]
        .chars()
        .next()
        .is_some_and(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '(' | '!'));
    !if_glued_before && !if_glued_after
}

fn derive_shifted_ref(caps: &Captures<'_>, n_rows: i64, n_cols: i64) -> Option<String> {
    let col = parse_col_name(&caps[2]).filter(|&col| col < N_NCOLS_EXCEL_MAX)? as i64;
    let row = caps[4]
        .parse::<usize>()
        .ok()
        .filter(|row| (1..=N_NROWS_EXCEL_MAX).contains(row))? as i64
        - 1;
    let (c_col_abs, c_row_abs) = (&caps[1], &caps[3]);
    let col_new = if c_col_abs.is_empty() { col + n_cols } else { col };
    let row_new = if c_row_abs.is_empty() { row + n_rows } else { row };
    let if_off_grid = col_new < 0
        || row_new < 0
        || col_new as usize >= N_NCOLS_EXCEL_MAX
        || row_new as usize >= N_NROWS_EXCEL_MAX;
    if if_off_grid {
        return Some("#REF!".to_string());
    }
    Some(format!(
        "{c_col_abs}{}{c_row_abs}{}",
        derive_col_name(col_new as usize),
        row_new + 1
    ))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region NumericText

/// Coerce bound cell text into a native number when it looks like one.
///
/// Thousands separators are removed first. Text with a leading zero not
/// followed by `.` (e.g. `0012`) stays text so identifiers keep their zeros.
pub fn coerce_numeric_text(text: &str) -> EnumCoercedValue {
    let c_clean = text.replace(',', "");
    let c_trim = c_clean.trim();
    let Ok(x) = c_trim.parse::<f64>() else {
        return EnumCoercedValue::Text(text.to_string());
    };
    if !x.is_finite() {
        return EnumCoercedValue::Text(text.to_string());
    }

    let if_leading_zero = c_trim.chars().count() > 1 && c_trim.starts_with('0') && !c_trim.starts_with("0.");
    if if_leading_zero {
        return EnumCoercedValue::Text(text.to_string());
    }

    if x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
        EnumCoercedValue::Integer(x as i64)
    } else {
        EnumCoercedValue::Float(x)
    }
}

/// Stringify a number, dropping the fractional part of integral values.
pub fn format_number_plain(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

/// Render a number with thousands separators and fixed decimals
/// (`1234.5` -> `1,234.50` for two decimals).
pub fn format_grouped_decimal(x: f64, n_decimals: usize) -> String {
    let c_fixed = format!("{:.*}", n_decimals, x.abs());
    let (c_int, c_frac) = match c_fixed.split_once('.') {
        Some((a, b)) => (a.to_string(), Some(b.to_string())),
        None => (c_fixed.clone(), None),
    };

    let n_len = c_int.len();
    let mut c_grouped = String::with_capacity(n_len + n_len / 3);
    for (idx, ch) in c_int.chars().enumerate() {
        if idx > 0 && (n_len - idx) % 3 == 0 {
            c_grouped.push(',');
        }
        c_grouped.push(ch);
    }

    let c_sign = if x < 0.0 && c_fixed.chars().any(|ch| ch != '0' && ch != '.') {
        "-"
    } else {
        ""
    };
    match c_frac {
        Some(frac) => format!("{c_sign}{c_grouped}.{frac}"),
        None => format!("{c_sign}{c_grouped}"),
    }
}

/// Whether a format code requests thousands grouping.
///
/// The `\#` token prefix consumes the first `#`, so `,##0.##` counts too.
pub fn is_grouped_number_format(fmt: &str) -> bool {
    fmt.contains("#,##0") || fmt.trim_start().starts_with(",##0")
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region DateText

/// Whether a format code looks like a date pattern (`dd`, `MM`, `yyyy`).
pub fn is_date_pattern(fmt: &str) -> bool {
    fmt.contains("dd") || fmt.contains("MM") || fmt.contains("yyyy")
}

/// Translate a `dd/MM/yyyy` style pattern into a chrono format string.
pub fn derive_chrono_pattern(fmt: &str) -> String {
    fmt.replace("yyyy", "%Y")
        .replace("MM", "%m")
        .replace("dd", "%d")
        .replace("HH", "%H")
        .replace("mm", "%M")
        .replace("ss", "%S")
}

/// Parse an ISO date or datetime string.
pub fn parse_iso_datetime(value: &str) -> Option<NaiveDateTime> {
    let c_value = value.trim();
    if c_value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(c_value) {
        return Some(dt.naive_local());
    }
    if c_value.contains('T') {
        // Offsets without a colon (`+0000`) and fractional seconds are trimmed.
        let c_head = c_value.split('+').next().unwrap_or(c_value);
        let c_head = c_head.split('.').next().unwrap_or(c_head);
        let c_head = c_head.trim_end_matches('Z');
        return NaiveDateTime::parse_from_str(c_head, "%Y-%m-%dT%H:%M:%S").ok();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(c_value, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(c_value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Render an ISO date string with a `dd/MM/yyyy` style pattern.
///
/// Returns `None` when the value is not an ISO date.
pub fn format_iso_date(value: &str, pattern: &str) -> Option<String> {
    let dt = parse_iso_datetime(value)?;
    Some(dt.format(&derive_chrono_pattern(pattern)).to_string())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region AmountInWords

const TUP_UNITS: [&str; 10] = [
    "", "One", "Two", "Three", "Four", "Five", "Six", "Seven", "Eight", "Nine",
];
const TUP_TEENS: [&str; 10] = [
    "", "Eleven", "Twelve", "Thirteen", "Fourteen", "Fifteen", "Sixteen", "Seventeen", "Eighteen",
    "Nineteen",
];
const TUP_TENS: [&str; 10] = [
    "", "Ten", "Twenty", "Thirty", "Forty", "Fifty", "Sixty", "Seventy", "Eighty", "Ninety",
];
const TUP_SCALES: [&str; 7] = [
    "",
    "Thousand",
    "Million",
    "Billion",
    "Trillion",
    "Quadrillion",
    "Quintillion",
];

fn spell_chunk(n: u64) -> String {
    let n = n as usize;
    match n {
        0 => String::new(),
        1..=9 => TUP_UNITS[n].to_string(),
        10 => TUP_TENS[1].to_string(),
        11..=19 => TUP_TEENS[n - 10].to_string(),
        20..=99 => {
            if n % 10 > 0 {
                format!("{} {}", TUP_TENS[n / 10], TUP_UNITS[n % 10])
            } else {
                TUP_TENS[n / 10].to_string()
            }
        }
        _ => {
            let c_head = format!("{} Hundred", TUP_UNITS[n / 100]);
            if n % 100 > 0 {
                format!("{c_head} {}", spell_chunk((n % 100) as u64))
            } else {
                c_head
            }
        }
    }
}

/// Spell an integer in English words (`1234` -> `One Thousand Two Hundred Thirty Four`).
pub fn spell_number_en(n: i64) -> String {
    if n < 0 {
        return format!("Minus {}", spell_number_en_unsigned(n.unsigned_abs()));
    }
    spell_number_en_unsigned(n as u64)
}

fn spell_number_en_unsigned(mut n: u64) -> String {
    if n == 0 {
        return "Zero".to_string();
    }
    let mut l_parts: Vec<String> = Vec::new();
    let mut idx_scale = 0;
    while n > 0 {
        let chunk = n % 1000;
        if chunk > 0 {
            let mut part = spell_chunk(chunk);
            if idx_scale > 0 {
                part.push(' ');
                part.push_str(TUP_SCALES[idx_scale]);
            }
            l_parts.push(part);
        }
        n /= 1000;
        idx_scale += 1;
    }
    l_parts.reverse();
    l_parts.join(" ")
}

/// Spell a US dollar amount, e.g. `12.5` -> `Twelve US Dollars And Fifty Cents Only`.
pub fn spell_amount_usd(amount: f64) -> String {
    if !amount.is_finite() {
        return String::new();
    }
    let n_dollars = amount.trunc() as i64;
    let n_cents = ((amount - amount.trunc()) * 100.0).round() as i64;

    let mut text = format!("{} US Dollars", spell_number_en(n_dollars));
    if n_cents > 0 {
        text.push_str(&format!(" And {} Cents", spell_number_en(n_cents)));
    }
    format!("{} Only", text.trim())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region OutputNaming

/// Replace characters illegal in file names with `_`; blank input maps to `Unknown`.
pub fn sanitize_file_name(name: &str) -> String {
    if name.is_empty() {
        return C_FILE_NAME_FALLBACK.to_string();
    }
    name.chars()
        .map(|ch| {
            if TUP_FILE_NAME_ILLEGAL.contains(&ch) {
                '_'
            } else {
                ch
            }
        })
        .collect()
}

/// Build `{prefix}{sanitized id}_{YYYYmmdd_HHMMSS}.xlsx`.
pub fn derive_output_file_name(prefix: &str, entity_id: &str, timestamp: NaiveDateTime) -> String {
    format!(
        "{prefix}{}_{}.{C_FILE_EXTENSION}",
        sanitize_file_name(entity_id),
        timestamp.format("%Y%m%d_%H%M%S")
    )
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowHeightEstimate

/// Estimate wrapped line count of `text` in a column of `width_col` characters.
pub fn estimate_line_count(text: &str, width_col: Option<f64>, policy: &SpecRowHeightPolicy) -> usize {
    let width = match width_col {
        Some(val) if val > 0.0 => val,
        _ => policy.width_col_default,
    };
    let mut n_chars_per_line = (width * policy.ratio_chars_per_width) as usize;
    if n_chars_per_line < policy.n_chars_per_line_min {
        n_chars_per_line = policy.width_col_default as usize;
    }
    let n_chars_per_line = n_chars_per_line.max(1);

    let n_lines_explicit = text.matches('\n').count() + 1;
    let n_lines_wrap = text.chars().count() / n_chars_per_line + 1;
    n_lines_explicit.max(n_lines_wrap)
}

/// Height (points) required to display `n_lines` lines, padding included.
pub fn derive_required_height(n_lines: usize, policy: &SpecRowHeightPolicy) -> f64 {
    let height = if n_lines > 1 {
        n_lines as f64 * policy.height_line_base
    } else {
        policy.height_single_line
    };
    height + policy.height_padding
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Tests

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_col_name_round_trip() {
        for (col, name) in [(0, "A"), (25, "Z"), (26, "AA"), (27, "AB"), (701, "ZZ"), (702, "AAA")] {
            assert_eq!(derive_col_name(col), name);
            assert_eq!(parse_col_name(name), Some(col));
        }
        assert_eq!(parse_col_name(""), None);
        assert_eq!(parse_col_name("A1"), None);
    }

    #[test]
    fn test_parse_a1_ref_and_range() {
        assert_eq!(parse_a1_ref("A1"), Some((0, 0)));
        assert_eq!(parse_a1_ref("$C$12"), Some((11, 2)));
        assert_eq!(parse_a1_ref("A0"), None);
        assert_eq!(parse_a1_range("B2:D4"), Some((1, 1, 3, 3)));
        assert_eq!(parse_a1_range("E5"), Some((4, 4, 4, 4)));
        assert_eq!(derive_a1_range(0, 0, 1, 9), "A1:J2");
    }

    #[test]
    fn test_shift_formula_refs() {
        assert_eq!(shift_formula_refs("A1*2", 1, 0), "A2*2");
        assert_eq!(
            shift_formula_refs("SUM($A1:B$2)+LOG10(C3)", 2, 1),
            "SUM($A3:C$2)+LOG10(D5)"
        );
        assert_eq!(shift_formula_refs("\"A1\"&A1", 1, 0), "\"A1\"&A2");
        assert_eq!(shift_formula_refs("'Q1 2024'!B2*Rate", 1, 0), "'Q1 2024'!B3*Rate");
        assert_eq!(shift_formula_refs("A1+B2", -1, 0), "#REF!+B1");
        assert_eq!(shift_formula_refs("$A$1", 5, 5), "$A$1");
    }

    #[test]
    fn test_coerce_numeric_text() {
        assert_eq!(coerce_numeric_text("1234.5"), EnumCoercedValue::Float(1234.5));
        assert_eq!(coerce_numeric_text("1,234"), EnumCoercedValue::Integer(1234));
        assert_eq!(coerce_numeric_text("5"), EnumCoercedValue::Integer(5));
        assert_eq!(coerce_numeric_text("0"), EnumCoercedValue::Integer(0));
        assert_eq!(coerce_numeric_text("0.75"), EnumCoercedValue::Float(0.75));
        assert_eq!(
            coerce_numeric_text("0012"),
            EnumCoercedValue::Text("0012".to_string())
        );
        assert_eq!(
            coerce_numeric_text("12 pcs"),
            EnumCoercedValue::Text("12 pcs".to_string())
        );
        assert_eq!(coerce_numeric_text(""), EnumCoercedValue::Text(String::new()));
        assert_eq!(
            coerce_numeric_text("NaN"),
            EnumCoercedValue::Text("NaN".to_string())
        );
    }

    #[test]
    fn test_format_numbers() {
        assert_eq!(format_number_plain(5.0), "5");
        assert_eq!(format_number_plain(-3.0), "-3");
        assert_eq!(format_number_plain(2.5), "2.5");
        assert_eq!(format_grouped_decimal(1234.5, 2), "1,234.50");
        assert_eq!(format_grouped_decimal(1234567.0, 2), "1,234,567.00");
        assert_eq!(format_grouped_decimal(-999.999, 2), "-1,000.00");
        assert_eq!(format_grouped_decimal(12.0, 0), "12");
        assert_eq!(format_grouped_decimal(-0.001, 2), "0.00");
    }

    #[test]
    fn test_is_grouped_number_format() {
        assert!(is_grouped_number_format("#,##0.00"));
        assert!(is_grouped_number_format(",##0.##"));
        assert!(is_grouped_number_format(" ,##0"));
        assert!(!is_grouped_number_format("0.00"));
        assert!(!is_grouped_number_format("dd/MM/yyyy"));
        assert!(!is_grouped_number_format("x,##0"));
    }

    #[test]
    fn test_format_iso_date() {
        assert_eq!(
            format_iso_date("2024-03-05", "dd/MM/yyyy"),
            Some("05/03/2024".to_string())
        );
        assert_eq!(
            format_iso_date("2024-03-05T10:20:30.000+0000", "dd/MM/yyyy"),
            Some("05/03/2024".to_string())
        );
        assert_eq!(
            format_iso_date("2024-12-31T23:00:00Z", "yyyy-MM-dd"),
            Some("2024-12-31".to_string())
        );
        assert_eq!(format_iso_date("soon", "dd/MM/yyyy"), None);
        assert!(is_date_pattern("dd/MM/yyyy"));
        assert!(!is_date_pattern("#,##0.##"));
    }

    #[test]
    fn test_spell_amount_usd() {
        assert_eq!(spell_number_en(0), "Zero");
        assert_eq!(spell_number_en(10), "Ten");
        assert_eq!(spell_number_en(115), "One Hundred Fifteen");
        assert_eq!(
            spell_number_en(1_002_030),
            "One Million Two Thousand Thirty"
        );
        assert_eq!(spell_number_en(-7), "Minus Seven");
        assert_eq!(
            spell_amount_usd(1250.5),
            "One Thousand Two Hundred Fifty US Dollars And Fifty Cents Only"
        );
        assert_eq!(spell_amount_usd(3.0), "Three US Dollars Only");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("PO/2024:01?"), "PO_2024_01_");
        assert_eq!(sanitize_file_name(""), "Unknown");
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .unwrap();
        assert_eq!(
            derive_output_file_name("PI_", "C<1>", ts),
            "PI_C_1__20240102_030405.xlsx"
        );
    }

    #[test]
    fn test_estimate_line_count_and_height() {
        let policy = SpecRowHeightPolicy::default();
        assert_eq!(estimate_line_count("short", Some(20.0), &policy), 1);
        assert_eq!(estimate_line_count("a\nb\nc", Some(20.0), &policy), 3);
        // width 20 -> 24 chars per line
        assert_eq!(estimate_line_count(&"x".repeat(50), Some(20.0), &policy), 3);
        // width 5 -> 6 chars per line, below minimum -> 30
        assert_eq!(estimate_line_count(&"x".repeat(50), Some(5.0), &policy), 2);
        assert_eq!(derive_required_height(1, &policy), 40.0);
        assert_eq!(derive_required_height(3, &policy), 85.0);
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
