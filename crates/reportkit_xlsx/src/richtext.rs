//! Rich-text segmentation of bound cell text.
//!
//! Runs inherit the destination cell's font family, size and color; only the
//! bold flag varies between runs.

use std::borrow::Cow;
use std::sync::LazyLock;

use quick_xml::escape::{resolve_predefined_entity, unescape_with};
use regex::Regex;

use crate::spec::{SpecFont, SpecTextRun};

static RE_HTML_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</p\s*>|</div\s*>").expect("html break regex is valid")
});
static RE_HTML_BOLD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:b|strong)\b[^>]*>(.*?)</(?:b|strong)\s*>").expect("html bold regex is valid")
});
static RE_HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("html tag regex is valid"));
static RE_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{2,}").expect("newline regex is valid"));
static RE_PLAIN_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:br\s*/?|/p|/div|/tr)\s*>").expect("plain break regex is valid")
});
static RE_LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<li\b[^>]*>").expect("list item regex is valid"));
static RE_NAME_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^\d(]+)").expect("name prefix regex is valid"));

fn derive_run(text: impl Into<String>, bold: bool, font: &SpecFont) -> SpecTextRun {
    SpecTextRun {
        text: text.into(),
        bold,
        font: font.clone(),
    }
}

/// Bold the text before the first `delimiter`; the remainder (delimiter
/// included) stays normal. Text without the delimiter is one normal run.
pub fn segment_before_delimiter(text: &str, delimiter: char, font: &SpecFont) -> Vec<SpecTextRun> {
    match text.find(delimiter) {
        Some(idx) if idx > 0 => vec![
            derive_run(&text[..idx], true, font),
            derive_run(&text[idx..], false, font),
        ],
        _ => vec![derive_run(text, false, font)],
    }
}

/// Bold the first occurrence of `name`'s leading text (everything before the
/// first digit or `(`) inside `text`.
pub fn segment_bold_target(text: &str, name: &str, font: &SpecFont) -> Vec<SpecTextRun> {
    let c_target = RE_NAME_PREFIX
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or_default();
    let Some(idx) = (!c_target.is_empty()).then(|| text.find(c_target)).flatten() else {
        return vec![derive_run(text, false, font)];
    };

    let idx_end = idx + c_target.len();
    let mut l_runs = Vec::with_capacity(3);
    if idx > 0 {
        l_runs.push(derive_run(&text[..idx], false, font));
    }
    l_runs.push(derive_run(c_target, true, font));
    if idx_end < text.len() {
        l_runs.push(derive_run(&text[idx_end..], false, font));
    }
    l_runs
}

/// Convert simple HTML into runs: `<br>`, `</p>` and `</div>` become
/// newlines, `<b>`/`<strong>` spans become bold, other tags are stripped,
/// entities are unescaped and repeated newlines collapse.
pub fn segment_html(html: &str, font: &SpecFont) -> Vec<SpecTextRun> {
    let c_text = RE_HTML_BREAK.replace_all(html, "\n");

    let mut l_raw: Vec<(String, bool)> = Vec::new();
    let mut idx_last = 0;
    for caps in RE_HTML_BOLD.captures_iter(&c_text) {
        let (Some(m_all), Some(m_inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        l_raw.push((c_text[idx_last..m_all.start()].to_string(), false));
        l_raw.push((m_inner.as_str().to_string(), true));
        idx_last = m_all.end();
    }
    l_raw.push((c_text[idx_last..].to_string(), false));

    let mut l_runs: Vec<SpecTextRun> = Vec::new();
    for (c_part, bold) in l_raw {
        let c_part = unescape_html(&RE_HTML_TAG.replace_all(&c_part, ""));
        let mut c_part = RE_NEWLINES.replace_all(&c_part, "\n").into_owned();
        if let Some(prev) = l_runs.last()
            && prev.text.ends_with('\n')
        {
            c_part = c_part.trim_start_matches('\n').to_string();
        }
        if l_runs.is_empty() {
            c_part = c_part.trim_start_matches('\n').to_string();
        }
        if c_part.is_empty() {
            continue;
        }
        match l_runs.last_mut() {
            Some(prev) if prev.bold == bold => prev.text.push_str(&c_part),
            _ => l_runs.push(derive_run(c_part, bold, font)),
        }
    }

    while let Some(last) = l_runs.last_mut() {
        let n_keep = last.text.trim_end_matches('\n').len();
        last.text.truncate(n_keep);
        if !last.text.is_empty() {
            break;
        }
        l_runs.pop();
    }
    l_runs
}

/// Convert HTML into plain multi-line text: list items become `- ` bullets,
/// lines are trimmed and blank lines dropped.
pub fn html_to_plain_text(html: &str) -> String {
    let c_text = RE_PLAIN_BREAK.replace_all(html, "\n");
    let c_text = RE_LIST_ITEM.replace_all(&c_text, "\n- ");
    let c_text = RE_HTML_TAG.replace_all(&c_text, "");
    let c_text = unescape_html(&c_text);
    c_text
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn resolve_html_entity(entity: &str) -> Option<&'static str> {
    resolve_predefined_entity(entity).or(match entity {
        "nbsp" | "ensp" | "emsp" | "thinsp" => Some(" "),
        "ndash" => Some("\u{2013}"),
        "mdash" => Some("\u{2014}"),
        "hellip" => Some("\u{2026}"),
        "deg" => Some("\u{b0}"),
        "times" => Some("\u{d7}"),
        _ => None,
    })
}

/// Unescape entities; text with a stray `&` falls back to replacing the
/// common entities one by one.
fn unescape_html(text: &str) -> String {
    match unescape_with(text, resolve_html_entity) {
        Ok(Cow::Borrowed(val)) => val.to_string(),
        Ok(Cow::Owned(val)) => val,
        Err(_) => text
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&"),
    }
}
