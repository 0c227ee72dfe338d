//! Checkbox block rendering for picklist-style fields.

use crate::conf::{C_GLYPH_CHECKED, C_GLYPH_UNCHECKED};

/// Render one `glyph label` line per option, newline-joined.
///
/// An option is checked when it equals the trimmed `selected` value
/// case-insensitively.
pub fn render_checkboxes<T: AsRef<str>>(options: &[T], selected: &str, uppercase: bool) -> String {
    render_checkboxes_with_glyphs(options, selected, uppercase, C_GLYPH_CHECKED, C_GLYPH_UNCHECKED)
}

/// [`render_checkboxes`] with caller-supplied glyphs.
pub fn render_checkboxes_with_glyphs<T: AsRef<str>>(
    options: &[T],
    selected: &str,
    uppercase: bool,
    glyph_checked: &str,
    glyph_unchecked: &str,
) -> String {
    let c_selected = selected.trim().to_uppercase();
    options
        .iter()
        .map(|opt| {
            let c_label = opt.as_ref();
            let if_selected = c_label.to_uppercase() == c_selected;
            let c_glyph = if if_selected { glyph_checked } else { glyph_unchecked };
            if uppercase {
                format!("{c_glyph} {}", c_label.to_uppercase())
            } else {
                format!("{c_glyph} {c_label}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
