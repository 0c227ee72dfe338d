//! Color palettes used to resolve `theme="n"` and `indexed="n"` style colors.

/// Theme color slot names ordered by their `theme="n"` index.
///
/// Excel swaps the first two pairs: index 0 is `lt1`, index 1 is `dk1`.
pub const TUP_THEME_SLOTS: [&str; 12] = [
    "lt1", "dk1", "lt2", "dk2", "accent1", "accent2", "accent3", "accent4", "accent5", "accent6",
    "hlink", "folHlink",
];

/// Legacy 64-entry palette addressed by `indexed="n"`.
const TUP_INDEXED_RGB: [u32; 64] = [
    0x000000, 0xFFFFFF, 0xFF0000, 0x00FF00, 0x0000FF, 0xFFFF00, 0xFF00FF, 0x00FFFF, //
    0x000000, 0xFFFFFF, 0xFF0000, 0x00FF00, 0x0000FF, 0xFFFF00, 0xFF00FF, 0x00FFFF, //
    0x800000, 0x008000, 0x000080, 0x808000, 0x800080, 0x008080, 0xC0C0C0, 0x808080, //
    0x9999FF, 0x993366, 0xFFFFCC, 0xCCFFFF, 0x660066, 0xFF8080, 0x0066CC, 0xCCCCFF, //
    0x000080, 0xFF00FF, 0xFFFF00, 0x00FFFF, 0x800080, 0x800000, 0x008080, 0x0000FF, //
    0x00CCFF, 0xCCFFFF, 0xCCFFCC, 0xFFFF99, 0x99CCFF, 0xFF99CC, 0xCC99FF, 0xFFCC99, //
    0x3366FF, 0x33CCCC, 0x99CC00, 0xFFCC00, 0xFF9900, 0xFF6600, 0x666699, 0x969696, //
    0x003366, 0x339966, 0x003300, 0x333300, 0x993300, 0x993366, 0x333399, 0x333333, //
];

/// RGB values (`0xRRGGBB`) of the twelve theme slots, in `theme="n"` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecThemePalette {
    l_rgb: [u32; 12],
}

impl Default for SpecThemePalette {
    /// The stock Office palette, used when the package has no theme part.
    fn default() -> Self {
        Self {
            l_rgb: [
                0xFFFFFF, 0x000000, 0xEEECE1, 0x1F497D, 0x4F81BD, 0xC0504D, 0x9BBB59, 0x8064A2,
                0x4BACC6, 0xF79646, 0x0000FF, 0x800080,
            ],
        }
    }
}

impl SpecThemePalette {
    /// RGB of theme index `idx`.
    pub fn color(&self, idx: usize) -> Option<u32> {
        self.l_rgb.get(idx).copied()
    }

    /// Overwrite the slot named `name` (`dk1`, `accent3`, ...). Unknown names
    /// are ignored.
    pub fn set_slot(&mut self, name: &str, rgb: u32) {
        if let Some(idx) = TUP_THEME_SLOTS.iter().position(|slot| *slot == name) {
            self.l_rgb[idx] = rgb & 0xFF_FFFF;
        }
    }
}

/// RGB of a legacy `indexed` color. System colors (64 and up) have no fixed
/// value.
pub fn derive_indexed_color(idx: usize) -> Option<u32> {
    TUP_INDEXED_RGB.get(idx).copied()
}

/// Parse `RRGGBB` or `AARRGGBB` hex into `0xRRGGBB`.
pub fn parse_rgb_hex(value: &str) -> Option<u32> {
    let c_hex = value.trim().trim_start_matches('#');
    match c_hex.len() {
        6 | 8 => u32::from_str_radix(c_hex, 16).ok().map(|rgb| rgb & 0xFF_FFFF),
        _ => None,
    }
}

/// Apply a style `tint` in `-1.0..=1.0`: negative darkens, positive lightens.
pub fn apply_tint(rgb: u32, tint: f64) -> u32 {
    if tint == 0.0 || !tint.is_finite() {
        return rgb;
    }
    let tint = tint.clamp(-1.0, 1.0);
    let tint_channel = |shift: u32| -> u32 {
        let c = ((rgb >> shift) & 0xFF) as f64;
        let c_new = if tint < 0.0 {
            c * (1.0 + tint)
        } else {
            c * (1.0 - tint) + 255.0 * tint
        };
        (c_new.round().clamp(0.0, 255.0) as u32) << shift
    };
    tint_channel(16) | tint_channel(8) | tint_channel(0)
}

/// `0xRRGGBB` -> `#RRGGBB`.
pub fn derive_rgb_hex(rgb: u32) -> String {
    format!("#{:06X}", rgb & 0xFF_FFFF)
}
