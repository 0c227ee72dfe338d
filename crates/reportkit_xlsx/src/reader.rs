//! XLSX template loader.
//!
//! Streams the package parts with `quick-xml` straight out of the `zip`
//! archive and builds the in-memory [`SpecWorkbook`] working copy: sheet
//! order, active tab, shared strings, `cellXfs` styles, cell values, merged
//! ranges, row heights and column widths.
//!
//! Theme and indexed colors resolve to `#RRGGBB`, rich shared strings keep
//! their runs, and shared-formula dependents are re-anchored from their
//! master.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::conf::N_NCOLS_TEMPLATE_WIDTH_MAX;
use crate::error::XlsxReadError;
use crate::sheet::{SheetGrid, SpecWorkbook};
use crate::spec::{EnumCellValue, SpecCell, SpecCellStyle, SpecMergeRange, SpecTextRun};
use crate::theme::{
    SpecThemePalette, apply_tint, derive_indexed_color, derive_rgb_hex, parse_rgb_hex,
};
use crate::util::{parse_a1_range, parse_a1_ref, shift_formula_refs};

type ReadResult<T> = Result<T, XlsxReadError>;

const C_PART_WORKBOOK: &str = "xl/workbook.xml";
const C_PART_WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const C_PART_SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const C_PART_STYLES: &str = "xl/styles.xml";
const C_PART_THEME: &str = "xl/theme/theme1.xml";
/// First custom number-format id; lower ids are built in.
const N_NUM_FMT_ID_CUSTOM_MIN: u32 = 164;

////////////////////////////////////////////////////////////////////////////////
// #region EntryPoints

/// Load a template workbook from disk.
pub fn read_workbook_from_path(path: &Path) -> ReadResult<SpecWorkbook> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    read_workbook(&mut archive)
}

/// Load a template workbook from an in-memory XLSX payload.
pub fn read_workbook_from_bytes(v_xlsx: &[u8]) -> ReadResult<SpecWorkbook> {
    let mut archive = ZipArchive::new(Cursor::new(v_xlsx))?;
    read_workbook(&mut archive)
}

fn read_workbook<R: Read + Seek>(archive: &mut ZipArchive<R>) -> ReadResult<SpecWorkbook> {
    let xml_workbook = read_zip_part(archive, C_PART_WORKBOOK)?
        .ok_or_else(|| XlsxReadError::MissingPart(C_PART_WORKBOOK.to_string()))?;
    let (l_sheet_refs, idx_active) = parse_workbook_xml(&xml_workbook)?;

    let dict_targets = match read_zip_part(archive, C_PART_WORKBOOK_RELS)? {
        Some(xml) => parse_relationships_xml(&xml)?,
        None => BTreeMap::new(),
    };
    let palette = match read_zip_part(archive, C_PART_THEME)? {
        Some(xml) => parse_theme_xml(&xml)?,
        None => SpecThemePalette::default(),
    };
    let l_shared_strings = match read_zip_part(archive, C_PART_SHARED_STRINGS)? {
        Some(xml) => parse_shared_strings_xml(&xml, &palette)?,
        None => Vec::new(),
    };
    let l_styles = match read_zip_part(archive, C_PART_STYLES)? {
        Some(xml) => parse_styles_xml(&xml, &palette)?,
        None => Vec::new(),
    };

    let mut l_sheets = Vec::with_capacity(l_sheet_refs.len());
    for (idx, (sheet_name, rel_id)) in l_sheet_refs.iter().enumerate() {
        let path_part = dict_targets
            .get(rel_id)
            .map(|target| derive_part_path(target))
            .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", idx + 1));
        let xml_sheet = read_zip_part(archive, &path_part)?
            .ok_or_else(|| XlsxReadError::MissingPart(path_part.clone()))?;
        let mut sheet = SheetGrid::new(sheet_name.clone());
        parse_worksheet_xml(&xml_sheet, &l_shared_strings, &l_styles, &palette, &mut sheet)?;
        debug!(
            sheet = %sheet_name,
            part = %path_part,
            n_merges = sheet.merges().len(),
            "Loaded template sheet"
        );
        l_sheets.push(sheet);
    }

    Ok(SpecWorkbook {
        idx_active: idx_active.min(l_sheets.len().saturating_sub(1)),
        sheets: l_sheets,
    })
}

fn read_zip_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> ReadResult<Option<String>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut xml = String::new();
    file.read_to_string(&mut xml)?;
    Ok(Some(xml))
}

fn derive_part_path(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(val) => val.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region XmlHelpers

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> ReadResult<Option<String>> {
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        if attr.key.local_name().as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn attr_flag(e: &BytesStart<'_>, key: &[u8]) -> ReadResult<Option<bool>> {
    Ok(attr_value(e, key)?.map(|val| !matches!(val.as_str(), "0" | "false")))
}

/// Read text content until the matching end tag of `end_local`.
fn read_text(reader: &mut Reader<&[u8]>, end_local: &[u8]) -> ReadResult<String> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => {
                let t: Cow<'_, str> = e.unescape()?;
                text.push_str(&t);
            }
            Event::CData(e) => {
                text.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Event::End(e) if e.local_name().as_ref() == end_local => break,
            Event::Eof => {
                return Err(XlsxReadError::Malformed {
                    part: String::from_utf8_lossy(end_local).into_owned(),
                    reason: "unexpected eof inside text element".to_string(),
                });
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}

/// One visible run of a string item; `font` is `None` when the run has no
/// `<rPr>` and inherits the cell font.
#[derive(Debug, Default)]
struct SpecRawRun {
    text: String,
    font: Option<SpecCellStyle>,
}

/// Collect the visible runs of an `<si>` or `<is>` element. Phonetic
/// (`<rPh>`) text is skipped.
fn read_string_item(
    reader: &mut Reader<&[u8]>,
    end_local: &[u8],
    palette: &SpecThemePalette,
) -> ReadResult<Vec<SpecRawRun>> {
    let mut buf = Vec::new();
    let mut l_runs: Vec<SpecRawRun> = Vec::new();
    let mut run_current: Option<SpecRawRun> = None;
    let mut if_in_props = false;
    let mut n_depth_phonetic = 0usize;
    loop {
        let event = reader.read_event_into(&mut buf)?;
        let if_empty = matches!(event, Event::Empty(_));
        match event {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"rPh" if !if_empty => n_depth_phonetic += 1,
                b"r" if !if_empty && n_depth_phonetic == 0 => run_current = Some(SpecRawRun::default()),
                b"rPr" => {
                    if let Some(run) = run_current.as_mut() {
                        run.font = Some(SpecCellStyle::default());
                        if_in_props = !if_empty;
                    }
                }
                b"t" if !if_empty => {
                    let t = read_text(reader, b"t")?;
                    if n_depth_phonetic == 0 {
                        match run_current.as_mut() {
                            Some(run) => run.text.push_str(&t),
                            None => l_runs.push(SpecRawRun { text: t, font: None }),
                        }
                    }
                }
                tag if if_in_props => {
                    if let Some(font) = run_current.as_mut().and_then(|run| run.font.as_mut()) {
                        apply_font_attr(font, &String::from_utf8_lossy(tag), &e, palette)?;
                    }
                }
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"rPh" => n_depth_phonetic = n_depth_phonetic.saturating_sub(1),
                b"rPr" => if_in_props = false,
                b"r" => l_runs.extend(run_current.take()),
                tag if tag == end_local => break,
                _ => {}
            },
            Event::Eof => {
                return Err(XlsxReadError::Malformed {
                    part: String::from_utf8_lossy(end_local).into_owned(),
                    reason: "unexpected eof inside string item".to_string(),
                });
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(l_runs)
}

/// Plain text for unformatted items and items carrying placeholders (those
/// are rewritten by the fill), [`EnumCellValue::RichText`] otherwise.
fn derive_string_value(mut l_runs: Vec<SpecRawRun>) -> EnumCellValue {
    let c_text: String = l_runs.iter().map(|run| run.text.as_str()).collect();
    l_runs.retain(|run| !run.text.is_empty());
    let if_formatted = l_runs.iter().any(|run| run.font.is_some());
    if l_runs.len() < 2 || !if_formatted || c_text.contains("{{") {
        return EnumCellValue::String(c_text);
    }
    let l_text_runs = l_runs
        .into_iter()
        .map(|run| {
            let font = run.font.unwrap_or_default();
            SpecTextRun {
                text: run.text,
                bold: font.bold.unwrap_or(false),
                font: font.font(),
            }
        })
        .collect();
    EnumCellValue::RichText(l_text_runs)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WorkbookParts

/// Parse sheet `(name, relationship id)` pairs and the active tab.
fn parse_workbook_xml(xml: &str) -> ReadResult<(Vec<(String, String)>, usize)> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut l_sheets = Vec::new();
    let mut idx_active = 0usize;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"sheet" => {
                    let name = attr_value(&e, b"name")?.unwrap_or_default();
                    let rel_id = attr_value(&e, b"id")?.unwrap_or_default();
                    l_sheets.push((name, rel_id));
                }
                b"workbookView" => {
                    if let Some(val) = attr_value(&e, b"activeTab")? {
                        idx_active = val.parse().unwrap_or(0);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok((l_sheets, idx_active))
}

fn parse_relationships_xml(xml: &str) -> ReadResult<BTreeMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut dict_targets = BTreeMap::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) =
                    (attr_value(&e, b"Id")?, attr_value(&e, b"Target")?)
                {
                    dict_targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(dict_targets)
}

fn parse_shared_strings_xml(xml: &str, palette: &SpecThemePalette) -> ReadResult<Vec<EnumCellValue>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut l_items = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"si" => {
                l_items.push(derive_string_value(read_string_item(&mut reader, b"si", palette)?));
            }
            Event::Empty(e) if e.local_name().as_ref() == b"si" => {
                l_items.push(EnumCellValue::String(String::new()))
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(l_items)
}

/// Read the `a:clrScheme` slots of a theme part over the stock palette.
fn parse_theme_xml(xml: &str) -> ReadResult<SpecThemePalette> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut palette = SpecThemePalette::default();
    let mut if_in_scheme = false;
    let mut c_slot: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"clrScheme" => if_in_scheme = true,
            Event::End(e) if e.local_name().as_ref() == b"clrScheme" => break,
            Event::Start(e) if if_in_scheme && c_slot.is_none() => {
                c_slot = Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Event::Start(e) | Event::Empty(e) if if_in_scheme => {
                let rgb = match e.local_name().as_ref() {
                    b"srgbClr" => attr_value(&e, b"val")?.and_then(|v| parse_rgb_hex(&v)),
                    b"sysClr" => match attr_value(&e, b"lastClr")?.and_then(|v| parse_rgb_hex(&v)) {
                        Some(rgb) => Some(rgb),
                        None => match attr_value(&e, b"val")?.as_deref() {
                            Some("windowText") => Some(0x000000),
                            Some("window") => Some(0xFFFFFF),
                            _ => None,
                        },
                    },
                    _ => None,
                };
                if let (Some(slot), Some(rgb)) = (c_slot.as_deref(), rgb) {
                    palette.set_slot(slot, rgb);
                }
            }
            Event::End(e) if c_slot.as_deref().is_some_and(|slot| slot.as_bytes() == e.local_name().as_ref()) => {
                c_slot = None;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(palette)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Styles

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumStyleSection {
    Other,
    NumFmts,
    Fonts,
    Fills,
    Borders,
    CellXfs,
}

#[derive(Debug, Default, Clone)]
struct SpecXfRef {
    id_num_fmt: u32,
    id_font: usize,
    id_fill: usize,
    id_border: usize,
    align: Option<String>,
    valign: Option<String>,
    text_wrap: Option<bool>,
}

/// Resolve `cellXfs` into one [`SpecCellStyle`] per style index.
fn parse_styles_xml(xml: &str, palette: &SpecThemePalette) -> ReadResult<Vec<SpecCellStyle>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut section = EnumStyleSection::Other;
    let mut dict_num_fmts: BTreeMap<u32, String> = BTreeMap::new();
    let mut l_fonts: Vec<SpecCellStyle> = Vec::new();
    let mut l_fills: Vec<Option<String>> = Vec::new();
    let mut l_borders: Vec<SpecCellStyle> = Vec::new();
    let mut l_xfs: Vec<SpecXfRef> = Vec::new();
    let mut if_pattern_solid = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        let if_empty = matches!(event, Event::Empty(_));
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let c_local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match (section, c_local.as_str()) {
                    (_, "numFmts") if !if_empty => section = EnumStyleSection::NumFmts,
                    (_, "fonts") if !if_empty => section = EnumStyleSection::Fonts,
                    (_, "fills") if !if_empty => section = EnumStyleSection::Fills,
                    (_, "borders") if !if_empty => section = EnumStyleSection::Borders,
                    (_, "cellXfs") if !if_empty => section = EnumStyleSection::CellXfs,
                    (_, "cellStyleXfs" | "dxfs" | "cellStyles" | "extLst") if !if_empty => {
                        section = EnumStyleSection::Other
                    }
                    (EnumStyleSection::NumFmts, "numFmt") => {
                        let id = attr_value(&e, b"numFmtId")?.and_then(|v| v.parse().ok());
                        let code = attr_value(&e, b"formatCode")?;
                        if let (Some(id), Some(code)) = (id, code) {
                            dict_num_fmts.insert(id, code);
                        }
                    }
                    (EnumStyleSection::Fonts, "font") => l_fonts.push(SpecCellStyle::default()),
                    (EnumStyleSection::Fonts, tag) => {
                        if let Some(font) = l_fonts.last_mut() {
                            apply_font_attr(font, tag, &e, palette)?;
                        }
                    }
                    (EnumStyleSection::Fills, "fill") => {
                        l_fills.push(None);
                        if_pattern_solid = false;
                    }
                    (EnumStyleSection::Fills, "patternFill") => {
                        if_pattern_solid = attr_value(&e, b"patternType")?.as_deref() == Some("solid");
                    }
                    (EnumStyleSection::Fills, "fgColor") if if_pattern_solid => {
                        if let Some(fill) = l_fills.last_mut() {
                            *fill = derive_color_attr(&e, palette)?;
                        }
                    }
                    (EnumStyleSection::Borders, "border") => l_borders.push(SpecCellStyle::default()),
                    (EnumStyleSection::Borders, side @ ("left" | "right" | "top" | "bottom" | "start" | "end")) => {
                        let code = attr_value(&e, b"style")?.map(|val| derive_border_code(&val));
                        if let (Some(border), Some(code)) = (l_borders.last_mut(), code) {
                            match side {
                                "left" | "start" => border.left = Some(code),
                                "right" | "end" => border.right = Some(code),
                                "top" => border.top = Some(code),
                                _ => border.bottom = Some(code),
                            }
                        }
                    }
                    (EnumStyleSection::CellXfs, "xf") => {
                        let parse_id = |val: Option<String>| -> u32 {
                            val.and_then(|v| v.parse().ok()).unwrap_or(0)
                        };
                        l_xfs.push(SpecXfRef {
                            id_num_fmt: parse_id(attr_value(&e, b"numFmtId")?),
                            id_font: parse_id(attr_value(&e, b"fontId")?) as usize,
                            id_fill: parse_id(attr_value(&e, b"fillId")?) as usize,
                            id_border: parse_id(attr_value(&e, b"borderId")?) as usize,
                            ..SpecXfRef::default()
                        });
                    }
                    (EnumStyleSection::CellXfs, "alignment") => {
                        if let Some(xf) = l_xfs.last_mut() {
                            xf.align = attr_value(&e, b"horizontal")?.and_then(|v| derive_align_name(&v, false));
                            xf.valign = attr_value(&e, b"vertical")?.and_then(|v| derive_align_name(&v, true));
                            xf.text_wrap = attr_flag(&e, b"wrapText")?;
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"numFmts" | b"fonts" | b"fills" | b"borders" | b"cellXfs" => {
                    section = EnumStyleSection::Other
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let l_styles = l_xfs
        .iter()
        .map(|xf| {
            let mut style = l_fonts.get(xf.id_font).cloned().unwrap_or_default();
            if let Some(border) = l_borders.get(xf.id_border) {
                style = style.merge(border);
            }
            style.bg_color = l_fills.get(xf.id_fill).cloned().flatten();
            if xf.id_num_fmt >= N_NUM_FMT_ID_CUSTOM_MIN {
                style.num_format = dict_num_fmts.get(&xf.id_num_fmt).cloned();
            } else if xf.id_num_fmt > 0 {
                style.num_format = dict_num_fmts.get(&xf.id_num_fmt).cloned();
                if style.num_format.is_none() {
                    style.num_format_index = u8::try_from(xf.id_num_fmt).ok();
                }
            }
            style.align = xf.align.clone();
            style.valign = xf.valign.clone();
            style.text_wrap = xf.text_wrap;
            style
        })
        .collect();
    Ok(l_styles)
}

fn apply_font_attr(
    font: &mut SpecCellStyle,
    tag: &str,
    e: &BytesStart<'_>,
    palette: &SpecThemePalette,
) -> ReadResult<()> {
    match tag {
        "b" => font.bold = Some(attr_flag(e, b"val")?.unwrap_or(true)),
        "i" => font.italic = Some(attr_flag(e, b"val")?.unwrap_or(true)),
        "u" => {
            let c_val = attr_value(e, b"val")?.unwrap_or_else(|| "single".to_string());
            font.underline = Some(c_val != "none");
        }
        "sz" => font.font_size = attr_value(e, b"val")?.and_then(|v| v.parse().ok()),
        "name" | "rFont" => font.font_name = attr_value(e, b"val")?,
        "color" => font.font_color = derive_color_attr(e, palette)?,
        _ => {}
    }
    Ok(())
}

/// Resolve a `<color>`/`<fgColor>` element to `#RRGGBB` from its `rgb`,
/// `theme` or `indexed` attribute, applying `tint` to the latter two.
fn derive_color_attr(e: &BytesStart<'_>, palette: &SpecThemePalette) -> ReadResult<Option<String>> {
    if let Some(rgb) = attr_value(e, b"rgb")? {
        return Ok(parse_rgb_hex(&rgb).map(derive_rgb_hex));
    }
    let parse_idx = |val: Option<String>| val.and_then(|v| v.trim().parse::<usize>().ok());
    let rgb = match parse_idx(attr_value(e, b"theme")?) {
        Some(idx) => palette.color(idx),
        None => parse_idx(attr_value(e, b"indexed")?).and_then(derive_indexed_color),
    };
    let tint = attr_value(e, b"tint")?
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0);
    Ok(rgb.map(|rgb| derive_rgb_hex(apply_tint(rgb, tint))))
}

fn derive_border_code(style: &str) -> i64 {
    match style {
        "thin" => 1,
        "medium" => 2,
        "dashed" => 3,
        "dotted" => 4,
        "thick" => 5,
        "double" => 6,
        "hair" => 7,
        "mediumDashed" => 8,
        "dashDot" => 9,
        "mediumDashDot" => 10,
        "dashDotDot" => 11,
        "mediumDashDotDot" => 12,
        "slantDashDot" => 13,
        _ => 0,
    }
}

fn derive_align_name(value: &str, if_vertical: bool) -> Option<String> {
    let c_name = match (if_vertical, value) {
        (false, "general") => return None,
        (false, "centerContinuous") => "center_across",
        (false, other) => other,
        (true, "center") => "vcenter",
        (true, "justify") => "vjustify",
        (true, "distributed") => "vdistributed",
        (true, other) => other,
    };
    Some(c_name.to_string())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Worksheet

#[derive(Debug, Default)]
struct SpecRawCell {
    row: usize,
    col: usize,
    idx_style: Option<usize>,
    c_type: Option<String>,
    c_value: Option<String>,
    c_formula: Option<String>,
    if_formula_shared: bool,
    id_formula_shared: Option<usize>,
    inline: Option<EnumCellValue>,
}

/// Master of a shared formula group, keyed by `si`.
#[derive(Debug)]
struct SpecSharedFormula {
    row: usize,
    col: usize,
    formula: String,
}

fn parse_worksheet_xml(
    xml: &str,
    l_shared_strings: &[EnumCellValue],
    l_styles: &[SpecCellStyle],
    palette: &SpecThemePalette,
    sheet: &mut SheetGrid,
) -> ReadResult<()> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut row_current = 0usize;
    let mut col_next = 0usize;
    let mut dict_shared_formulas: BTreeMap<usize, SpecSharedFormula> = BTreeMap::new();
    loop {
        let event = reader.read_event_into(&mut buf)?;
        let if_empty = matches!(event, Event::Empty(_));
        match event {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"col" => {
                    let col_min = attr_value(&e, b"min")?.and_then(|v| v.parse::<usize>().ok());
                    let col_max = attr_value(&e, b"max")?.and_then(|v| v.parse::<usize>().ok());
                    let width = attr_value(&e, b"width")?.and_then(|v| v.parse::<f64>().ok());
                    if let (Some(col_min), Some(col_max), Some(width)) = (col_min, col_max, width) {
                        let col_max = col_max.min(N_NCOLS_TEMPLATE_WIDTH_MAX);
                        for col in col_min.max(1)..=col_max {
                            sheet.set_col_width(col - 1, width);
                        }
                    }
                }
                b"row" => {
                    if let Some(row) = attr_value(&e, b"r")?.and_then(|v| v.parse::<usize>().ok()) {
                        row_current = row.saturating_sub(1);
                    }
                    if let Some(height) = attr_value(&e, b"ht")?.and_then(|v| v.parse::<f64>().ok()) {
                        sheet.set_row_height(row_current, height);
                    }
                    col_next = 0;
                }
                b"c" => {
                    let (row, col) = match attr_value(&e, b"r")? {
                        Some(reference) => parse_a1_ref(&reference)
                            .ok_or(XlsxReadError::InvalidRef(reference))?,
                        None => (row_current, col_next),
                    };
                    let mut raw = SpecRawCell {
                        row,
                        col,
                        idx_style: attr_value(&e, b"s")?.and_then(|v| v.parse().ok()),
                        c_type: attr_value(&e, b"t")?,
                        ..SpecRawCell::default()
                    };
                    if !if_empty {
                        read_cell_body(&mut reader, &mut raw, palette)?;
                    }
                    col_next = col + 1;
                    let value = match derive_formula(&mut raw, &mut dict_shared_formulas) {
                        Some(formula) => EnumCellValue::Formula(formula),
                        None => raw_take_value(&mut raw, l_shared_strings),
                    };
                    let cell = derive_cell(value, raw.idx_style, l_styles);
                    sheet.insert_cell(raw.row, raw.col, cell);
                }
                b"mergeCell" => {
                    if let Some(reference) = attr_value(&e, b"ref")? {
                        let (row_min, col_min, row_max, col_max) = parse_a1_range(&reference)
                            .ok_or_else(|| XlsxReadError::InvalidRef(reference.clone()))?;
                        let range = SpecMergeRange::new(row_min, col_min, row_max, col_max);
                        if let Err(err) = sheet.merge(range) {
                            warn!(sheet = %sheet.name(), error = %err, "Skipping overlapping merge in template");
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn read_cell_body(
    reader: &mut Reader<&[u8]>,
    raw: &mut SpecRawCell,
    palette: &SpecThemePalette,
) -> ReadResult<()> {
    let mut buf = Vec::new();
    loop {
        let event = reader.read_event_into(&mut buf)?;
        let if_empty = matches!(event, Event::Empty(_));
        match event {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"v" if !if_empty => raw.c_value = Some(read_text(reader, b"v")?),
                b"f" => {
                    raw.if_formula_shared = attr_value(&e, b"t")?.as_deref() == Some("shared");
                    raw.id_formula_shared = attr_value(&e, b"si")?.and_then(|v| v.trim().parse().ok());
                    if !if_empty {
                        raw.c_formula = Some(read_text(reader, b"f")?);
                    }
                }
                b"is" if !if_empty => {
                    raw.inline = Some(derive_string_value(read_string_item(reader, b"is", palette)?));
                }
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"c" => break,
            Event::Eof => {
                return Err(XlsxReadError::Malformed {
                    part: "worksheet".to_string(),
                    reason: "unexpected eof inside <c>".to_string(),
                });
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

/// Formula text of a cell. Shared-formula masters are remembered by `si`;
/// dependents (empty `<f t="shared" si="n"/>`) shift the master's relative
/// references by their offset from it.
fn derive_formula(
    raw: &mut SpecRawCell,
    dict_shared_formulas: &mut BTreeMap<usize, SpecSharedFormula>,
) -> Option<String> {
    let c_formula = raw.c_formula.take().filter(|f| !f.is_empty());
    let id_shared = raw.id_formula_shared.filter(|_| raw.if_formula_shared);
    match (c_formula, id_shared) {
        (Some(formula), Some(id)) => {
            dict_shared_formulas.insert(
                id,
                SpecSharedFormula {
                    row: raw.row,
                    col: raw.col,
                    formula: formula.clone(),
                },
            );
            Some(formula)
        }
        (Some(formula), None) => Some(formula),
        (None, Some(id)) => {
            let Some(master) = dict_shared_formulas.get(&id) else {
                warn!(si = id, row = raw.row, col = raw.col, "Shared formula master not found; keeping cached value");
                return None;
            };
            Some(shift_formula_refs(
                &master.formula,
                raw.row as i64 - master.row as i64,
                raw.col as i64 - master.col as i64,
            ))
        }
        (None, None) => None,
    }
}

fn raw_take_value(raw: &mut SpecRawCell, l_shared_strings: &[EnumCellValue]) -> EnumCellValue {
    let c_type = raw.c_type.as_deref().unwrap_or("n");
    if c_type == "inlineStr" {
        return raw.inline.take().unwrap_or_default();
    }
    let Some(c_value) = raw.c_value.take() else {
        return EnumCellValue::None;
    };
    match c_type {
        "s" => match c_value.trim().parse::<usize>().ok().and_then(|idx| l_shared_strings.get(idx)) {
            Some(value) => value.clone(),
            None => {
                warn!(index = %c_value, "Shared string index out of range");
                EnumCellValue::None
            }
        },
        "b" => EnumCellValue::Boolean(c_value.trim() == "1"),
        "str" | "e" => EnumCellValue::String(c_value),
        _ => match c_value.trim().parse::<f64>() {
            Ok(x) => EnumCellValue::Number(x),
            Err(_) => EnumCellValue::String(c_value),
        },
    }
}

/// Attach the cell style. Rich-text runs without their own font take the
/// cell font.
fn derive_cell(value: EnumCellValue, idx_style: Option<usize>, l_styles: &[SpecCellStyle]) -> SpecCell {
    let style = idx_style
        .and_then(|idx| l_styles.get(idx))
        .filter(|style| **style != SpecCellStyle::default())
        .cloned();
    let value = match (value, style.as_ref()) {
        (EnumCellValue::RichText(l_runs), Some(style)) => {
            let font_cell = style.font();
            EnumCellValue::RichText(
                l_runs
                    .into_iter()
                    .map(|mut run| {
                        run.font.name = run.font.name.or_else(|| font_cell.name.clone());
                        run.font.size = run.font.size.or(font_cell.size);
                        run.font.color = run.font.color.or_else(|| font_cell.color.clone());
                        run
                    })
                    .collect(),
            )
        }
        (value, _) => value,
    };
    SpecCell { value, style }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SpecFont;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_workbook_xml() {
        let xml = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
            <bookViews><workbookView activeTab="1"/></bookViews>
            <sheets>
              <sheet name="Cover" sheetId="1" r:id="rId1"/>
              <sheet name="PI &amp; Terms" sheetId="2" r:id="rId2"/>
            </sheets></workbook>"#;
        let (l_sheets, idx_active) = parse_workbook_xml(xml).unwrap();
        assert_eq!(
            l_sheets,
            vec![
                ("Cover".to_string(), "rId1".to_string()),
                ("PI & Terms".to_string(), "rId2".to_string()),
            ]
        );
        assert_eq!(idx_active, 1);
        assert_eq!(derive_part_path("worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(derive_part_path("/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
    }

    fn text(s: &str) -> EnumCellValue {
        EnumCellValue::String(s.to_string())
    }

    #[test]
    fn test_parse_shared_strings_skips_phonetic_runs() {
        let xml = r#"<sst><si><t>plain</t></si>
            <si><t>base</t><rPh sb="0" eb="1"><t>ruby</t></rPh></si>
            <si><r><t>one </t></r><r><t>run set</t></r></si>
            <si/></sst>"#;
        let l_items = parse_shared_strings_xml(xml, &SpecThemePalette::default()).unwrap();
        assert_eq!(l_items, vec![text("plain"), text("base"), text("one run set"), text("")]);
    }

    #[test]
    fn test_parse_shared_strings_keeps_rich_runs() {
        let xml = r#"<sst>
            <si><r><rPr><b/><sz val="12"/><color theme="4"/><rFont val="Arial"/></rPr><t>Bold</t></r><r><t xml:space="preserve"> tail</t></r></si>
            <si><r><rPr><b/></rPr><t>Dear </t></r><r><t>{{Customer.Name}}</t></r></si>
            </sst>"#;
        let l_items = parse_shared_strings_xml(xml, &SpecThemePalette::default()).unwrap();
        assert_eq!(
            l_items[0],
            EnumCellValue::RichText(vec![
                SpecTextRun {
                    text: "Bold".to_string(),
                    bold: true,
                    font: SpecFont {
                        name: Some("Arial".to_string()),
                        size: Some(12.0),
                        color: Some("#4F81BD".to_string()),
                    },
                },
                SpecTextRun {
                    text: " tail".to_string(),
                    bold: false,
                    font: SpecFont::default(),
                },
            ])
        );
        assert_eq!(l_items[1], text("Dear {{Customer.Name}}"));
    }

    #[test]
    fn test_parse_theme_xml() {
        let xml = r#"<a:theme xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main">
            <a:themeElements><a:clrScheme name="Custom">
              <a:dk1><a:sysClr val="windowText" lastClr="111111"/></a:dk1>
              <a:lt1><a:sysClr val="window"/></a:lt1>
              <a:dk2><a:srgbClr val="222222"/></a:dk2>
              <a:lt2><a:srgbClr val="DDDDDD"/></a:lt2>
              <a:accent1><a:srgbClr val="00B050"><a:lumMod val="75000"/></a:srgbClr></a:accent1>
            </a:clrScheme></a:themeElements></a:theme>"#;
        let palette = parse_theme_xml(xml).unwrap();
        assert_eq!(palette.color(0), Some(0xFFFFFF));
        assert_eq!(palette.color(1), Some(0x111111));
        assert_eq!(palette.color(2), Some(0xDDDDDD));
        assert_eq!(palette.color(3), Some(0x222222));
        assert_eq!(palette.color(4), Some(0x00B050));
        assert_eq!(palette.color(5), SpecThemePalette::default().color(5));
    }

    #[test]
    fn test_parse_styles_resolves_theme_and_indexed_colors() {
        let xml = r#"<styleSheet>
            <fonts count="3">
              <font><sz val="11"/><color theme="1"/><name val="Calibri"/></font>
              <font><color theme="0"/></font>
              <font><color indexed="10"/></font>
            </fonts>
            <fills count="5">
              <fill><patternFill patternType="none"/></fill>
              <fill><patternFill patternType="gray125"/></fill>
              <fill><patternFill patternType="solid"><fgColor theme="4"/><bgColor indexed="64"/></patternFill></fill>
              <fill><patternFill patternType="solid"><fgColor theme="4" tint="-0.5"/></patternFill></fill>
              <fill><patternFill patternType="solid"><fgColor indexed="22"/></patternFill></fill>
            </fills>
            <cellXfs count="4">
              <xf numFmtId="0" fontId="0" fillId="0" borderId="0"/>
              <xf numFmtId="0" fontId="1" fillId="2" borderId="0"/>
              <xf numFmtId="0" fontId="2" fillId="3" borderId="0"/>
              <xf numFmtId="0" fontId="0" fillId="4" borderId="0"/>
            </cellXfs>
          </styleSheet>"#;
        let mut palette = SpecThemePalette::default();
        palette.set_slot("accent1", 0x4472C4);
        let l_styles = parse_styles_xml(xml, &palette).unwrap();
        assert_eq!(l_styles[0].font_color.as_deref(), Some("#000000"));
        assert_eq!(l_styles[1].font_color.as_deref(), Some("#FFFFFF"));
        assert_eq!(l_styles[1].bg_color.as_deref(), Some("#4472C4"));
        assert_eq!(l_styles[2].font_color.as_deref(), Some("#FF0000"));
        assert_eq!(l_styles[2].bg_color.as_deref(), Some("#223962"));
        assert_eq!(l_styles[3].bg_color.as_deref(), Some("#C0C0C0"));
    }

    #[test]
    fn test_parse_styles_resolves_cell_xfs() {
        let xml = r##"<styleSheet>
            <numFmts count="1"><numFmt numFmtId="164" formatCode="#,##0.00"/></numFmts>
            <fonts count="2">
              <font><sz val="11"/><name val="Calibri"/></font>
              <font><b/><sz val="12"/><color rgb="FFFF0000"/><name val="Arial"/></font>
            </fonts>
            <fills count="3">
              <fill><patternFill patternType="none"/></fill>
              <fill><patternFill patternType="gray125"/></fill>
              <fill><patternFill patternType="solid"><fgColor rgb="FFFFFF00"/></patternFill></fill>
            </fills>
            <borders count="2">
              <border><left/><right/><top/><bottom/></border>
              <border><left style="thin"><color auto="1"/></left><right style="medium"/><top/><bottom style="double"/></border>
            </borders>
            <cellStyleXfs count="1"><xf numFmtId="0" fontId="1" fillId="0" borderId="0"/></cellStyleXfs>
            <cellXfs count="3">
              <xf numFmtId="0" fontId="0" fillId="0" borderId="0"/>
              <xf numFmtId="164" fontId="1" fillId="2" borderId="1" applyAlignment="1">
                <alignment horizontal="center" vertical="center" wrapText="1"/>
              </xf>
              <xf numFmtId="14" fontId="0" fillId="0" borderId="0"/>
            </cellXfs>
            <dxfs count="1"><dxf><font><b/></font></dxf></dxfs>
          </styleSheet>"##;
        let l_styles = parse_styles_xml(xml, &SpecThemePalette::default()).unwrap();
        assert_eq!(l_styles.len(), 3);
        assert_eq!(l_styles[0].font_name.as_deref(), Some("Calibri"));
        assert_eq!(l_styles[0].bold, None);

        let style = &l_styles[1];
        assert_eq!(style.font_name.as_deref(), Some("Arial"));
        assert_eq!(style.font_size, Some(12.0));
        assert_eq!(style.bold, Some(true));
        assert_eq!(style.font_color.as_deref(), Some("#FF0000"));
        assert_eq!(style.bg_color.as_deref(), Some("#FFFF00"));
        assert_eq!(style.left, Some(1));
        assert_eq!(style.right, Some(2));
        assert_eq!(style.bottom, Some(6));
        assert_eq!(style.top, None);
        assert_eq!(style.num_format.as_deref(), Some("#,##0.00"));
        assert_eq!(style.align.as_deref(), Some("center"));
        assert_eq!(style.valign.as_deref(), Some("vcenter"));
        assert_eq!(style.text_wrap, Some(true));

        assert_eq!(l_styles[2].num_format_index, Some(14));
    }

    #[test]
    fn test_parse_worksheet_cells_merges_and_dimensions() {
        let xml = r#"<worksheet>
            <cols><col min="1" max="2" width="18.5" customWidth="1"/></cols>
            <sheetData>
              <row r="1" ht="24" customHeight="1">
                <c r="A1" t="s"><v>0</v></c>
                <c r="B1" s="1"><v>12.5</v></c>
                <c r="C1" t="b"><v>1</v></c>
              </row>
              <row r="3">
                <c r="A3" t="inlineStr"><is><t>inline</t></is></c>
                <c r="B3"><f>SUM(B1:B2)</f><v>12.5</v></c>
                <c r="C3" s="1"/>
              </row>
            </sheetData>
            <mergeCells count="1"><mergeCell ref="A5:C6"/></mergeCells>
          </worksheet>"#;
        let l_shared = vec![text("{{TableStart:Items}}")];
        let l_styles = vec![
            SpecCellStyle::default(),
            SpecCellStyle {
                bold: Some(true),
                ..SpecCellStyle::default()
            },
        ];
        let mut sheet = SheetGrid::new("S");
        parse_worksheet_xml(xml, &l_shared, &l_styles, &SpecThemePalette::default(), &mut sheet).unwrap();

        assert_eq!(sheet.text(0, 0), Some("{{TableStart:Items}}"));
        assert_eq!(sheet.value(0, 1), &EnumCellValue::Number(12.5));
        assert_eq!(sheet.style(0, 1).and_then(|s| s.bold), Some(true));
        assert_eq!(sheet.value(0, 2), &EnumCellValue::Boolean(true));
        assert_eq!(sheet.text(2, 0), Some("inline"));
        assert_eq!(
            sheet.value(2, 1),
            &EnumCellValue::Formula("SUM(B1:B2)".to_string())
        );
        assert_eq!(sheet.value(2, 2), &EnumCellValue::None);
        assert!(sheet.style(2, 2).is_some());
        assert_eq!(sheet.row_height(0), Some(24.0));
        assert_eq!(sheet.col_width(1), Some(18.5));
        assert_eq!(sheet.col_width(2), None);
        assert_eq!(sheet.merges(), &[SpecMergeRange::new(4, 0, 5, 2)]);
    }

    #[test]
    fn test_shared_formula_dependents_are_reanchored() {
        let xml = r#"<worksheet><sheetData>
              <row r="1"><c r="A1"><v>1</v></c><c r="B1"><f t="shared" ref="B1:B3" si="0">A1*2</f><v>2</v></c></row>
              <row r="2"><c r="A2"><v>2</v></c><c r="B2"><f t="shared" si="0"/><v>4</v></c></row>
              <row r="3"><c r="A3"><v>3</v></c><c r="B3"><f t="shared" si="0"/><v>6</v></c></row>
              <row r="4"><c r="C4"><f t="shared" si="7"/><v>9</v></c></row>
            </sheetData></worksheet>"#;
        let mut sheet = SheetGrid::new("S");
        parse_worksheet_xml(xml, &[], &[], &SpecThemePalette::default(), &mut sheet).unwrap();
        assert_eq!(sheet.value(0, 1), &EnumCellValue::Formula("A1*2".to_string()));
        assert_eq!(sheet.value(1, 1), &EnumCellValue::Formula("A2*2".to_string()));
        assert_eq!(sheet.value(2, 1), &EnumCellValue::Formula("A3*2".to_string()));
        // orphan dependent keeps its cached value
        assert_eq!(sheet.value(3, 2), &EnumCellValue::Number(9.0));
    }

    #[test]
    fn test_rich_text_cell_takes_cell_font() {
        let xml = r#"<worksheet><sheetData>
              <row r="1"><c r="A1" t="s" s="1"><v>0</v></c></row>
            </sheetData></worksheet>"#;
        let l_shared = vec![EnumCellValue::RichText(vec![
            SpecTextRun {
                text: "Note: ".to_string(),
                bold: true,
                font: SpecFont {
                    size: Some(12.0),
                    ..SpecFont::default()
                },
            },
            SpecTextRun {
                text: "fragile".to_string(),
                bold: false,
                font: SpecFont::default(),
            },
        ])];
        let l_styles = vec![
            SpecCellStyle::default(),
            SpecCellStyle {
                font_name: Some("Times New Roman".to_string()),
                font_size: Some(10.0),
                ..SpecCellStyle::default()
            },
        ];
        let mut sheet = SheetGrid::new("S");
        parse_worksheet_xml(xml, &l_shared, &l_styles, &SpecThemePalette::default(), &mut sheet).unwrap();
        let EnumCellValue::RichText(l_runs) = sheet.value(0, 0) else {
            panic!("expected rich text, got {:?}", sheet.value(0, 0));
        };
        assert_eq!(l_runs.len(), 2);
        assert_eq!(l_runs[0].font.size, Some(12.0));
        assert_eq!(l_runs[0].font.name.as_deref(), Some("Times New Roman"));
        assert_eq!(l_runs[1].font.size, Some(10.0));
        assert!(!l_runs[1].bold);
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
