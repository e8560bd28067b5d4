//! SRT, WebVTT and ASS/SSA parsing.

use std::borrow::Cow;
use std::path::Path;
use std::sync::LazyLock;

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use regex::Regex;
use subx_models::SubtitleFormat;
use tracing::{debug, warn};

use crate::error::{SubtitleError, SubtitleResult};
use crate::line::SubtitleLine;
use crate::time::parse_srt_time;

/// `{\an8\b1}` style override blocks.
static ASS_OVERRIDE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{[^}]*\}").ok());

/// `<i>`, `<font color=..>` and VTT voice/class tags.
static MARKUP_TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").ok());

fn strip<'a>(pattern: &Option<Regex>, text: &'a str) -> Cow<'a, str> {
    match pattern {
        Some(re) => re.replace_all(text, ""),
        None => Cow::Borrowed(text),
    }
}

/// Decode subtitle bytes to text.
///
/// A BOM decides the encoding. Otherwise valid UTF-8 is taken as is and
/// anything else goes through charset detection, so legacy code pages such
/// as Windows-1254 keep their letters.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    debug!(encoding = encoding.name(), "subtitle is not UTF-8");
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        warn!(encoding = encoding.name(), "subtitle has undecodable bytes");
    }
    text.into_owned()
}

/// Parse a subtitle file, detecting the format from its extension.
pub fn parse_file(path: impl AsRef<Path>) -> SubtitleResult<Vec<SubtitleLine>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SubtitleError::FileNotFound(path.to_path_buf()));
    }
    let format = SubtitleFormat::from_path(path).ok_or_else(|| {
        SubtitleError::unsupported(
            path.extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default(),
        )
    })?;
    let bytes = std::fs::read(path)?;
    Ok(parse_bytes(&bytes, format))
}

/// Parse raw bytes in the given format.
pub fn parse_bytes(bytes: &[u8], format: SubtitleFormat) -> Vec<SubtitleLine> {
    parse_str(&decode_text(bytes), format)
}

/// Parse text in the given format. Cues are renumbered from 1 and empty cues dropped.
pub fn parse_str(content: &str, format: SubtitleFormat) -> Vec<SubtitleLine> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n").replace('\r', "\n");
    let mut lines = match format {
        SubtitleFormat::Srt | SubtitleFormat::Vtt => parse_cue_blocks(&content),
        SubtitleFormat::Ass | SubtitleFormat::Ssa => parse_ass(&content),
    };
    for (i, line) in lines.iter_mut().enumerate() {
        line.line_number = i as u32 + 1;
    }
    lines
}

/// SRT and WebVTT share the blank-line separated cue block layout.
fn parse_cue_blocks(content: &str) -> Vec<SubtitleLine> {
    let mut out = Vec::new();

    for rows in blocks(content) {
        let Some(timing_idx) = rows.iter().position(|r| r.contains("-->")) else {
            continue;
        };

        let first = rows.first().map(|r| r.trim()).unwrap_or_default();
        if first.starts_with("NOTE") || first.starts_with("STYLE") || first.starts_with("REGION") {
            continue;
        }

        let Some((start, end)) = parse_timing(rows[timing_idx]) else {
            warn!(line = rows[timing_idx], "skipping cue with invalid timing");
            continue;
        };

        let text = rows[timing_idx + 1..]
            .iter()
            .map(|r| clean_markup(r.trim()))
            .filter(|r| !r.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            continue;
        }

        out.push(SubtitleLine::new(0, start, end, text));
    }

    out
}

/// Rows grouped by separator lines, which may hold stray whitespace.
fn blocks(content: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for row in content.lines() {
        if row.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(row);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn parse_timing(row: &str) -> Option<(u64, u64)> {
    let (start, rest) = row.split_once("-->")?;
    // VTT cue settings follow the end timestamp
    let end = rest.split_whitespace().next()?;
    let start = parse_srt_time(start).ok()?;
    let end = parse_srt_time(end).ok()?;
    Some((start, end))
}

fn clean_markup(text: &str) -> String {
    let stripped = strip(&ASS_OVERRIDE, text);
    strip(&MARKUP_TAG, &stripped).trim().to_string()
}

/// Parse the `[Events]` section of an ASS/SSA script.
///
/// Field order comes from the section's `Format:` line; the text field is
/// always last and may itself contain commas.
fn parse_ass(content: &str) -> Vec<SubtitleLine> {
    let mut out = Vec::new();
    let mut in_events = false;
    let mut fields: Vec<String> = Vec::new();

    for raw in content.lines() {
        let row = raw.trim();
        if row.starts_with('[') {
            in_events = row.eq_ignore_ascii_case("[events]");
            continue;
        }
        if !in_events {
            continue;
        }

        if let Some(format) = row.strip_prefix("Format:") {
            fields = format.split(',').map(|f| f.trim().to_ascii_lowercase()).collect();
            continue;
        }

        // Comment: lines are skipped along with anything else that is not dialogue
        let Some(body) = row.strip_prefix("Dialogue:") else {
            continue;
        };
        if fields.is_empty() {
            fields = default_ass_fields();
        }

        let values: Vec<&str> = body.trim_start().splitn(fields.len(), ',').collect();
        if values.len() < fields.len() {
            warn!(line = row, "skipping malformed dialogue line");
            continue;
        }
        let get = |name: &str| {
            fields
                .iter()
                .position(|f| f == name)
                .and_then(|i| values.get(i))
                .map(|v| v.trim())
        };

        let (Some(start), Some(end), Some(text)) = (get("start"), get("end"), get("text")) else {
            continue;
        };
        let (Ok(start), Ok(end)) = (parse_srt_time(start), parse_srt_time(end)) else {
            warn!(line = row, "skipping dialogue with invalid timing");
            continue;
        };

        let text = ass_plaintext(text);
        if text.is_empty() {
            continue;
        }

        let mut line = SubtitleLine::new(0, start, end, text);
        line.style = get("style").filter(|s| !s.is_empty()).map(str::to_string);
        out.push(line);
    }

    out
}

fn default_ass_fields() -> Vec<String> {
    [
        "layer", "start", "end", "style", "name", "marginl", "marginr", "marginv", "effect",
        "text",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Strip override tags and turn ASS escapes into plain text.
fn ass_plaintext(text: &str) -> String {
    let stripped = strip(&ASS_OVERRIDE, text);
    stripped
        .replace("\\N", "\n")
        .replace("\\n", "\n")
        .replace("\\h", " ")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
