//! SRT and ASS writers.

use std::fmt::Write as _;

use subx_models::{SubtitleFormat, SubtitleStyle};

use crate::line::SubtitleLine;
use crate::time::{format_ass_time, format_srt_time};

/// Render lines as SRT, renumbering from 1.
pub fn write_srt(lines: &[SubtitleLine]) -> String {
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_srt_time(line.start_ms),
            format_srt_time(line.end_ms),
            line.text
        );
    }
    out
}

/// Render lines as an ASS script with a single `Default` style.
pub fn write_ass(lines: &[SubtitleLine], style: Option<&SubtitleStyle>) -> String {
    let default_style = SubtitleStyle::default();
    let style = style.unwrap_or(&default_style);
    let outline_color = style
        .outline_color
        .as_deref()
        .map(hex_to_ass_color)
        .unwrap_or_else(|| "&H00000000".to_string());
    let back_color = style
        .shadow_color
        .as_deref()
        .map(hex_to_ass_color)
        .unwrap_or_else(|| "&H00000000".to_string());

    let mut out = String::from(
        "[Script Info]\n\
         ScriptType: v4.00+\n\
         WrapStyle: 0\n\
         ScaledBorderAndShadow: yes\n\
         PlayResX: 1920\n\
         PlayResY: 1080\n\n\
         [V4+ Styles]\n\
         Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, \
         Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, \
         Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n",
    );

    let _ = writeln!(
        out,
        "Style: Default,{},{},{},&H000000FF,{},{},{},{},0,0,100,100,{},0,1,{},{},{},10,10,{},1",
        style.font_family,
        style.font_size,
        hex_to_ass_color(&style.color),
        outline_color,
        back_color,
        ass_bool(style.bold),
        ass_bool(style.italic),
        style.letter_spacing,
        style.outline,
        style.shadow,
        style.alignment,
        style.margin_v,
    );

    out.push_str(
        "\n[Events]\n\
         Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n",
    );

    for line in lines {
        let _ = writeln!(
            out,
            "Dialogue: 0,{},{},Default,,0,0,0,,{}",
            format_ass_time(line.start_ms),
            format_ass_time(line.end_ms),
            line.text.replace('\n', "\\N")
        );
    }

    out
}

/// Render in the given output format. VTT and SRT inputs are written as SRT.
pub fn write_subtitles(
    lines: &[SubtitleLine],
    format: SubtitleFormat,
    style: Option<&SubtitleStyle>,
) -> String {
    if format.is_styled() {
        write_ass(lines, style)
    } else {
        write_srt(lines)
    }
}

fn ass_bool(v: bool) -> i8 {
    if v {
        -1
    } else {
        0
    }
}

/// `#RRGGBB` or `#RRGGBBAA` to `(r, g, b, a)`. Unparseable input is opaque white.
pub fn hex_to_rgba(hex: &str) -> (u8, u8, u8, u8) {
    let hex = hex.trim_start_matches('#');
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2).unwrap_or("zz"), 16).ok();
    match hex.len() {
        6 => match (byte(0), byte(2), byte(4)) {
            (Some(r), Some(g), Some(b)) => (r, g, b, 0),
            _ => (255, 255, 255, 0),
        },
        8 => match (byte(0), byte(2), byte(4), byte(6)) {
            (Some(r), Some(g), Some(b), Some(a)) => (r, g, b, a),
            _ => (255, 255, 255, 0),
        },
        _ => (255, 255, 255, 0),
    }
}

/// `#RRGGBB` to ASS `&HAABBGGRR`.
pub fn hex_to_ass_color(hex: &str) -> String {
    let (r, g, b, a) = hex_to_rgba(hex);
    format!("&H{:02X}{:02X}{:02X}{:02X}", a, b, g, r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_str;

    fn sample() -> Vec<SubtitleLine> {
        vec![
            SubtitleLine::new(5, 1_000, 2_500, "Hello"),
            SubtitleLine::new(9, 3_000, 4_000, "Two\nlines"),
        ]
    }

    #[test]
    fn test_write_srt_layout() {
        let srt = write_srt(&sample());
        assert_eq!(
            srt,
            "1\n00:00:01,000 --> 00:00:02,500\nHello\n\n2\n00:00:03,000 --> 00:00:04,000\nTwo\nlines\n\n"
        );
    }

    #[test]
    fn test_write_ass_is_parseable() {
        let style = SubtitleStyle {
            bold: true,
            color: "#FF8000".to_string(),
            ..Default::default()
        };
        let ass = write_ass(&sample(), Some(&style));
        assert!(ass.contains("Style: Default,Arial,48,&H000080FF,"));
        assert!(ass.contains(",-1,0,0,0,"));
        assert!(ass.contains("Dialogue: 0,0:00:03.00,0:00:04.00,Default,,0,0,0,,Two\\Nlines"));

        let parsed = parse_str(&ass, SubtitleFormat::Ass);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].text, "Two\nlines");
    }

    #[test]
    fn test_hex_colors() {
        assert_eq!(hex_to_rgba("#112233"), (0x11, 0x22, 0x33, 0));
        assert_eq!(hex_to_rgba("11223344"), (0x11, 0x22, 0x33, 0x44));
        assert_eq!(hex_to_rgba("nope"), (255, 255, 255, 0));
        assert_eq!(hex_to_ass_color("#FFFFFF"), "&H00FFFFFF");
    }

    #[test]
    fn test_write_subtitles_picks_format() {
        assert!(write_subtitles(&sample(), SubtitleFormat::Ssa, None).starts_with("[Script Info]"));
        assert!(write_subtitles(&sample(), SubtitleFormat::Vtt, None).starts_with("1\n"));
    }
}
