//! Timestamp formatting and parsing.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{SubtitleError, SubtitleResult};

/// `[H]H:MM:SS[,.]mmm`, hours optional (WebVTT allows `MM:SS.mmm`).
static TIMESTAMP: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+):)?(\d{1,2}):(\d{1,2})(?:[,.](\d{1,3}))?$").ok()
});

/// Milliseconds to `HH:MM:SS,mmm`.
pub fn format_srt_time(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// Milliseconds to ASS `H:MM:SS.cc` (centiseconds, truncated).
pub fn format_ass_time(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let centis = (ms % 1_000) / 10;
    format!("{}:{:02}:{:02}.{:02}", hours, minutes, seconds, centis)
}

/// Parse an SRT, VTT or ASS timestamp into milliseconds.
///
/// The fractional part is scaled by its width, so ASS centiseconds
/// (`.25`) and SRT milliseconds (`,250`) both mean 250 ms.
pub fn parse_srt_time(ts: &str) -> SubtitleResult<u64> {
    let trimmed = ts.trim();
    let caps = TIMESTAMP
        .as_ref()
        .and_then(|re| re.captures(trimmed))
        .ok_or_else(|| SubtitleError::invalid_timestamp(trimmed))?;

    let num = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };

    let frac_ms = match caps.get(4) {
        Some(m) => {
            let digits = m.as_str();
            let value: u64 = digits.parse().unwrap_or(0);
            match digits.len() {
                1 => value * 100,
                2 => value * 10,
                _ => value,
            }
        }
        None => 0,
    };

    Ok(((num(1) * 60 + num(2)) * 60 + num(3)) * 1000 + frac_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0), "00:00:00,000");
        assert_eq!(format_srt_time(3_723_456), "01:02:03,456");
        assert_eq!(format_srt_time(360_000_000), "100:00:00,000");
    }

    #[test]
    fn test_format_ass_time() {
        assert_eq!(format_ass_time(3_723_456), "1:02:03.45");
        assert_eq!(format_ass_time(1_500), "0:00:01.50");
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(parse_srt_time("01:02:03,456").unwrap(), 3_723_456);
        assert_eq!(parse_srt_time("01:02:03.456").unwrap(), 3_723_456);
        assert_eq!(parse_srt_time("02:03.456").unwrap(), 123_456);
        assert_eq!(parse_srt_time("0:00:01.50").unwrap(), 1_500);
        assert_eq!(parse_srt_time("00:00:05").unwrap(), 5_000);
        assert!(parse_srt_time("abc").is_err());
    }
}
