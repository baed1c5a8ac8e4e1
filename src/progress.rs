//! Parsing of ffmpeg's stderr status lines.
//!
//! ffmpeg rewrites a single status line in place, e.g.
//! `frame=  120 fps= 60 q=28.0 size=  512kB time=00:00:04.00 bitrate=1048.6kbits/s speed=2.0x`,
//! terminating each record with `\r` rather than `\n`.

use std::io::BufRead;

/// Extract the encoded timestamp in seconds from a status line.
///
/// Returns `None` for lines without `time=`, for `time=N/A` and for the
/// negative timestamps ffmpeg prints before the first frame is muxed.
pub fn parse_time(line: &str) -> Option<f64> {
    let start = line.find("time=")? + "time=".len();
    let value = line[start..].split_whitespace().next()?;
    if value.starts_with('-') {
        return None;
    }
    parse_timestamp(value)
}

/// Parse `HH:MM:SS.cc` into seconds.
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Fraction of the input encoded so far, clamped to `[0, 1]`.
pub fn fraction(encoded_seconds: f64, duration_seconds: f64) -> f64 {
    if duration_seconds <= 0.0 || !encoded_seconds.is_finite() {
        return 0.0;
    }
    (encoded_seconds / duration_seconds).clamp(0.0, 1.0)
}

/// Split a byte stream into lines on either `\r` or `\n`, skipping blanks.
pub fn for_each_line<R: BufRead>(reader: R, mut f: impl FnMut(String)) -> std::io::Result<()> {
    for chunk in reader.split(b'\r') {
        let chunk = chunk?;
        for line in String::from_utf8_lossy(&chunk).lines() {
            let line = line.trim();
            if !line.is_empty() {
                f(line.to_string());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_line() {
        let line = "frame=  120 fps= 60 q=28.0 size=     512kB time=00:01:04.50 bitrate=1048.6kbits/s speed=2.0x";
        assert_eq!(parse_time(line), Some(64.5));
    }

    #[test]
    fn test_parse_time_rejects_placeholders() {
        assert_eq!(parse_time("size=N/A time=N/A bitrate=N/A"), None);
        assert_eq!(parse_time("time=-00:00:00.02 bitrate=N/A"), None);
        assert_eq!(parse_time("Stream #0:0: Video: h264"), None);
        assert_eq!(parse_timestamp("01:02"), None);
    }

    #[test]
    fn test_fraction_clamps() {
        assert_eq!(fraction(5.0, 10.0), 0.5);
        assert_eq!(fraction(12.0, 10.0), 1.0);
        assert_eq!(fraction(5.0, 0.0), 0.0);
    }

    #[test]
    fn test_splits_carriage_returns() {
        let input = b"Input #0, mov\nframe=1 time=00:00:01.00\rframe=2 time=00:00:02.00\r\nerror line\n";
        let mut lines = Vec::new();
        for_each_line(&input[..], |line| lines.push(line)).unwrap();
        assert_eq!(
            lines,
            vec![
                "Input #0, mov",
                "frame=1 time=00:00:01.00",
                "frame=2 time=00:00:02.00",
                "error line",
            ]
        );
    }
}
