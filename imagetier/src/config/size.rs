//! Byte sizes written as "30MB", "512k" or plain byte counts.

use thiserror::Error;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// Recognized suffixes, longest first so "MB" wins over "B".
const UNITS: [(&str, usize); 7] = [
    ("GB", GB),
    ("MB", MB),
    ("KB", KB),
    ("G", GB),
    ("M", MB),
    ("K", KB),
    ("B", 1),
];

/// A size string that could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid size '{0}': expected a byte count such as 4096, 512KB or 30MB")]
pub struct SizeParseError(String);

/// Parse a size string into bytes. Case-insensitive, whitespace tolerant.
///
/// ```
/// use imagetier::config::parse_size;
///
/// assert_eq!(parse_size("4096").unwrap(), 4096);
/// assert_eq!(parse_size("30MB").unwrap(), 30 * 1024 * 1024);
/// assert_eq!(parse_size("512 k").unwrap(), 512 * 1024);
/// assert!(parse_size("1.5GB").is_err());
/// ```
pub fn parse_size(input: &str) -> Result<usize, SizeParseError> {
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();

    let (digits, scale) = UNITS
        .iter()
        .find_map(|(suffix, scale)| upper.strip_suffix(suffix).map(|rest| (rest, *scale)))
        .unwrap_or((upper.as_str(), 1));

    let digits = digits.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SizeParseError(input.to_string()));
    }

    digits
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(scale))
        .ok_or_else(|| SizeParseError(input.to_string()))
}

/// Format bytes using the largest unit that divides them exactly.
///
/// ```
/// use imagetier::config::format_size;
///
/// assert_eq!(format_size(30 * 1024 * 1024), "30MB");
/// assert_eq!(format_size(1536), "1536");
/// ```
pub fn format_size(bytes: usize) -> String {
    match [(GB, "GB"), (MB, "MB"), (KB, "KB")]
        .iter()
        .find(|(unit, _)| bytes >= *unit && bytes % unit == 0)
    {
        Some((unit, suffix)) => format!("{}{}", bytes / unit, suffix),
        None => bytes.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("100B").unwrap(), 100);
        assert_eq!(parse_size("2kb").unwrap(), 2048);
        assert_eq!(parse_size("2K").unwrap(), 2048);
        assert_eq!(parse_size("30MB").unwrap(), 30 * MB);
        assert_eq!(parse_size("1g").unwrap(), GB);
    }

    #[test]
    fn test_parse_whitespace() {
        assert_eq!(parse_size("  16 MB ").unwrap(), 16 * MB);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "MB", "abc", "-1MB", "1.5GB", "2TB", "+4"] {
            assert!(parse_size(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_parse_overflow() {
        assert!(parse_size(&format!("{}GB", usize::MAX)).is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0");
        assert_eq!(format_size(KB), "1KB");
        assert_eq!(format_size(30 * MB), "30MB");
        assert_eq!(format_size(4 * GB), "4GB");
        assert_eq!(format_size(MB + 1), (MB + 1).to_string());
    }

    #[test]
    fn test_format_then_parse() {
        for bytes in [KB, 30 * MB, 3 * GB] {
            assert_eq!(parse_size(&format_size(bytes)).unwrap(), bytes);
        }
    }
}
