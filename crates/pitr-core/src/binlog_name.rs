//! Binlog filename codec: `<base>.<seq>` parsing and numeric (not lexicographic) ordering.

use crate::error::{PitrError, Result};
use crate::model::BinlogFile;

/// A parsed binlog filename: the base before the dot, and the numeric sequence after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBinlogName {
    pub base: String,
    pub sequence: i64,
}

/// Splits `name` on the single `.` separating base from sequence.
///
/// Fails if there is not exactly one `.`, or the suffix is not a base-10 integer.
pub fn parse_binlog_name(name: &str) -> Result<ParsedBinlogName> {
    let parts: Vec<&str> = name.splitn(2, '.').collect();
    if parts.len() != 2 {
        return Err(PitrError::Parse(format!(
            "binlog filename {name:?} is not of the form <base>.<seq>"
        )));
    }
    let (base, suffix) = (parts[0], parts[1]);
    if base.is_empty() || suffix.contains('.') {
        return Err(PitrError::Parse(format!(
            "binlog filename {name:?} is not of the form <base>.<seq>"
        )));
    }
    let sequence: i64 = suffix.parse().map_err(|_| {
        PitrError::Parse(format!("binlog filename {name:?} has a non-numeric sequence"))
    })?;
    Ok(ParsedBinlogName {
        base: base.to_string(),
        sequence,
    })
}

/// Returns a copy of `files` sorted ascending by `sequence`.
///
/// Never sort binlog names lexicographically: `"binlog.1000000"` would sort
/// before `"binlog.999999"`.
pub fn sort_binlog_files(files: &[BinlogFile]) -> Vec<BinlogFile> {
    let mut sorted = files.to_vec();
    sorted.sort_by_key(|f| f.sequence);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_base_and_sequence() {
        let parsed = parse_binlog_name("binlog.000042").unwrap();
        assert_eq!(parsed.base, "binlog");
        assert_eq!(parsed.sequence, 42);
    }

    #[test]
    fn round_trips_through_reformatting() {
        let parsed = parse_binlog_name("binlog.000999").unwrap();
        let reformatted = format!("{}.{}", parsed.base, parsed.sequence);
        let reparsed = parse_binlog_name(&reformatted).unwrap();
        assert_eq!(parsed.base, reparsed.base);
        assert_eq!(parsed.sequence, reparsed.sequence);
    }

    #[test]
    fn rejects_missing_dot() {
        assert!(parse_binlog_name("binlog000042").is_err());
    }

    #[test]
    fn rejects_non_numeric_suffix() {
        assert!(parse_binlog_name("binlog.abc").is_err());
    }

    #[test]
    fn rejects_extra_dots() {
        assert!(parse_binlog_name("binlog.tar.000042").is_err());
    }

    #[test]
    fn sorts_numerically_across_the_six_digit_rollover() {
        let files = vec![
            BinlogFile::new("binlog.1000000", 1_000_000, 0),
            BinlogFile::new("binlog.999999", 999_999, 0),
            BinlogFile::new("binlog.000001", 1, 0),
        ];
        let sorted = sort_binlog_files(&files);
        let names: Vec<&str> = sorted.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["binlog.000001", "binlog.999999", "binlog.1000000"]);
    }
}
