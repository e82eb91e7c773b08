//! Parsers over `mysqlbinlog` text output and `mysqldump` header comments.

use crate::error::{PitrError, Result};
use crate::model::BinlogInfo;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;

const DUMP_HEADER_SENTINEL: &str = "-- Position to start replication or point-in-time recovery from";
/// Read-ahead bound for [`parse_dump_header_coordinates`]; the single source
/// of truth for "read at most 100 lines" — callers that pre-read lines from
/// disk before handing them to the parser should cap at this constant too.
pub const DUMP_HEADER_LINE_LIMIT: usize = 100;

static CHANGE_MASTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"CHANGE MASTER TO MASTER_LOG_FILE='([^.]+)\.([0-9]+)', MASTER_LOG_POS=([0-9]+);")
        .expect("static regex is valid")
});

/// Parses a `#<YYMMDD> <HH:MM:SS> server id <n> end_log_pos <p> …` line.
///
/// Returns `Ok(None)` for `end_log_pos 0` (the fake events `mysqlbinlog` emits
/// around `--start-datetime`/`--stop-datetime` boundaries). Any other
/// malformed line is an error, never a silent skip.
pub fn parse_event_time_line(line: &str) -> Result<Option<DateTime<Local>>> {
    if !line.contains("server id") {
        return Ok(None);
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    // `#YYMMDD HH:MM:SS server id <n> end_log_pos <p> ...`
    if tokens.len() < 7 || tokens[2] != "server" || tokens[3] != "id" || tokens[5] != "end_log_pos" {
        return Err(PitrError::Parse(format!(
            "unexpected mysqlbinlog event-time line layout: {line:?}"
        )));
    }

    let date_token = tokens[0].trim_start_matches('#');
    let time_token = tokens[1];
    let end_log_pos: i64 = tokens[6].parse().map_err(|_| {
        PitrError::Parse(format!("non-numeric end_log_pos in line: {line:?}"))
    })?;

    if end_log_pos == 0 {
        return Ok(None);
    }

    let date = NaiveDate::parse_from_str(date_token, "%y%m%d")
        .map_err(|e| PitrError::Parse(format!("bad date {date_token:?} in line {line:?}: {e}")))?;
    let naive = NaiveDateTime::parse_from_str(
        &format!("{date} {time_token}"),
        "%Y-%m-%d %H:%M:%S",
    )
    .map_err(|e| PitrError::Parse(format!("bad time {time_token:?} in line {line:?}: {e}")))?;

    match Local.from_local_datetime(&naive).single() {
        Some(dt) => Ok(Some(dt)),
        None => Err(PitrError::Parse(format!(
            "ambiguous or invalid local time for line {line:?}"
        ))),
    }
}

/// Parses a `# at <pos>` line. Returns `Ok(None)` for lines without the prefix.
pub fn parse_event_position_line(line: &str) -> Result<Option<i64>> {
    if !line.starts_with("# at ") {
        return Ok(None);
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 3 {
        return Err(PitrError::Parse(format!(
            "unexpected mysqlbinlog event-position line layout: {line:?}"
        )));
    }
    let pos: i64 = tokens[2]
        .parse()
        .map_err(|_| PitrError::Parse(format!("non-numeric position in line: {line:?}")))?;
    Ok(Some(pos))
}

/// Scans `mysqlbinlog` decode output for the first event-start position at or
/// after `target_time`, discarding the synthetic `FORMAT_DESCRIPTION_EVENT`
/// position (always `4`) if it is the first candidate seen.
///
/// `lines` must interleave `# at <pos>` lines followed eventually by their
/// matching `#<date> <time> server id …` line, as `mysqlbinlog` emits them.
pub fn binlog_event_position_at_or_after_time(
    lines: impl IntoIterator<Item = impl AsRef<str>>,
    target_time: DateTime<Local>,
) -> Result<i64> {
    let mut pending_position: Option<i64> = None;
    let mut first_position_seen = false;

    for line in lines {
        let line = line.as_ref();
        if let Some(pos) = parse_event_position_line(line)? {
            pending_position = Some(pos);
            continue;
        }
        if let Some(event_time) = parse_event_time_line(line)? {
            let Some(pos) = pending_position.take() else {
                continue;
            };
            if !first_position_seen {
                first_position_seen = true;
                if pos == 4 {
                    // Synthetic FORMAT_DESCRIPTION_EVENT; never a real target.
                    continue;
                }
            }
            if event_time >= target_time {
                return Ok(pos);
            }
        }
    }

    Err(PitrError::NotFound(format!(
        "no binlog event at or after {target_time}"
    )))
}

/// Extracts the `CHANGE MASTER TO …` coordinates from a `mysqldump --master-data=2`
/// header, scanning at most the first 100 lines after the sentinel comment.
pub fn parse_dump_header_coordinates(
    lines: impl IntoIterator<Item = impl AsRef<str>>,
) -> Result<BinlogInfo> {
    let mut matching = false;
    let mut scanned = 0usize;

    for line in lines {
        let line = line.as_ref();
        if matching {
            scanned += 1;
            if let Some(caps) = CHANGE_MASTER_RE.captures(line) {
                let base = &caps[1];
                let seq_str = &caps[2];
                let sequence: i64 = seq_str.parse().map_err(|_| {
                    PitrError::Parse("CHANGE MASTER TO sequence is not numeric".to_string())
                })?;
                let position: i64 = caps[3].parse().map_err(|_| {
                    PitrError::Parse("CHANGE MASTER TO position is not numeric".to_string())
                })?;
                return Ok(BinlogInfo {
                    file_name: format!("{base}.{seq_str}"),
                    sequence,
                    position,
                });
            }
            if scanned >= DUMP_HEADER_LINE_LIMIT {
                break;
            }
        } else if line.trim_end() == DUMP_HEADER_SENTINEL {
            matching = true;
        }
    }

    Err(PitrError::Parse(
        "dump header has no CHANGE MASTER TO within the first 100 lines after the sentinel"
            .to_string(),
    ))
}
