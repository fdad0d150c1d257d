//! Flat append-only log of readings: `timestamp;field;field;...` with `,` as
//! the decimal separator. Only the last line is ever read back.

use chrono::{Local, NaiveDateTime};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::kospel::{Field, Reading};

pub const DELIMITER: char = ';';
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Assumed to hold at least one full line. A longer last line costs a re-read
// of the whole file.
const TAIL_WINDOW: u64 = 128;

fn trim_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

fn last_line(path: &Path) -> io::Result<Option<String>> {
    let mut file = File::open(path)?;
    let partial = file.metadata()?.len() > TAIL_WINDOW;
    if partial {
        file.seek(SeekFrom::End(-(TAIL_WINDOW as i64)))?;
    }
    let mut tail = Vec::new();
    file.read_to_end(&mut tail)?;

    if partial && !trim_end(&tail).contains(&b'\n') {
        debug!("Last line of {} exceeds {TAIL_WINDOW} bytes, reading whole file", path.display());
        file.seek(SeekFrom::Start(0))?;
        tail.clear();
        file.read_to_end(&mut tail)?;
    }

    let line = trim_end(&tail).rsplit(|&b| b == b'\n').next().unwrap_or_default();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(String::from_utf8(line.to_vec()).ok())
}

/// Decodes a stored line back into fields, dropping the timestamp.
pub fn decode_line(line: &str) -> Option<Reading> {
    let line = line.trim().replace(',', ".");
    let fields = line
        .split(DELIMITER)
        .skip(1)
        .map(Field::parse)
        .collect::<Option<Vec<_>>>()?;
    if fields.is_empty() {
        return None;
    }
    Some(Reading::from(fields))
}

pub fn format_line(timestamp: NaiveDateTime, reading: &Reading) -> String {
    let mut line = timestamp.format(TIMESTAMP_FORMAT).to_string();
    for field in reading.fields() {
        line.push(DELIMITER);
        line += &field.to_string();
    }
    line.replace('.', ",")
}

/// The last reading in the log, or `None` when there is nothing usable:
/// a first run and an unreadable file look the same.
pub fn read_previous(path: &Path) -> Option<Reading> {
    match last_line(path) {
        Ok(line) => line.as_deref().and_then(decode_line),
        Err(err) => {
            debug!("No previous values in {}: {err}", path.display());
            None
        }
    }
}

pub fn store_at(path: &Path, reading: &Reading, timestamp: NaiveDateTime) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", format_line(timestamp, reading))
}

pub fn store(path: &Path, reading: &Reading) -> io::Result<()> {
    store_at(path, reading, Local::now().naive_local())
}
