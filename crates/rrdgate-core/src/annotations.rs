//! Annotation source: a small CSV file of timestamped events served back
//! for the dashboard's annotation queries.
//!
//! The file is re-read on every request so edits show up without a
//! restart. Columns are resolved by header name; `time` holds epoch
//! milliseconds. One record per line, `"` quoting with `""` escapes.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::warn;

/// One annotation as the dashboard expects it. The `annotation` marker
/// field is literal and identical on every row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub annotation: &'static str,
    pub time: i64,
    pub title: String,
    pub tags: String,
    pub text: String,
}

const MARKER: &str = "annotation";

/// Reads the CSV at `path` and returns rows with
/// `from_millis <= time <= to_millis`, both bounds inclusive.
///
/// Any failure (missing file, unusable header, bad rows) degrades to
/// fewer rows, never an error.
pub fn load_between(path: &Path, from_millis: i64, to_millis: i64) -> Vec<Annotation> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cannot read annotations file");
            return Vec::new();
        }
    };
    parse(&text)
        .into_iter()
        .filter(|a| from_millis <= a.time && a.time <= to_millis)
        .collect()
}

fn parse(text: &str) -> Vec<Annotation> {
    let mut lines = text.lines().map(|l| l.strip_suffix('\r').unwrap_or(l));

    let Some(header_line) = lines.next() else {
        return Vec::new();
    };
    let header = split_line(header_line.trim_start_matches('\u{feff}'));
    let col = |name: &str| {
        header
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    };

    let Some(time_col) = col("time") else {
        warn!("annotations file has no \"time\" column");
        return Vec::new();
    };
    let title_col = col("title");
    let tags_col = col("tags");
    let text_col = col("text");

    let mut rows = Vec::new();
    for (i, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_line(line);
        let Some(time) = fields.get(time_col).and_then(|v| v.trim().parse().ok()) else {
            warn!(line = i + 2, "annotation row has no usable time, skipping");
            continue;
        };
        let take =
            |idx: Option<usize>| idx.and_then(|i| fields.get(i)).cloned().unwrap_or_default();
        rows.push(Annotation {
            annotation: MARKER,
            time,
            title: take(title_col),
            tags: take(tags_col),
            text: take(text_col),
        });
    }
    rows
}

/// Splits one CSV record. Quoted fields may contain commas; `""` inside
/// quotes is a literal quote.
fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
    }
    fields.push(field);
    fields
}
