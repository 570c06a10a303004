//! Parser for the extraction output contract.
//!
//! The model answers either `IGNORAR [reason]` or `;`-separated rows with
//! double-quoted fields (`""` escapes a quote). Fields may contain the
//! delimiter and newlines. A record whose quote never closes is skipped and
//! the scan restarts on the following line, so one bad row cannot swallow
//! the rest of the output.

use crate::error::ExtractionError;
use crate::types::NewNiche;

use super::prompts::IGNORE_MARKER;

/// Reason recorded when the model ignores a page without saying why.
pub const DEFAULT_IGNORE_REASON: &str = "No relevante para el producto/target";

/// Minimum fields for a niche row (URL column is optional).
const MIN_FIELDS: usize = 6;

const PREVIEW_CHARS: usize = 200;

/// A complete record read from delimited text.
#[derive(Debug, Clone, PartialEq)]
pub struct DelimitedRecord {
    /// 1-based line the record starts on.
    pub line: usize,
    pub fields: Vec<String>,
}

/// Result of scanning delimited text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelimitedRead {
    pub records: Vec<DelimitedRecord>,
    /// 1-based start lines of records whose quotes never closed.
    pub malformed_lines: Vec<usize>,
}

/// Quote-aware reader for `delimiter`-separated text.
///
/// Field values are returned unquoted and untrimmed. Blank lines produce no
/// record. A `\r` before a line break is dropped only outside quotes.
pub fn read_delimited(text: &str, delimiter: char) -> DelimitedRead {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut read = DelimitedRead::default();
    let mut i = 0;

    while i < lines.len() {
        let start = i;
        if lines[start].trim().is_empty() {
            i += 1;
            continue;
        }

        let mut splitter = FieldSplitter::new(delimiter);
        splitter.feed(lines[start]);

        let mut unterminated = false;
        let mut hit_eof = false;
        while splitter.in_quotes {
            match lines.get(i + 1) {
                None => {
                    unterminated = true;
                    hit_eof = true;
                    break;
                }
                Some(next) if starts_record(next, delimiter) => {
                    unterminated = true;
                    break;
                }
                Some(next) => {
                    i += 1;
                    splitter.feed_newline();
                    splitter.feed(next);
                }
            }
        }

        if unterminated {
            read.malformed_lines.push(start + 1);
            // At EOF the continuation lines were never checked on their own.
            i = if hit_eof { start + 1 } else { i + 1 };
            continue;
        }

        read.records.push(DelimitedRecord {
            line: start + 1,
            fields: splitter.finish(),
        });
        i += 1;
    }

    read
}

/// A line that opens a new quoted record rather than continuing a field.
///
/// Inside an open field a leading `""` is an escaped quote, and a `"`
/// followed by the delimiter or the line end closes the field.
fn starts_record(line: &str, delimiter: char) -> bool {
    let trimmed = line.trim_start();
    let mut chars = trimmed.chars();
    if chars.next() != Some('"') {
        return false;
    }
    match chars.next() {
        None | Some('"') | Some('\r') => false,
        Some(c) if c == delimiter => false,
        Some(_) => trimmed.contains(&format!("\"{delimiter}\"")),
    }
}

struct FieldSplitter {
    delimiter: char,
    fields: Vec<String>,
    current: String,
    in_quotes: bool,
}

impl FieldSplitter {
    fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            fields: Vec::new(),
            current: String::new(),
            in_quotes: false,
        }
    }

    fn feed(&mut self, line: &str) {
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '"' if self.in_quotes && chars.peek() == Some(&'"') => {
                    chars.next();
                    self.current.push('"');
                }
                '"' => self.in_quotes = !self.in_quotes,
                '\r' if !self.in_quotes && chars.peek().is_none() => {}
                c if c == self.delimiter && !self.in_quotes => {
                    self.fields.push(std::mem::take(&mut self.current));
                }
                c => self.current.push(c),
            }
        }
    }

    fn feed_newline(&mut self) {
        self.current.push('\n');
    }

    fn finish(mut self) -> Vec<String> {
        self.fields.push(self.current);
        self.fields
    }
}

/// What the model decided about a page.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// Page not relevant.
    Ignored { reason: String },
    /// At least one niche row parsed. `skipped` counts rejected rows.
    Niches { niches: Vec<NewNiche>, skipped: usize },
}

/// Interpret raw model output for the page at `page_url`.
pub fn parse_extraction_output(
    raw: &str,
    page_url: &str,
) -> Result<ExtractionOutcome, ExtractionError> {
    let body = strip_code_fences(raw);
    let body = body.trim();
    if body.is_empty() {
        return Err(ExtractionError::EmptyOutput);
    }

    if let Some(reason) = ignore_reason(body) {
        return Ok(ExtractionOutcome::Ignored { reason });
    }

    let read = read_delimited(body, ';');
    let mut skipped = 0;

    for line in &read.malformed_lines {
        tracing::warn!(line, url = page_url, "skipping row with unbalanced quote");
        skipped += 1;
    }

    let mut niches = Vec::new();
    for record in read.records {
        let fields: Vec<&str> = record.fields.iter().map(|f| f.trim()).collect();

        // Prose around the table ("Aquí tienes...") has no delimiter.
        if fields.len() == 1 {
            tracing::debug!(line = record.line, "ignoring non-row line");
            continue;
        }
        if is_header(&fields) {
            continue;
        }
        if fields.len() < MIN_FIELDS {
            tracing::warn!(
                line = record.line,
                fields = fields.len(),
                url = page_url,
                "skipping row with too few fields"
            );
            skipped += 1;
            continue;
        }
        if fields[0].is_empty() || fields[1].is_empty() {
            tracing::warn!(line = record.line, url = page_url, "skipping row without problem or persona");
            skipped += 1;
            continue;
        }

        let source_url = match fields.get(6) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => page_url.to_string(),
        };

        niches.push(NewNiche {
            problem: fields[0].to_string(),
            persona: fields[1].to_string(),
            functional_cause: fields[2].to_string(),
            emotional_load: fields[3].to_string(),
            evidence: fields[4].to_string(),
            alternatives: fields[5].to_string(),
            source_url,
        });
    }

    if niches.is_empty() {
        return Err(ExtractionError::NoParseableRows {
            skipped,
            preview: preview(body),
        });
    }

    Ok(ExtractionOutcome::Niches { niches, skipped })
}

/// `Some(reason)` if the output is an ignore verdict.
fn ignore_reason(body: &str) -> Option<String> {
    let unwrapped = body.trim_start_matches(|c: char| c == '"' || c == '*' || c.is_whitespace());
    let rest = unwrapped.strip_prefix(IGNORE_MARKER)?;

    // "IGNORARLO" or similar is prose, not the marker.
    if rest.chars().next().is_some_and(|c| c.is_alphanumeric()) {
        return None;
    }

    let reason = rest
        .trim_matches(|c: char| c == '"' || c == '*' || c.is_whitespace())
        .trim_start_matches(|c: char| matches!(c, '-' | ':' | '.' | ',') || c.is_whitespace())
        .trim();

    Some(if reason.is_empty() {
        DEFAULT_IGNORE_REASON.to_string()
    } else {
        reason.to_string()
    })
}

fn is_header(fields: &[&str]) -> bool {
    fields.len() >= 2
        && fields[0].eq_ignore_ascii_case("problem")
        && fields[1].eq_ignore_ascii_case("persona")
}

fn strip_code_fences(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn preview(body: &str) -> String {
    super::prompts::truncate_chars(body, PREVIEW_CHARS).to_string()
}
