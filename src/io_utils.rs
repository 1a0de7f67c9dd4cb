//! I/O utilities for reading raw tabular text and writing CSV.
//!
//! All file I/O in tablecast flows through this module. It provides:
//!
//! - **Charset candidates**: raw bytes decoded under every plausible
//!   encoding, BOM-aware, feeding the charset guess stage.
//! - **Streaming decode**: once a charset is known, input is decoded while
//!   reading via `encoding_rs_io` instead of buffering raw bytes.
//! - **stdin/stdout**: the `-` path convention routes through standard
//!   streams.
//! - **Quoting**: CSV output uses `QuoteStyle::Always` for round-trip
//!   safety, and is always UTF-8.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE, WINDOWS_1252};
use encoding_rs_io::DecodeReaderBytesBuilder;

use crate::recordset::RecordSet;

/// Encodings tried when the input carries no BOM.
const CHARSET_CANDIDATES: &[&Encoding] = &[UTF_8, WINDOWS_1252, UTF_16LE, UTF_16BE];

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| anyhow!("Unknown encoding '{label}'"))
}

fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    if is_dash(path) {
        Ok(Box::new(std::io::stdin().lock()))
    } else {
        Ok(Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
        )))
    }
}

pub fn read_input_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut reader = open_input(path)?;
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .with_context(|| format!("Reading {path:?}"))?;
    Ok(bytes)
}

/// Splits decoded text into lines, tolerating CRLF. Only the empty artifact
/// of a final newline is dropped; interior blank lines stay, they matter to
/// trim guessing.
pub fn split_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect();
    if lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines
}

/// Decodes the input under every candidate encoding. A BOM decides outright;
/// otherwise each candidate that decodes cleanly (no errors, no NUL or
/// replacement characters) is returned, in candidate order.
pub fn decode_candidates(bytes: &[u8]) -> Vec<(&'static Encoding, Vec<String>)> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        let (text, _, _) = encoding.decode(bytes);
        return vec![(encoding, split_lines(&text))];
    }
    CHARSET_CANDIDATES
        .iter()
        .filter_map(|encoding| {
            let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
            if had_errors || text.contains(['\0', '\u{FFFD}']) {
                return None;
            }
            Some((*encoding, split_lines(&text)))
        })
        .collect()
}

/// Reads and decodes input under one known encoding, streaming the decode.
pub fn read_decoded_lines(path: &Path, encoding: &'static Encoding) -> Result<Vec<String>> {
    let reader = open_input(path)?;
    let mut decoder = DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .build(reader);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .with_context(|| format!("Decoding {path:?} as {}", encoding.name()))?;
    Ok(split_lines(&text))
}

/// Decodes an already-buffered input under one known encoding. Used when the
/// bytes were read for format guessing and must not be read from the source
/// again (stdin cannot be reopened).
pub fn decode_lines(bytes: &[u8], encoding: &'static Encoding) -> Vec<String> {
    let (text, _) = encoding.decode_with_bom_removal(bytes);
    split_lines(&text)
}

pub fn open_csv_writer(path: Option<&Path>, delimiter: u8) -> Result<csv::Writer<Box<dyn Write>>> {
    let base: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout()),
    };
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    Ok(builder.from_writer(base))
}

/// Materializes a record set into a header row plus display rows, forcing
/// each lazy cell. Walks by `index_valid` so a row limit never computes
/// rows past it; the first broken cell aborts with its row error.
pub fn record_set_rows(
    set: &dyn RecordSet,
    limit: Option<usize>,
) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let header: Vec<String> = set
        .columns()
        .iter()
        .map(|column| column.id().to_string())
        .collect();
    let mut rows = Vec::new();
    let mut row = 0;
    while limit.is_none_or(|limit| row < limit) && set.index_valid(row)? {
        let mut cells = Vec::with_capacity(header.len());
        for column in set.columns() {
            let value = column
                .value(row)
                .with_context(|| format!("Reading column '{}'", column.id()))?;
            cells.push(value.map(|value| value.as_display()).unwrap_or_default());
        }
        rows.push(cells);
        row += 1;
    }
    Ok((header, rows))
}

pub fn write_rows(
    path: Option<&Path>,
    delimiter: u8,
    header: &[String],
    rows: &[Vec<String>],
) -> Result<()> {
    let mut writer = open_csv_writer(path, delimiter)?;
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_with_crlf_and_trailing_newline() {
        assert_eq!(split_lines("a,b\r\nc,d\n"), vec!["a,b", "c,d"]);
        assert_eq!(split_lines("a\n\n\n"), vec!["a", "", ""]);
        assert_eq!(split_lines(""), Vec::<String>::new());
    }

    #[test]
    fn bom_decides_the_candidate_list() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "a,b".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let candidates = decode_candidates(&bytes);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].0.name(), UTF_16LE.name());
        assert_eq!(candidates[0].1, vec!["a,b"]);
    }

    #[test]
    fn plain_ascii_offers_utf8_first() {
        let candidates = decode_candidates(b"x,y\n1,2\n");
        assert!(!candidates.is_empty());
        assert_eq!(candidates[0].0.name(), UTF_8.name());
    }

    #[test]
    fn invalid_utf8_still_decodes_as_windows_1252() {
        // 0xE9 is e-acute in windows-1252 but not valid UTF-8
        let candidates = decode_candidates(b"caf\xE9,1\n");
        assert!(candidates.iter().all(|(e, _)| e.name() != UTF_8.name()));
        let cp1252 = candidates
            .iter()
            .find(|(e, _)| e.name() == WINDOWS_1252.name())
            .expect("windows-1252 candidate");
        assert_eq!(cp1252.1, vec!["café,1"]);
    }

    #[test]
    fn unknown_encoding_labels_are_rejected() {
        assert!(resolve_encoding("utf-8").is_ok());
        assert!(resolve_encoding("windows-1252").is_ok());
        assert!(resolve_encoding("no-such-charset").is_err());
    }
}
