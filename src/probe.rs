//! `probe` command: guess an input's format and report it.

use std::path::Path;

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use log::info;
use serde::Serialize;

use crate::{
    choice::{Choice, Choices},
    cli::{OverrideArgs, ProbeArgs},
    guess::{self, FormatOverrides},
    io_utils,
    schema::{TextFormat, TrimChoice},
    table,
};

/// Turns command-line stage overrides into guess overrides. The charset
/// label resolves eagerly so a typo fails before the input is read.
pub(crate) fn format_overrides(args: &OverrideArgs) -> Result<FormatOverrides> {
    let charset = match args.charset.as_deref() {
        Some(label) => Some(io_utils::resolve_encoding(label)?),
        None => None,
    };
    Ok(FormatOverrides {
        charset,
        separator: args.separator.map(|choice| choice.0),
        quote: args.quote.map(|choice| choice.0),
        trim: args.trim,
    })
}

/// Builds the guess tree over decoded charset candidates and walks the best
/// path. `sample_lines` caps how many lines feed the guess; 0 samples
/// everything.
pub(crate) fn guess_from_candidates(
    mut candidates: Vec<(&'static Encoding, Vec<String>)>,
    overrides: &FormatOverrides,
    sample_lines: usize,
) -> Result<(TextFormat, Choices)> {
    if sample_lines > 0 {
        for (_, lines) in &mut candidates {
            lines.truncate(sample_lines);
        }
    }
    let tree = guess::guess_text_format(candidates, overrides)?;
    let (format, choices) = tree.resolve_first()?;
    Ok((format, choices))
}

/// Reads the whole input and guesses its format.
pub(crate) fn guess_format(
    input: &Path,
    overrides: &FormatOverrides,
    sample_lines: usize,
) -> Result<(TextFormat, Choices)> {
    let bytes = io_utils::read_input_bytes(input)?;
    let candidates = io_utils::decode_candidates(&bytes);
    guess_from_candidates(candidates, overrides, sample_lines)
        .with_context(|| format!("Guessing format of {:?}", input))
}

#[derive(Debug, Serialize)]
struct ProbeReport<'a> {
    charset: &'a str,
    separator: Option<char>,
    quote: Option<char>,
    trim: TrimChoice,
    columns: Vec<ColumnReport>,
}

#[derive(Debug, Serialize)]
struct ColumnReport {
    name: String,
    column_type: String,
}

fn column_reports(format: &TextFormat) -> Vec<ColumnReport> {
    format
        .columns
        .iter()
        .map(|column| ColumnReport {
            name: column.id.as_str().to_string(),
            column_type: column.column_type.to_string(),
        })
        .collect()
}

fn choice_value(choice: &Choice) -> String {
    match choice {
        Choice::Charset(encoding) => encoding.name().to_string(),
        Choice::Separator(Some(ch)) | Choice::Quote(Some(ch)) => format!("{ch:?}"),
        Choice::Separator(None) | Choice::Quote(None) => "none".to_string(),
        Choice::Trim(trim) => trim.to_string(),
    }
}

fn print_report(format: &TextFormat, choices: &Choices) {
    let stage_headers = vec!["stage".to_string(), "guess".to_string()];
    let stage_rows: Vec<Vec<String>> = choices
        .made()
        .iter()
        .map(|choice| vec![choice.kind().label().to_string(), choice_value(choice)])
        .collect();
    table::print_table(&stage_headers, &stage_rows);
    println!();
    let column_headers = vec!["column".to_string(), "type".to_string()];
    let column_rows: Vec<Vec<String>> = column_reports(format)
        .into_iter()
        .map(|report| vec![report.name, report.column_type])
        .collect();
    table::print_table(&column_headers, &column_rows);
}

pub fn execute(args: &ProbeArgs) -> Result<()> {
    let overrides = format_overrides(&args.overrides)?;
    let (format, choices) = guess_format(&args.input, &overrides, args.sample_lines)?;

    if args.json {
        let report = ProbeReport {
            charset: &format.charset,
            separator: format.separator,
            quote: format.quote,
            trim: format.trim,
            columns: column_reports(&format),
        };
        let rendered =
            serde_json::to_string_pretty(&report).context("Rendering probe report")?;
        println!("{rendered}");
    } else {
        print_report(&format, &choices);
    }

    if let Some(path) = &args.format_out {
        format.save(path)?;
        info!("Wrote format to {:?}", path);
    }
    info!(
        "Probed {:?}: charset {}, {} column(s)",
        args.input,
        format.charset,
        format.columns.len()
    );
    Ok(())
}
