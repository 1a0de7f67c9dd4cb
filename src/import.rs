//! `import` command: apply a format to raw input and emit clean typed CSV.

use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};
use log::{debug, info};

use crate::{
    cli::ImportArgs,
    guess::{self, FormatOverrides},
    io_utils, probe,
    recordset::{MaterialRecordSet, RecordSet},
    schema::TextFormat,
    table,
};

/// Resolves the format (saved sidecar, or a guess over the whole input) and
/// materializes the input under it. The input is read exactly once on every
/// path, so `-` works: a guessed format reuses the buffered bytes instead of
/// reopening the source.
pub(crate) fn load_table(
    input: &Path,
    sidecar: Option<&Path>,
    overrides: &FormatOverrides,
) -> Result<(TextFormat, Rc<dyn RecordSet>)> {
    let (format, lines) = match sidecar {
        Some(path) => {
            let format = TextFormat::load(path)?;
            let lines = io_utils::read_decoded_lines(input, format.encoding()?)?;
            (format, lines)
        }
        None => {
            let bytes = io_utils::read_input_bytes(input)?;
            let candidates = io_utils::decode_candidates(&bytes);
            let (format, _) = probe::guess_from_candidates(candidates, overrides, 0)
                .with_context(|| format!("Guessing format of {:?}", input))?;
            let lines = io_utils::decode_lines(&bytes, format.encoding()?);
            (format, lines)
        }
    };
    let set = materialize(input, &format, &lines)?;
    Ok((format, set))
}

/// Splits each decoded line with the format's separator and quote, trims the
/// margins, and wraps the rest as typed columns. Cells stay raw until
/// fetched.
fn materialize(
    input: &Path,
    format: &TextFormat,
    lines: &[String],
) -> Result<Rc<dyn RecordSet>> {
    let grid: Vec<Vec<String>> = lines
        .iter()
        .map(|line| guess::split_into_columns(line, format.separator, format.quote))
        .collect();
    let grid = format.trim.trim(&grid);
    debug!(
        "loaded {:?}: {} data row(s) after trim {}",
        input,
        grid.len(),
        format.trim
    );
    let set = MaterialRecordSet::from_grid(&format.columns, &grid)
        .with_context(|| format!("Importing {:?}", input))?;
    Ok(Rc::new(set))
}

/// Renders a record set to the chosen sink: an aligned table on stdout, or
/// CSV to the output path (stdout when none).
pub(crate) fn emit(
    set: &dyn RecordSet,
    output: Option<&Path>,
    delimiter: u8,
    as_table: bool,
    limit: Option<usize>,
) -> Result<usize> {
    let (header, rows) = io_utils::record_set_rows(set, limit)?;
    let count = rows.len();
    if as_table {
        table::print_table(&header, &rows);
    } else {
        io_utils::write_rows(output, delimiter, &header, &rows)?;
    }
    Ok(count)
}

pub fn execute(args: &ImportArgs) -> Result<()> {
    let overrides = probe::format_overrides(&args.overrides)?;
    let (format, set) = load_table(&args.input, args.format.as_deref(), &overrides)?;
    let written = emit(
        set.as_ref(),
        args.output.as_deref(),
        args.output_delimiter,
        args.table,
        args.limit,
    )?;
    info!(
        "Imported {:?}: {} row(s), {} column(s)",
        args.input,
        written,
        format.columns.len()
    );
    Ok(())
}
