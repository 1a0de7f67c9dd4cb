use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::schema::TrimChoice;

#[derive(Debug, Parser)]
#[command(author, version, about = "Guess, import, and transform delimited tables", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Guess an input's charset, separator, quote, trim, and column types
    Probe(ProbeArgs),
    /// Import an input into clean typed CSV using a guessed or saved format
    Import(ImportArgs),
    /// Filter, sort, and calculate columns over an imported table
    Process(ProcessArgs),
    /// Concatenate several inputs into one table
    Concat(ConcatArgs),
}

/// Stage overrides shared by every command that guesses a format. A set
/// override pins that guess stage to the given value.
#[derive(Debug, Clone, Default, Args)]
pub struct OverrideArgs {
    /// Character encoding of the input (skips the charset guess)
    #[arg(long = "charset")]
    pub charset: Option<String>,
    /// Separator character ('tab', ';', '|', 'none', or any single char)
    #[arg(long = "separator", value_parser = parse_separator)]
    pub separator: Option<SeparatorChoice>,
    /// Quote character ('none' or any single char)
    #[arg(long = "quote", value_parser = parse_quote)]
    pub quote: Option<QuoteChoice>,
    /// Trim margins as `top,bottom,left,right`
    #[arg(long = "trim", value_parser = parse_trim)]
    pub trim: Option<TrimChoice>,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Input file to inspect ('-' for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Write the guessed format to this YAML sidecar
    #[arg(short = 'f', long = "format-out")]
    pub format_out: Option<PathBuf>,
    /// Number of lines to sample when guessing (0 means all)
    #[arg(long, default_value_t = 200)]
    pub sample_lines: usize,
    /// Emit the report as JSON instead of a table
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub overrides: OverrideArgs,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Input file to import ('-' for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Output CSV file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Saved format sidecar to apply instead of guessing
    #[arg(short = 'f', long = "format")]
    pub format: Option<PathBuf>,
    /// Delimiter for the output CSV
    #[arg(long = "output-delimiter", value_parser = parse_delimiter, default_value = ",")]
    pub output_delimiter: u8,
    /// Render output as an aligned table to stdout
    #[arg(long = "table")]
    pub table: bool,
    /// Limit number of rows emitted
    #[arg(long)]
    pub limit: Option<usize>,
    #[command(flatten)]
    pub overrides: OverrideArgs,
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Input file to process ('-' for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Output CSV file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Saved format sidecar to apply instead of guessing
    #[arg(short = 'f', long = "format")]
    pub format: Option<PathBuf>,
    /// Row filter expressions; every one must hold
    #[arg(long = "filter", action = clap::ArgAction::Append)]
    pub filters: Vec<String>,
    /// Sort directives of the form `column[:asc|desc]`
    #[arg(long = "sort", action = clap::ArgAction::Append)]
    pub sort: Vec<String>,
    /// Calculated columns using `name=expression`
    #[arg(long = "calc", action = clap::ArgAction::Append)]
    pub calcs: Vec<String>,
    /// Delimiter for the output CSV
    #[arg(long = "output-delimiter", value_parser = parse_delimiter, default_value = ",")]
    pub output_delimiter: u8,
    /// Render output as an aligned table to stdout
    #[arg(long = "table")]
    pub table: bool,
    /// Limit number of rows emitted
    #[arg(long)]
    pub limit: Option<usize>,
    #[command(flatten)]
    pub overrides: OverrideArgs,
}

#[derive(Debug, Args)]
pub struct ConcatArgs {
    /// Two or more input files
    #[arg(short = 'i', long = "input", required = true, action = clap::ArgAction::Append)]
    pub inputs: Vec<PathBuf>,
    /// Output CSV file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// How to handle columns missing from some inputs
    #[arg(long = "missing-columns", value_enum, default_value = "omit")]
    pub missing_columns: MissingColumns,
    /// Prepend a column recording each row's source file
    #[arg(long = "source-column")]
    pub source_column: bool,
    /// Delimiter for the output CSV
    #[arg(long = "output-delimiter", value_parser = parse_delimiter, default_value = ",")]
    pub output_delimiter: u8,
    /// Render output as an aligned table to stdout
    #[arg(long = "table")]
    pub table: bool,
    #[command(flatten)]
    pub overrides: OverrideArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum MissingColumns {
    Omit,
    Default,
    WrapMaybe,
}

/// A separator override; `None` reads the whole line as one column.
#[derive(Debug, Clone, Copy)]
pub struct SeparatorChoice(pub Option<char>);

/// A quote override; `None` disables quoting.
#[derive(Debug, Clone, Copy)]
pub struct QuoteChoice(pub Option<char>);

pub fn parse_separator(value: &str) -> Result<SeparatorChoice, String> {
    let inner = match value {
        "none" => None,
        "tab" | "\t" => Some('\t'),
        "comma" | "," => Some(','),
        "pipe" | "|" => Some('|'),
        "semicolon" | ";" => Some(';'),
        "space" => Some(' '),
        other => Some(single_char(other, "Separator")?),
    };
    Ok(SeparatorChoice(inner))
}

pub fn parse_quote(value: &str) -> Result<QuoteChoice, String> {
    let inner = match value {
        "none" => None,
        other => Some(single_char(other, "Quote")?),
    };
    Ok(QuoteChoice(inner))
}

fn single_char(value: &str, what: &str) -> Result<char, String> {
    let mut chars = value.chars();
    let first = chars
        .next()
        .ok_or_else(|| format!("{what} cannot be empty"))?;
    if chars.next().is_some() {
        return Err(format!("{what} must be a single character"));
    }
    Ok(first)
}

pub fn parse_trim(value: &str) -> Result<TrimChoice, String> {
    TrimChoice::parse(value).map_err(|err| err.to_string())
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let first = single_char(other, "Delimiter")?;
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_values_parse() {
        assert_eq!(parse_separator("tab").unwrap().0, Some('\t'));
        assert_eq!(parse_separator(";").unwrap().0, Some(';'));
        assert_eq!(parse_separator("none").unwrap().0, None);
        assert!(parse_separator("ab").is_err());
    }

    #[test]
    fn quote_values_parse() {
        assert_eq!(parse_quote("'").unwrap().0, Some('\''));
        assert_eq!(parse_quote("none").unwrap().0, None);
        assert!(parse_quote("").is_err());
    }

    #[test]
    fn trim_values_parse() {
        assert_eq!(parse_trim("1,0,2,0").unwrap(), TrimChoice::new(1, 0, 2, 0));
        assert!(parse_trim("1,2").is_err());
    }
}
