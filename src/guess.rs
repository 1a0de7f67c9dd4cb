//! Format guessing.
//!
//! Stages run charset -> separator/quote -> trim -> column types, each
//! overridable on its own. The whole guess is exposed as a [`ChoicePoint`]
//! tree whose first path reproduces exactly what the direct stage functions
//! return, while alternative options stay explorable (and memoized) for
//! interactive callers.

use encoding_rs::Encoding;
use itertools::Itertools;
use log::debug;

use crate::choice::{Choice, ChoiceKind, ChoicePoint, Quality};
use crate::data::{DATE_FORMATS, DATETIME_FORMATS, TIME_FORMATS, parse_numeric, parse_temporal};
use crate::error::{Result, TableError};
use crate::schema::{
    BooleanTokens, ColumnId, ColumnInfo, ColumnType, DateFormat, DateKind, NumericFormat,
    TextFormat, TrimChoice,
};

/// Candidate separators in prior-likelihood order; `None` means the whole
/// line is one column.
pub const SEPARATORS: &[Option<char>] = &[
    Some(','),
    Some(';'),
    Some('\t'),
    Some(':'),
    Some('|'),
    Some(' '),
    None,
];

/// Candidate quotes; the quote-less reading is tried first.
pub const QUOTES: &[Option<char>] = &[None, Some('"'), Some('\'')];

const BOOLEAN_PAIRS: &[(&str, &str)] = &[
    ("true", "false"),
    ("t", "f"),
    ("yes", "no"),
    ("y", "n"),
    ("on", "off"),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeparatorGuess {
    pub separator: Option<char>,
    pub quote: Option<char>,
    pub score: f64,
    pub quality: Quality,
}

/// Overrides for individual guess stages. A set stage replaces that stage's
/// options with the given value; the other stages still guess.
#[derive(Debug, Clone, Default)]
pub struct FormatOverrides {
    pub charset: Option<&'static Encoding>,
    pub separator: Option<Option<char>>,
    pub quote: Option<Option<char>>,
    pub trim: Option<TrimChoice>,
}

/// Splits one line into fields. A quote at the start of a field (leading
/// whitespace before it is discarded) opens quoted mode; a doubled quote
/// inside is an escaped literal; quotes anywhere else are literal text.
pub fn split_into_columns(line: &str, separator: Option<char>, quote: Option<char>) -> Vec<String> {
    let Some(sep) = separator else {
        return vec![line.to_string()];
    };
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut pending_ws = String::new();
    let mut at_field_start = true;
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quotes {
            if Some(ch) == quote {
                if chars.peek() == Some(&ch) {
                    chars.next();
                    current.push(ch);
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(ch);
            }
        } else if ch == sep {
            current.push_str(&pending_ws);
            pending_ws.clear();
            fields.push(std::mem::take(&mut current));
            at_field_start = true;
        } else if at_field_start && Some(ch) == quote {
            pending_ws.clear();
            in_quotes = true;
            at_field_start = false;
        } else if at_field_start && ch.is_whitespace() {
            pending_ws.push(ch);
        } else {
            current.push_str(&pending_ws);
            pending_ws.clear();
            current.push(ch);
            at_field_start = false;
        }
    }
    current.push_str(&pending_ws);
    fields.push(current);
    fields
}

/// Scores one separator/quote pair over the sample lines. `None` when the
/// pair is rejected (no samples, or uniformly zero/one column). The flag
/// marks an exact match: every line split to the same count of two or more.
fn pair_score(samples: &[&str], separator: Option<char>, quote: Option<char>) -> Option<(f64, bool)> {
    if samples.is_empty() {
        return None;
    }
    let counts: Vec<usize> = samples
        .iter()
        .map(|line| split_into_columns(line, separator, quote).len())
        .collect();
    let first = counts[0];
    if counts.iter().all(|count| *count == first) {
        if first >= 2 {
            return Some((first as f64 / 10.0, true));
        }
        return None;
    }
    let mean = counts.iter().sum::<usize>() as f64 / counts.len() as f64;
    let variance = counts
        .iter()
        .map(|count| {
            let diff = *count as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / (counts.len() - 1) as f64;
    Some((mean / 10.0 - variance, false))
}

/// Tries every quote/separator pair (quotes outer) and returns the first
/// exact match immediately; otherwise the best-scoring viable pair; failing
/// that, the single-column fallback.
pub fn guess_separator_and_quote(lines: &[String]) -> SeparatorGuess {
    let samples: Vec<&str> = lines
        .iter()
        .map(String::as_str)
        .filter(|line| !line.trim().is_empty())
        .collect();
    let mut best: Option<SeparatorGuess> = None;
    for (quote, separator) in QUOTES.iter().cartesian_product(SEPARATORS.iter()) {
        match pair_score(&samples, *separator, *quote) {
            Some((score, true)) => {
                debug!(
                    "separator guess: exact match {} with {}",
                    Choice::Separator(*separator).describe(),
                    Choice::Quote(*quote).describe()
                );
                return SeparatorGuess {
                    separator: *separator,
                    quote: *quote,
                    score,
                    quality: Quality::Promising,
                };
            }
            Some((score, false)) => {
                if best.as_ref().is_none_or(|current| score > current.score) {
                    best = Some(SeparatorGuess {
                        separator: *separator,
                        quote: *quote,
                        score,
                        quality: Quality::Promising,
                    });
                }
            }
            None => {}
        }
    }
    best.unwrap_or(SeparatorGuess {
        separator: None,
        quote: None,
        score: 0.0,
        quality: Quality::Fallback,
    })
}

/// Best achievable score for a separator across all quotes.
fn best_score_for_separator(samples: &[&str], separator: Option<char>) -> Option<f64> {
    QUOTES
        .iter()
        .filter_map(|quote| pair_score(samples, separator, *quote).map(|(score, _)| score))
        .max_by(f64::total_cmp)
}

/// Per-column alphabet categories accumulated during the trim scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Alphabet {
    digit: bool,
    letter: bool,
    punct: bool,
    boolean: bool,
}

impl Alphabet {
    fn is_empty(&self) -> bool {
        *self == Alphabet::default()
    }

    /// Digits and boolean tokens only; the shape machine-written data has.
    fn machine_only(&self) -> bool {
        !self.letter && !self.punct
    }

    fn merge(&mut self, other: Alphabet) {
        self.digit |= other.digit;
        self.letter |= other.letter;
        self.punct |= other.punct;
        self.boolean |= other.boolean;
    }
}

fn classify_cell(cell: &str) -> Alphabet {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Alphabet::default();
    }
    let lower = trimmed.to_lowercase();
    if BOOLEAN_PAIRS
        .iter()
        .any(|(yes, no)| lower == *yes || lower == *no)
    {
        return Alphabet {
            boolean: true,
            ..Alphabet::default()
        };
    }
    let mut alphabet = Alphabet::default();
    for ch in trimmed.chars() {
        if ch.is_ascii_digit() {
            alphabet.digit = true;
        } else if ch.is_alphabetic() {
            alphabet.letter = true;
        } else if !ch.is_whitespace() {
            alphabet.punct = true;
        }
    }
    alphabet
}

/// Guesses all four trim margins. The top margin comes from scanning a middle
/// row upward: a row where enough columns suddenly gain letters/punctuation
/// over a previously digit-or-boolean-only alphabet is the last header/junk
/// row. Bottom counts trailing all-blank rows; left/right count columns blank
/// in every remaining row.
pub fn guess_trim(grid: &[Vec<String>]) -> TrimChoice {
    if grid.is_empty() {
        return TrimChoice::default();
    }
    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return TrimChoice::default();
    }
    let threshold = if width < 4 {
        (width / 2).max(1)
    } else {
        width / 4
    };
    let mid = grid.len() / 2;
    let mut alphabets = vec![Alphabet::default(); width];
    let mut top = 0;
    for row_index in (0..=mid.min(grid.len() - 1)).rev() {
        let row = &grid[row_index];
        let mut boundary_votes = 0;
        for (column, alphabet) in alphabets.iter_mut().enumerate() {
            let cell = row.get(column).map(String::as_str).unwrap_or("");
            let incoming = classify_cell(cell);
            if incoming.is_empty() {
                continue;
            }
            let gained_text = (incoming.letter && !alphabet.letter)
                || (incoming.punct && !alphabet.punct);
            if gained_text && !alphabet.is_empty() && alphabet.machine_only() {
                boundary_votes += 1;
            }
            alphabet.merge(incoming);
        }
        if boundary_votes >= threshold {
            top = row_index + 1;
            break;
        }
    }

    let mut bottom = 0;
    for row in grid.iter().skip(top).rev() {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            bottom += 1;
        } else {
            break;
        }
    }

    let vertical = TrimChoice::new(top, bottom, 0, 0).trim(grid);
    let mut left = 0;
    let mut right = 0;
    if !vertical.is_empty() {
        for column in 0..width {
            let blank = vertical
                .iter()
                .all(|row| row.get(column).is_none_or(|cell| cell.trim().is_empty()));
            if blank {
                left += 1;
            } else {
                break;
            }
        }
        for column in (left..width).rev() {
            let blank = vertical
                .iter()
                .all(|row| row.get(column).is_none_or(|cell| cell.trim().is_empty()));
            if blank {
                right += 1;
            } else {
                break;
            }
        }
    }
    TrimChoice::new(top, bottom, left, right)
}

fn date_format_candidates() -> Vec<DateFormat> {
    let mut candidates = Vec::new();
    for pattern in DATE_FORMATS {
        candidates.push(DateFormat::new(DateKind::Date, *pattern));
    }
    for pattern in TIME_FORMATS {
        candidates.push(DateFormat::new(DateKind::Time, *pattern));
    }
    for pattern in DATETIME_FORMATS {
        candidates.push(DateFormat::new(DateKind::DateTime, *pattern));
    }
    candidates
}

fn surviving_date_format(cells: &[&str]) -> Option<DateFormat> {
    date_format_candidates()
        .into_iter()
        .find(|format| cells.iter().all(|cell| parse_temporal(cell, format).is_ok()))
}

fn surviving_boolean_pair(cells: &[&str]) -> Option<BooleanTokens> {
    BOOLEAN_PAIRS
        .iter()
        .find(|(yes, no)| {
            cells.iter().all(|cell| {
                cell.eq_ignore_ascii_case(yes) || cell.eq_ignore_ascii_case(no)
            })
        })
        .map(|(yes, no)| BooleanTokens::new(*yes, *no))
}

/// The leading run of characters before anything numeric-looking.
fn leading_symbol(cell: &str) -> &str {
    let end = cell
        .find(|ch: char| ch.is_ascii_digit() || ch == '-' || ch == '+' || ch == '.')
        .unwrap_or(cell.len());
    &cell[..end]
}

/// The trailing run of characters after the last digit or decimal point.
fn trailing_symbol(cell: &str) -> &str {
    let start = cell
        .char_indices()
        .rev()
        .find(|(_, ch)| ch.is_ascii_digit() || *ch == '.')
        .map(|(index, ch)| index + ch.len_utf8())
        .unwrap_or(0);
    &cell[start..]
}

fn common_affix<'a>(cells: &[&'a str], pick: fn(&'a str) -> &'a str) -> Option<String> {
    let first = pick(cells.first()?).trim();
    if first.is_empty() {
        return None;
    }
    if cells.iter().all(|cell| pick(cell).trim() == first) {
        Some(first.to_string())
    } else {
        None
    }
}

const CURRENCY_SYMBOLS: &[&str] = &["$", "€", "£", "¥"];

fn unit_label(prefix: &Option<String>, suffix: &Option<String>) -> String {
    if let Some(prefix) = prefix
        && CURRENCY_SYMBOLS.contains(&prefix.as_str())
    {
        return prefix.clone();
    }
    if let Some(suffix) = suffix
        && (suffix == "%" || CURRENCY_SYMBOLS.contains(&suffix.as_str()))
    {
        return suffix.clone();
    }
    String::new()
}

/// All cells parse as decimals once the common affixes are stripped.
fn numeric_format(cells: &[&str]) -> Option<NumericFormat> {
    let prefix = common_affix(cells, leading_symbol);
    let suffix = common_affix(cells, trailing_symbol);
    let probe = NumericFormat {
        unit: unit_label(&prefix, &suffix),
        min_decimal_places: 0,
        prefix,
        suffix,
    };
    let mut min_decimal_places: Option<u32> = None;
    for cell in cells {
        match parse_numeric(cell, &probe) {
            Ok(value) => {
                let scale = value.scale();
                min_decimal_places =
                    Some(min_decimal_places.map_or(scale, |current| current.min(scale)));
            }
            Err(_) => return None,
        }
    }
    Some(NumericFormat {
        min_decimal_places: min_decimal_places.unwrap_or(0),
        ..probe
    })
}

/// The numeric rule holds for every cell except occurrences of one single
/// consistent token (e.g. `NA`), with at least one numeric cell.
fn numeric_with_blank_token(cells: &[&str]) -> Option<(NumericFormat, String)> {
    let bare = NumericFormat::default();
    let mut numeric_cells = Vec::new();
    let mut token: Option<&str> = None;
    for cell in cells {
        if parse_numeric(cell, &bare).is_ok() {
            numeric_cells.push(*cell);
        } else {
            match token {
                None => token = Some(cell),
                Some(seen) if seen == *cell => {}
                Some(_) => return None,
            }
        }
    }
    let token = token?;
    if numeric_cells.is_empty() {
        return None;
    }
    let format = numeric_format(&numeric_cells)?;
    Some((format, token.to_string()))
}

/// Decides one column's type by precedence: blank, date, boolean, numeric,
/// numeric-or-blank, text.
fn decide_column_type(cells: &[&str]) -> Result<ColumnType> {
    let non_blank: Vec<&str> = cells
        .iter()
        .copied()
        .filter(|cell| !cell.is_empty())
        .collect();
    if non_blank.is_empty() {
        return Ok(ColumnType::Blank);
    }
    if let Some(format) = surviving_date_format(&non_blank) {
        return Ok(ColumnType::Date(format));
    }
    if let Some(tokens) = surviving_boolean_pair(&non_blank) {
        return Ok(ColumnType::Boolean(tokens));
    }
    if let Some(format) = numeric_format(&non_blank) {
        return Ok(ColumnType::Numeric(format));
    }
    if let Some((format, token)) = numeric_with_blank_token(&non_blank) {
        return ColumnType::or_blank(ColumnType::Numeric(format), token);
    }
    Ok(ColumnType::Text)
}

/// Column names come from the pre-trim header row when one exists; unusable
/// headers fall back to positional names. Duplicates (by the normalized form
/// expressions bind) get `_1`, `_2`, ... appended.
fn derive_column_names(header: Option<&Vec<String>>, left: usize, width: usize) -> Vec<ColumnId> {
    let mut used = std::collections::HashSet::new();
    let mut names = Vec::with_capacity(width);
    for index in 0..width {
        let raw = header
            .and_then(|row| row.get(left + index))
            .map(String::as_str)
            .unwrap_or("");
        let base = ColumnId::sanitize(raw).unwrap_or_else(|| ColumnId::generated(index));
        names.push(disambiguate(base, index, &mut used));
    }
    names
}

fn disambiguate(
    base: ColumnId,
    index: usize,
    used: &mut std::collections::HashSet<String>,
) -> ColumnId {
    if used.insert(crate::data::normalize_column_name(base.as_str())) {
        return base;
    }
    let mut suffix = 1usize;
    loop {
        let candidate = format!("{base}_{suffix}");
        if used.insert(crate::data::normalize_column_name(&candidate))
            && let Some(id) = ColumnId::sanitize(&candidate)
        {
            return id;
        }
        suffix += 1;
        if suffix > 10_000 {
            return ColumnId::generated(index);
        }
    }
}

/// Types every column of the grid after conceptually applying `trim`, naming
/// columns from the pre-trim header row. A grid with no columns left is a
/// guess failure.
pub fn guess_column_types(grid: &[Vec<String>], trim: &TrimChoice) -> Result<Vec<ColumnInfo>> {
    let body = trim.trim(grid);
    let width = body.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return Err(TableError::Guess(
            "nothing to infer: the grid has no columns after trimming".into(),
        ));
    }
    let header = if trim.top >= 1 {
        grid.get(trim.top - 1)
    } else {
        None
    };
    let names = derive_column_names(header, trim.left, width);
    let mut columns = Vec::with_capacity(width);
    for (index, id) in names.into_iter().enumerate() {
        let cells: Vec<&str> = body
            .iter()
            .map(|row| row.get(index).map(String::as_str).unwrap_or("").trim())
            .collect();
        let column_type = decide_column_type(&cells)?;
        debug!("column '{id}' typed as {column_type}");
        columns.push(ColumnInfo::new(id, column_type));
    }
    Ok(columns)
}

/// Prefers UTF-8 among the decodable candidates, otherwise the first.
pub fn guess_charset<'a>(
    candidates: &'a [(&'static Encoding, Vec<String>)],
) -> Result<&'static Encoding> {
    if candidates.is_empty() {
        return Err(TableError::Guess("no decodable charset candidates".into()));
    }
    for (encoding, _) in candidates {
        if *encoding == encoding_rs::UTF_8 {
            return Ok(encoding);
        }
    }
    Ok(candidates[0].0)
}

/// Pre-split entry point: trim and column types only.
pub fn guess_grid_format(
    grid: &[Vec<String>],
    trim_override: Option<TrimChoice>,
) -> Result<(TrimChoice, Vec<ColumnInfo>)> {
    let trim = trim_override.unwrap_or_else(|| guess_trim(grid));
    let columns = guess_column_types(grid, &trim)?;
    Ok((trim, columns))
}

/// Builds the full decision tree over the decoded candidates. Walking it
/// with first options yields the same format the stage functions produce
/// directly; `overrides` pin individual stages.
pub fn guess_text_format(
    candidates: Vec<(&'static Encoding, Vec<String>)>,
    overrides: &FormatOverrides,
) -> Result<ChoicePoint<TextFormat>> {
    if candidates.is_empty() {
        return Ok(ChoicePoint::failure(TableError::Guess(
            "no decodable charset candidates".into(),
        )));
    }
    let charset_options: Vec<Choice> = match overrides.charset {
        Some(encoding) => vec![Choice::Charset(encoding)],
        None => {
            let preferred = guess_charset(&candidates)?;
            let mut options = vec![Choice::Charset(preferred)];
            options.extend(
                candidates
                    .iter()
                    .filter(|(encoding, _)| encoding.name() != preferred.name())
                    .map(|(encoding, _)| Choice::Charset(encoding)),
            );
            options
        }
    };
    let overrides = overrides.clone();
    ChoicePoint::choose(
        Quality::Promising,
        0.0,
        ChoiceKind::Charset,
        charset_options,
        move |choice| {
            let Choice::Charset(encoding) = choice else {
                return Err(TableError::internal("charset option expected"));
            };
            let lines = candidates
                .iter()
                .find(|(candidate, _)| candidate.name() == encoding.name())
                .map(|(_, lines)| lines.clone())
                .ok_or_else(|| {
                    TableError::User(format!(
                        "charset {} did not decode this input",
                        encoding.name()
                    ))
                })?;
            separator_stage(encoding.name().to_string(), lines, &overrides)
        },
    )
}

fn separator_stage(
    charset: String,
    lines: Vec<String>,
    overrides: &FormatOverrides,
) -> Result<ChoicePoint<TextFormat>> {
    let best = guess_separator_and_quote(&lines);
    let options: Vec<Choice> = match overrides.separator {
        Some(separator) => vec![Choice::Separator(separator)],
        None => {
            let samples: Vec<&str> = lines
                .iter()
                .map(String::as_str)
                .filter(|line| !line.trim().is_empty())
                .collect();
            let mut ranked: Vec<(Option<char>, f64)> = SEPARATORS
                .iter()
                .copied()
                .filter(|separator| *separator != best.separator)
                .filter_map(|separator| {
                    best_score_for_separator(&samples, separator)
                        .map(|score| (separator, score))
                })
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            let mut options = vec![Choice::Separator(best.separator)];
            options.extend(ranked.into_iter().map(|(separator, _)| Choice::Separator(separator)));
            options
        }
    };
    let overrides = overrides.clone();
    ChoicePoint::choose(
        best.quality,
        best.score,
        ChoiceKind::Separator,
        options,
        move |choice| {
            let Choice::Separator(separator) = choice else {
                return Err(TableError::internal("separator option expected"));
            };
            quote_stage(charset.clone(), lines.clone(), *separator, best, &overrides)
        },
    )
}

fn quote_stage(
    charset: String,
    lines: Vec<String>,
    separator: Option<char>,
    best: SeparatorGuess,
    overrides: &FormatOverrides,
) -> Result<ChoicePoint<TextFormat>> {
    let options: Vec<Choice> = match overrides.quote {
        Some(quote) => vec![Choice::Quote(quote)],
        None if separator == best.separator => {
            let samples: Vec<&str> = lines
                .iter()
                .map(String::as_str)
                .filter(|line| !line.trim().is_empty())
                .collect();
            let mut options = vec![Choice::Quote(best.quote)];
            let mut ranked: Vec<(Option<char>, f64)> = QUOTES
                .iter()
                .copied()
                .filter(|quote| *quote != best.quote)
                .filter_map(|quote| {
                    pair_score(&samples, separator, quote).map(|(score, _)| (quote, score))
                })
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            options.extend(ranked.into_iter().map(|(quote, _)| Choice::Quote(quote)));
            options
        }
        None => {
            let samples: Vec<&str> = lines
                .iter()
                .map(String::as_str)
                .filter(|line| !line.trim().is_empty())
                .collect();
            let mut ranked: Vec<(Option<char>, f64)> = QUOTES
                .iter()
                .copied()
                .filter_map(|quote| {
                    pair_score(&samples, separator, quote).map(|(score, _)| (quote, score))
                })
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            if ranked.is_empty() {
                vec![Choice::Quote(None)]
            } else {
                ranked
                    .into_iter()
                    .map(|(quote, _)| Choice::Quote(quote))
                    .collect()
            }
        }
    };
    let overrides = overrides.clone();
    ChoicePoint::choose(
        best.quality,
        best.score,
        ChoiceKind::Quote,
        options,
        move |choice| {
            let Choice::Quote(quote) = choice else {
                return Err(TableError::internal("quote option expected"));
            };
            trim_stage(
                charset.clone(),
                lines.clone(),
                separator,
                *quote,
                best,
                &overrides,
            )
        },
    )
}

fn trim_stage(
    charset: String,
    lines: Vec<String>,
    separator: Option<char>,
    quote: Option<char>,
    best: SeparatorGuess,
    overrides: &FormatOverrides,
) -> Result<ChoicePoint<TextFormat>> {
    let grid: Vec<Vec<String>> = lines
        .iter()
        .map(|line| split_into_columns(line, separator, quote))
        .collect();
    let trim = match overrides.trim {
        Some(trim) => trim,
        None => guess_trim(&grid),
    };
    ChoicePoint::choose(
        best.quality,
        best.score,
        ChoiceKind::Trim,
        vec![Choice::Trim(trim)],
        move |choice| {
            let Choice::Trim(trim) = choice else {
                return Err(TableError::internal("trim option expected"));
            };
            let columns = guess_column_types(&grid, trim)?;
            Ok(ChoicePoint::success(
                best.quality,
                best.score,
                TextFormat {
                    charset: charset.clone(),
                    separator,
                    quote,
                    trim: *trim,
                    columns,
                },
            ))
        },
    )
}
