//! `concat` command: stack several imported tables into one.

use std::path::Path;

use anyhow::{Result, anyhow};
use log::info;

use crate::{
    cli::{ConcatArgs, MissingColumns},
    import,
    manager::{Table, TableManager},
    probe,
    transform::{MissingColumnPolicy, concatenate},
};

fn table_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn execute(args: &ConcatArgs) -> Result<()> {
    if args.inputs.len() < 2 {
        return Err(anyhow!("Concat needs at least two --input files"));
    }
    let overrides = probe::format_overrides(&args.overrides)?;
    let policy = match args.missing_columns {
        MissingColumns::Omit => MissingColumnPolicy::Omit,
        MissingColumns::Default => MissingColumnPolicy::Default,
        MissingColumns::WrapMaybe => MissingColumnPolicy::WrapMaybe,
    };

    // Each input registers under its file stem; clashing stems pick up a
    // numeric suffix, which also labels the rows when --source-column is on.
    let mut manager = TableManager::new();
    for input in &args.inputs {
        let (_, set) = import::load_table(input, None, &overrides)?;
        let id = manager.fresh_id(&table_stem(input))?;
        manager.register(Table::new(id, set))?;
        info!("Loaded {:?}", input);
    }

    let sources = manager
        .tables()
        .iter()
        .map(|table| Ok((table.id().as_str().to_string(), table.data()?)))
        .collect::<Result<Vec<_>>>()?;
    let combined = concatenate(sources, policy, args.source_column)?;

    let written = import::emit(
        combined.as_ref(),
        args.output.as_deref(),
        args.output_delimiter,
        args.table,
        None,
    )?;
    info!(
        "Concatenated {} table(s): {} row(s) out",
        manager.len(),
        written
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_strip_directories_and_extensions() {
        assert_eq!(table_stem(Path::new("data/sales.csv")), "sales");
        assert_eq!(table_stem(Path::new("plain")), "plain");
        assert_eq!(table_stem(Path::new("-")), "-");
    }
}
