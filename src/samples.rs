use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::schema::{ColumnSpec, ColumnType};
use crate::settings::ResolvedModule;

/// Module key for the built-in read-path columns in the parsed table.
pub const MAIN_MODULE: &str = "main";

const NAME_COLUMN: &str = "name";
const SE_READ_COLUMNS: [&str; 1] = ["reads"];
const PE_READ_COLUMNS: [&str; 2] = ["forward_reads", "reverse_reads"];
const COMPRESSED_SUFFIXES: [&str; 2] = [".gz", ".gzip"];

/// sample name -> module name -> column name -> value
pub type SampleTable = BTreeMap<String, BTreeMap<String, BTreeMap<String, ColumnValue>>>;

/// Value forwarded into the run configuration. Booleans (the `_gzipped`
/// flags) must survive as YAML booleans, everything else as strings.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ColumnValue {
    Text(String),
    Flag(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Owner {
    /// Built-in column (`name` or a read-path column), not owned by a module.
    Main,
    Module(String),
}

#[derive(Debug, Clone)]
struct Binding {
    owner: Owner,
    kind: ColumnType,
    character_set: Option<Vec<String>>,
}

/// Parse the tab-separated sample sheet and bind every declared column to its
/// owning module. Comment (`#`) and blank lines are skipped anywhere.
pub fn parse_samples(
    samples_file: &Path,
    modules: &[ResolvedModule],
    paired_end: bool,
) -> Result<SampleTable> {
    let fh = ex::fs::File::open(samples_file)
        .with_context(|| format!("Could not open samples file {}", samples_file.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .flexible(true)
        .from_reader(fh);

    let headers = reader
        .headers()
        .context("Could not read samples file header")?
        .clone();
    let header_names: Vec<&str> = headers.iter().collect();
    let bindings = check_columns(&header_names, modules, paired_end)?;

    let sheet_dir = samples_file.parent().unwrap_or_else(|| Path::new("."));
    let mut table = SampleTable::new();
    for record in reader.records() {
        let record = record.context("Could not read samples file row")?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.len() != header_names.len() {
            bail!(
                "Samples file: Row \"{}\" has {} columns, the header has {}",
                record.get(0).unwrap_or(""),
                record.len(),
                header_names.len()
            );
        }
        let sample_name = record.get(0).unwrap_or("").to_string();
        let entries = parse_row(&record, &header_names, &bindings, sheet_dir)?;
        if table.insert(sample_name.clone(), entries).is_some() {
            bail!("Samples file: Duplicate sample name \"{sample_name}\"");
        }
    }
    if table.is_empty() {
        bail!("Samples file contains no sample rows");
    }
    Ok(table)
}

/// Build the positional column bindings from the header. Every column a
/// selected module declares must be present exactly once; spare columns
/// nobody claims stay unbound and are ignored later.
fn check_columns(
    header: &[&str],
    modules: &[ResolvedModule],
    paired_end: bool,
) -> Result<Vec<Option<Binding>>> {
    let mut bindings: Vec<Option<Binding>> = vec![None; header.len()];

    let name_index = require_column(header, NAME_COLUMN)?;
    bindings[name_index] = Some(Binding {
        owner: Owner::Main,
        kind: ColumnType::String,
        character_set: Some(
            ["A-Z", "a-z", "0-9", "_"].iter().map(|s| s.to_string()).collect(),
        ),
    });

    let read_columns: &[&str] = if paired_end { &PE_READ_COLUMNS } else { &SE_READ_COLUMNS };
    for column in read_columns {
        let index = require_column(header, column)?;
        bindings[index] = Some(Binding {
            owner: Owner::Main,
            kind: ColumnType::File,
            character_set: None,
        });
    }

    for module in modules {
        for (column, spec) in &module.columns {
            let indices: Vec<usize> = header
                .iter()
                .enumerate()
                .filter(|(_, name)| *name == column)
                .map(|(i, _)| i)
                .collect();
            match indices.as_slice() {
                [] => bail!("Samples file: Column \"{column}\" is missing"),
                [index] => {
                    if let Some(existing) = &bindings[*index] {
                        let other = match &existing.owner {
                            Owner::Main => "the built-in columns".to_string(),
                            Owner::Module(name) => format!("module {name}"),
                        };
                        bail!(
                            "Samples file: Column \"{column}\" is claimed by both module {} and {other}",
                            module.name
                        );
                    }
                    bindings[*index] = Some(Binding {
                        owner: Owner::Module(module.name.clone()),
                        kind: spec.kind,
                        character_set: spec.character_set.clone(),
                    });
                }
                _ => bail!("Samples file: Column \"{column}\" appears more than once"),
            }
        }
    }
    Ok(bindings)
}

fn require_column(header: &[&str], column: &str) -> Result<usize> {
    header
        .iter()
        .position(|name| *name == column)
        .with_context(|| format!("Samples file: Column \"{column}\" is missing"))
}

fn parse_row(
    record: &csv::StringRecord,
    header: &[&str],
    bindings: &[Option<Binding>],
    sheet_dir: &Path,
) -> Result<BTreeMap<String, BTreeMap<String, ColumnValue>>> {
    let mut entries: BTreeMap<String, BTreeMap<String, ColumnValue>> = BTreeMap::new();
    for (index, value) in record.iter().enumerate() {
        let Some(Some(binding)) = bindings.get(index) else {
            continue; // column claimed by nobody
        };
        let column = header[index];

        let stored = match binding.kind {
            ColumnType::String => {
                if let Some(character_set) = &binding.character_set {
                    if let Some(offender) = first_invalid_character(value, character_set) {
                        bail!(
                            "Column \"{column}\" contains invalid character '{offender}' in entry \"{value}\". Only these characters are allowed: {}",
                            character_set.join(", ")
                        );
                    }
                }
                value.to_string()
            }
            ColumnType::File => resolve_file(value, column, sheet_dir)?,
            ColumnType::Number => value.to_string(),
        };

        match &binding.owner {
            Owner::Main => {
                if column == NAME_COLUMN {
                    continue;
                }
                // read-path column: forward it plus its compression flag
                let main = entries.entry(MAIN_MODULE.to_string()).or_default();
                main.insert(column.to_string(), ColumnValue::Text(stored));
                main.insert(
                    format!("{column}_gzipped"),
                    ColumnValue::Flag(is_compressed(value)),
                );
            }
            Owner::Module(module) => {
                entries
                    .entry(module.clone())
                    .or_default()
                    .insert(column.to_string(), ColumnValue::Text(stored));
            }
        }
    }
    Ok(entries)
}

/// Absolute paths pass through, relative ones resolve against the sheet's
/// directory and are absolutized (the run configuration is read from the
/// output directory, not from wherever the sheet lives); either way the
/// file must exist.
fn resolve_file(value: &str, column: &str, sheet_dir: &Path) -> Result<String> {
    if value.is_empty() {
        bail!("Column \"{column}\" contains an empty file path");
    }
    let resolved: PathBuf = if Path::new(value).is_absolute() {
        PathBuf::from(value)
    } else {
        std::path::absolute(sheet_dir.join(value))
            .with_context(|| format!("Could not resolve path \"{value}\""))?
    };
    if !resolved.exists() {
        bail!(
            "Unknown file in column \"{column}\":\nUser input: {value}\nResolved to: {}",
            resolved.display()
        );
    }
    Ok(resolved.to_string_lossy().into_owned())
}

fn is_compressed(value: &str) -> bool {
    let lower = value.to_lowercase();
    COMPRESSED_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// First character of `value` outside the allowed set. The tokens `A-Z`,
/// `a-z` and `0-9` expand to their ASCII ranges, every other entry counts
/// character by character.
pub fn first_invalid_character(value: &str, character_set: &[String]) -> Option<char> {
    let mut allowed: HashSet<char> = HashSet::new();
    for entry in character_set {
        match entry.as_str() {
            "A-Z" => allowed.extend('A'..='Z'),
            "a-z" => allowed.extend('a'..='z'),
            "0-9" => allowed.extend('0'..='9'),
            literal => allowed.extend(literal.chars()),
        }
    }
    value.chars().find(|c| !allowed.contains(c))
}
