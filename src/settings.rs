use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use itertools::Itertools;

use crate::schema::{Category, ColumnSpec, ModuleSchema, NumberType, SettingSpec};

/// A selected module with every setting coerced to its final string form and
/// the column requirements of the applicable read layout merged in. Built
/// once per module, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ResolvedModule {
    pub name: String,
    pub category: Category,
    /// Rule fragment of the selected single/paired-end variant.
    pub snakefile: PathBuf,
    pub settings: BTreeMap<String, String>,
    pub columns: BTreeMap<String, ColumnSpec>,
}

impl ResolvedModule {
    /// Prefix used for rule namespacing and generated file names.
    pub fn rule_prefix(&self) -> String {
        self.name.to_lowercase().replace('-', "_")
    }

    pub fn lowercase_name(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Resolve user settings against one module schema. Shared settings first,
/// then the variant's own, the variant overriding on a name collision.
/// Any failure aborts the whole module, annotated with its name.
pub fn resolve_module(
    name: &str,
    category: Category,
    schema: &ModuleSchema,
    module_dir: &Path,
    user_settings: &BTreeMap<String, String>,
    config_dir: &Path,
    paired_end: bool,
) -> Result<ResolvedModule> {
    resolve_module_inner(
        name,
        category,
        schema,
        module_dir,
        user_settings,
        config_dir,
        paired_end,
    )
    .with_context(|| format!("Error in module {name}"))
}

fn resolve_module_inner(
    name: &str,
    category: Category,
    schema: &ModuleSchema,
    module_dir: &Path,
    user_settings: &BTreeMap<String, String>,
    config_dir: &Path,
    paired_end: bool,
) -> Result<ResolvedModule> {
    let variant = schema.variant(paired_end)?;

    let mut settings = BTreeMap::new();
    apply_settings(
        &mut settings,
        &schema.required_settings,
        true,
        user_settings,
        config_dir,
    )?;
    apply_settings(
        &mut settings,
        &schema.optional_settings,
        false,
        user_settings,
        config_dir,
    )?;
    apply_settings(
        &mut settings,
        &variant.required_settings,
        true,
        user_settings,
        config_dir,
    )?;
    apply_settings(
        &mut settings,
        &variant.optional_settings,
        false,
        user_settings,
        config_dir,
    )?;

    let mut columns = schema.columns.clone();
    for (col_name, col_spec) in &variant.columns {
        columns.insert(col_name.clone(), col_spec.clone());
    }

    Ok(ResolvedModule {
        name: name.to_string(),
        category,
        snakefile: module_dir.join(&variant.snakefile),
        settings,
        columns,
    })
}

fn apply_settings(
    resolved: &mut BTreeMap<String, String>,
    specs: &BTreeMap<String, SettingSpec>,
    required: bool,
    user_settings: &BTreeMap<String, String>,
    config_dir: &Path,
) -> Result<()> {
    for (name, spec) in specs {
        let value = match user_settings.get(name) {
            Some(value) => resolve_setting(name, spec, value, config_dir)?,
            None if required => bail!("Required parameter \"{name}\" is missing"),
            None => default_setting(name, spec, config_dir)?,
        };
        resolved.insert(name.clone(), value);
    }
    Ok(())
}

/// Declared defaults are taken at face value, except enum defaults which go
/// through the same choices indirection as a user token.
fn default_setting(name: &str, spec: &SettingSpec, config_dir: &Path) -> Result<String> {
    // check() guarantees a default exists for every optional setting
    let default = spec
        .default_value()
        .with_context(|| format!("Optional setting \"{name}\" declares no default"))?
        .as_string();
    match spec {
        SettingSpec::Enum(_) => resolve_setting(name, spec, &default, config_dir),
        _ => Ok(default),
    }
}

fn resolve_setting(
    name: &str,
    spec: &SettingSpec,
    value: &str,
    config_dir: &Path,
) -> Result<String> {
    match spec {
        SettingSpec::File(_) => resolve_path(value, config_dir),
        SettingSpec::FileInput(_) => {
            let resolved = resolve_path(value, config_dir)?;
            if !Path::new(&resolved).exists() {
                bail!(
                    "{name}: Unknown file:\nUser input: {value}\nResolved to: {resolved}"
                );
            }
            Ok(resolved)
        }
        SettingSpec::Enum(spec) => match spec.choices.get(value) {
            Some(mapped) => Ok(mapped.clone()),
            None => bail!(
                "{name}: Unknown value \"{value}\". Allowed choices: {}",
                spec.choices.keys().join(", ")
            ),
        },
        SettingSpec::Number(spec) => {
            let min = spec.range.min.as_f64()?;
            let max = spec.range.max.as_f64()?;
            let (numeric, as_string) = match spec.number_type {
                NumberType::Integer => {
                    let v: i64 = value.parse().map_err(|_| {
                        anyhow::anyhow!(
                            "{name}: \"{value}\" cannot be converted into an integer"
                        )
                    })?;
                    (v as f64, v.to_string())
                }
                NumberType::Float => {
                    let v: f64 = value.parse().map_err(|_| {
                        anyhow::anyhow!("{name}: \"{value}\" cannot be converted into a float")
                    })?;
                    (v, v.to_string())
                }
            };
            // open interval, both bounds excluded
            if min < numeric && numeric < max {
                Ok(as_string)
            } else {
                bail!(
                    "{name}: Value out of valid range. Used value: {value} - Range: {min}-{max}"
                )
            }
        }
        SettingSpec::String(_) => Ok(value.to_string()),
    }
}

/// Absolute paths pass through; relative ones resolve against the pipeline
/// descriptor's directory and are absolutized, since the stored value ends
/// up in fragments executed from the output directory.
fn resolve_path(value: &str, config_dir: &Path) -> Result<String> {
    let path = Path::new(value);
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::path::absolute(config_dir.join(path))
            .with_context(|| format!("Could not resolve path \"{value}\""))?
    };
    Ok(resolved.to_string_lossy().into_owned())
}
