use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_valid::Validate;

/// Pipeline stage a module belongs to. Determines where its schema lives in
/// the module library and how many modules may be selected (see pipeline.rs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    Preprocessing,
    Premapping,
    Mapping,
    Analysis,
}

/// One module descriptor, loaded from `<library>/<category>/<name>/<name>.yaml`.
/// Settings and columns at the top level are shared between both read layouts;
/// the `single_end`/`paired_end` blocks add their own and pick the snakefile.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ModuleSchema {
    #[serde(default)]
    pub required_settings: BTreeMap<String, SettingSpec>,
    #[serde(default)]
    pub optional_settings: BTreeMap<String, SettingSpec>,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnSpec>,
    pub single_end: Option<VariantSpec>,
    pub paired_end: Option<VariantSpec>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct VariantSpec {
    /// Rule fragment path, relative to the module directory.
    pub snakefile: String,
    #[serde(default)]
    pub required_settings: BTreeMap<String, SettingSpec>,
    #[serde(default)]
    pub optional_settings: BTreeMap<String, SettingSpec>,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnSpec>,
}

/// A declared setting. The tag doubles as the type check: a schema declaring
/// a type outside this list fails deserialization instead of passing values
/// through unvalidated.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettingSpec {
    File(FileSetting),
    /// Like `file`, but the resolved path must exist on disk.
    FileInput(FileSetting),
    Enum(EnumSetting),
    Number(NumberSetting),
    String(StringSetting),
}

impl SettingSpec {
    pub fn default_value(&self) -> Option<&Scalar> {
        match self {
            SettingSpec::File(s) | SettingSpec::FileInput(s) => s.default.as_ref(),
            SettingSpec::Enum(s) => s.default.as_ref(),
            SettingSpec::Number(s) => s.default.as_ref(),
            SettingSpec::String(s) => s.default.as_ref(),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            SettingSpec::Enum(s) => s.validate().map_err(|e| anyhow::anyhow!("{e}")),
            SettingSpec::Number(s) => s.validate().map_err(|e| anyhow::anyhow!("{e}")),
            _ => Ok(()),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileSetting {
    pub default: Option<Scalar>,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Validate)]
#[serde(deny_unknown_fields)]
pub struct EnumSetting {
    /// Human-facing token -> value handed to the rule fragment.
    #[validate(min_properties = 1)]
    pub choices: BTreeMap<String, String>,
    pub default: Option<Scalar>,
    pub description: Option<String>,
}

fn validate_number_range(range: &NumberRange) -> Result<(), serde_valid::validation::Error> {
    match (range.min.as_f64(), range.max.as_f64()) {
        (Ok(min), Ok(max)) if min >= max => Err(serde_valid::validation::Error::Custom(
            "range min must be less than max".to_string(),
        )),
        (Err(e), _) | (_, Err(e)) => Err(serde_valid::validation::Error::Custom(e.to_string())),
        _ => Ok(()),
    }
}

#[derive(Deserialize, Debug, Clone, Validate)]
#[serde(deny_unknown_fields)]
#[validate(custom = |s| validate_number_range(&s.range))]
pub struct NumberSetting {
    pub number_type: NumberType,
    pub range: NumberRange,
    pub default: Option<Scalar>,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NumberType {
    Integer,
    Float,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct NumberRange {
    pub min: Bound,
    pub max: Bound,
}

/// A range bound: a number, or the sentinels "-Inf"/"Inf" for unbounded.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum Bound {
    Value(f64),
    Sentinel(String),
}

impl Bound {
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Bound::Value(v) => Ok(*v),
            Bound::Sentinel(s) if s == "Inf" => Ok(f64::INFINITY),
            Bound::Sentinel(s) if s == "-Inf" => Ok(f64::NEG_INFINITY),
            Bound::Sentinel(s) => bail!("Invalid range bound \"{s}\" (expected a number, \"Inf\" or \"-Inf\")"),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct StringSetting {
    pub default: Option<Scalar>,
    pub description: Option<String>,
}

/// A declared sample-sheet column.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    #[serde(rename = "type")]
    pub kind: ColumnType,
    pub character_set: Option<Vec<String>>,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    File,
    Number,
}

/// Scalar from a hand-edited YAML document. Settings resolution works on the
/// string form, whatever the YAML parser made of the literal.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_string(&self) -> String {
        match self {
            Scalar::Bool(v) => v.to_string(),
            Scalar::Int(v) => v.to_string(),
            Scalar::Float(v) => v.to_string(),
            Scalar::Text(v) => v.clone(),
        }
    }
}

impl ModuleSchema {
    /// Load and sanity-check one module schema. `module_dir` is
    /// `<library>/<category>/<name>`; a missing schema file means the module
    /// does not exist under that category.
    pub fn load(library: &Path, category: Category, name: &str) -> Result<(ModuleSchema, PathBuf)> {
        let module_dir = library.join(category.to_string()).join(name);
        let schema_file = module_dir.join(format!("{name}.yaml"));
        if !schema_file.is_file() {
            bail!("{category}: Unknown module \"{name}\"");
        }
        let raw = ex::fs::read_to_string(&schema_file)
            .with_context(|| format!("Could not read module schema {}", schema_file.display()))?;
        let schema: ModuleSchema = serde_yaml::from_str(&raw)
            .with_context(|| format!("Could not parse module schema {}", schema_file.display()))?;
        schema
            .check()
            .with_context(|| format!("Invalid module schema {}", schema_file.display()))?;
        Ok((schema, module_dir))
    }

    pub fn variant(&self, paired_end: bool) -> Result<&VariantSpec> {
        if paired_end {
            self.paired_end
                .as_ref()
                .context("Module has no paired_end variant")
        } else {
            self.single_end
                .as_ref()
                .context("Module has no single_end variant")
        }
    }

    /// Constraints serde cannot express: enum choices non-empty, range
    /// min < max, and every optional setting carrying a default.
    pub fn check(&self) -> Result<()> {
        let variants = [self.single_end.as_ref(), self.paired_end.as_ref()];
        let required = std::iter::once(&self.required_settings)
            .chain(variants.iter().flatten().map(|v| &v.required_settings));
        let optional = std::iter::once(&self.optional_settings)
            .chain(variants.iter().flatten().map(|v| &v.optional_settings));
        for settings in required {
            for (name, spec) in settings {
                spec.validate().with_context(|| format!("Setting \"{name}\""))?;
            }
        }
        for settings in optional {
            for (name, spec) in settings {
                spec.validate().with_context(|| format!("Setting \"{name}\""))?;
                if spec.default_value().is_none() {
                    bail!("Optional setting \"{name}\" declares no default");
                }
            }
        }
        Ok(())
    }
}
