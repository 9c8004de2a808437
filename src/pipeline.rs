use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::debug;
use serde::Deserialize;

use crate::schema::{Category, ModuleSchema, Scalar};
use crate::settings::{resolve_module, ResolvedModule};

/// Everything the pipeline descriptor selects, with all settings resolved.
/// Module order is selection order: preprocessing, premapping, mapping,
/// analysis.
#[derive(Debug)]
pub struct Pipeline {
    pub modules: Vec<ResolvedModule>,
    pub paired_end: bool,
}

#[derive(Deserialize, Debug)]
pub struct PipelineConfig {
    pipeline: PipelineSection,
    preprocessing: Option<CategoryBlock>,
    premapping: Option<CategoryBlock>,
    mapping: Option<CategoryBlock>,
    #[serde(alias = "analyses")]
    analysis: Option<CategoryBlock>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct PipelineSection {
    paired_end: bool,
}

/// One category block: the module selection plus, keyed by module name, the
/// inline settings for each selected module.
#[derive(Deserialize, Debug, Default)]
struct CategoryBlock {
    module: Option<OneOrMany>,
    modules: Option<OneOrMany>,
    #[serde(flatten)]
    settings: BTreeMap<String, BTreeMap<String, Scalar>>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn names(&self) -> Vec<String> {
        match self {
            OneOrMany::One(name) if name.is_empty() => Vec::new(),
            OneOrMany::One(name) => vec![name.clone()],
            OneOrMany::Many(names) => names.clone(),
        }
    }
}

impl CategoryBlock {
    fn user_settings(&self, module: &str) -> BTreeMap<String, String> {
        self.settings
            .get(module)
            .map(|settings| {
                settings
                    .iter()
                    .map(|(key, value)| (key.clone(), value.as_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Load the pipeline descriptor and resolve every selected module against its
/// schema. Cardinality is checked per category before any settings are
/// touched: preprocessing takes at most one module, mapping exactly one,
/// premapping and analysis any number.
pub fn load_pipeline(pipeline_file: &Path, library: &Path) -> Result<Pipeline> {
    let raw = ex::fs::read_to_string(pipeline_file)
        .with_context(|| format!("Could not read pipeline file {}", pipeline_file.display()))?;
    let config: PipelineConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("Could not parse pipeline file {}", pipeline_file.display()))?;
    let config_dir = pipeline_file.parent().unwrap_or_else(|| Path::new("."));

    let paired_end = config.pipeline.paired_end;
    let selections = select_modules(&config)?;

    let mut modules = Vec::new();
    for (category, block, name) in &selections {
        debug!("Loading module {name} ({category})");
        let (schema, module_dir) = ModuleSchema::load(library, *category, name)?;
        modules.push(resolve_module(
            name,
            *category,
            &schema,
            &module_dir,
            &block.user_settings(name),
            config_dir,
            paired_end,
        )?);
    }
    Ok(Pipeline { modules, paired_end })
}

fn select_modules(config: &PipelineConfig) -> Result<Vec<(Category, &CategoryBlock, String)>> {
    let mut selections = Vec::new();

    if let Some(block) = &config.preprocessing {
        let names = block.module.as_ref().map(OneOrMany::names).unwrap_or_default();
        if names.len() > 1 {
            bail!("preprocessing: Too many preprocessing modules are selected (max 1)");
        }
        for name in names {
            selections.push((Category::Preprocessing, block, name));
        }
    }

    if let Some(block) = &config.premapping {
        let names = block.modules.as_ref().map(OneOrMany::names).unwrap_or_default();
        for name in names {
            selections.push((Category::Premapping, block, name));
        }
    }

    match &config.mapping {
        Some(block) => {
            let names = block.module.as_ref().map(OneOrMany::names).unwrap_or_default();
            if names.len() != 1 {
                bail!("mapping: Exactly one mapping module must be selected");
            }
            selections.push((Category::Mapping, block, names[0].clone()));
        }
        None => bail!("mapping: No mapping module found"),
    }

    if let Some(block) = &config.analysis {
        let names = block.modules.as_ref().map(OneOrMany::names).unwrap_or_default();
        for name in names {
            selections.push((Category::Analysis, block, name));
        }
    }

    Ok(selections)
}
