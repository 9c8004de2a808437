use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::compose::SNAKEFILES_TARGET_DIRECTORY;
use crate::samples::SampleTable;

pub const RUN_CONFIG_NAME: &str = "workflow_config.yml";

/// The run-time channel between composition and the executing rules:
/// sample -> module -> column -> value, read via `config["entries"]`.
#[derive(Serialize)]
struct RunConfig<'a> {
    entries: &'a SampleTable,
}

/// Write the run configuration into the generated-artifacts directory and
/// return its path. Strings that look like numbers come out quoted, the
/// `_gzipped` flags as plain booleans.
pub fn write_run_config(output: &Path, samples: &SampleTable) -> Result<PathBuf> {
    let path = output.join(SNAKEFILES_TARGET_DIRECTORY).join(RUN_CONFIG_NAME);
    let document = serde_yaml::to_string(&RunConfig { entries: samples })
        .context("Could not serialize run configuration")?;
    ex::fs::write(&path, document)
        .with_context(|| format!("Could not write run configuration {}", path.display()))?;
    Ok(path)
}
