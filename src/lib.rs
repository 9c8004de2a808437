use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

mod compose;
mod pipeline;
mod runconfig;
mod samples;
mod schema;
mod settings;

pub use compose::SNAKEFILES_TARGET_DIRECTORY;
pub use runconfig::RUN_CONFIG_NAME;

/// Compose an executable workflow from the pipeline descriptor, the sample
/// sheet and the module library. Returns the path of the generated entry
/// file; executing it is the job runner's business, not ours.
pub fn run(
    pipeline_file: &Path,
    samples_file: &Path,
    module_library: &Path,
    output: &Path,
) -> Result<PathBuf> {
    let pipeline = pipeline::load_pipeline(pipeline_file, module_library)
        .with_context(|| format!("Error in pipeline file {}", pipeline_file.display()))?;
    info!(
        "Resolved {} modules ({})",
        pipeline.modules.len(),
        if pipeline.paired_end { "paired-end" } else { "single-end" }
    );
    let samples = samples::parse_samples(samples_file, &pipeline.modules, pipeline.paired_end)
        .with_context(|| format!("Error in samples file {}", samples_file.display()))?;
    info!("Parsed {} samples", samples.len());
    compose::create_workflow(output, &pipeline.modules, &samples)
}
