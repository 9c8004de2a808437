use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{debug, info};
use regex::Regex;

use crate::runconfig;
use crate::samples::SampleTable;
use crate::settings::ResolvedModule;

/// Generated-artifacts directory inside the output folder, referenced by
/// name from the entry file and the rewritten fragments.
pub const SNAKEFILES_TARGET_DIRECTORY: &str = "snakemake_lib";

const FRAGMENT_EXTENSION: &str = "sm";

/// Merge the modules' rule fragments into one workflow rooted at `output`.
/// Returns the path of the entry file. Output is written as we go; on
/// failure, fragments of already-processed modules may remain on disk.
pub fn create_workflow(
    output: &Path,
    modules: &[ResolvedModule],
    samples: &SampleTable,
) -> Result<PathBuf> {
    let target_dir = output.join(SNAKEFILES_TARGET_DIRECTORY);
    ex::fs::create_dir_all(&target_dir)
        .with_context(|| format!("Could not create output directory {}", target_dir.display()))?;

    runconfig::write_run_config(output, samples)?;

    let rule_re = Regex::new(r"(?m)^rule (?P<name>.*):$").unwrap();
    let lib_re = Regex::new(r"lib/(?P<file>\S*)").unwrap();
    let leftover_re = Regex::new(r"%%[A-Za-z0-9_]+%%").unwrap();

    let mut fragment_names = Vec::new();
    for module in modules {
        debug!("Composing module {}", module.name);
        let raw = ex::fs::read_to_string(&module.snakefile).with_context(|| {
            format!(
                "Module {}: Could not read rule fragment {}",
                module.name,
                module.snakefile.display()
            )
        })?;

        let prefix = module.rule_prefix();
        let content = rule_re.replace_all(&raw, format!("rule {prefix}__$name:"));
        let content = lib_re.replace_all(
            &content,
            format!(
                "{SNAKEFILES_TARGET_DIRECTORY}/{}_lib/$file",
                module.lowercase_name()
            ),
        );
        let content = substitute_placeholders(&content, module);
        if let Some(token) = leftover_re.find(&content) {
            bail!(
                "Module {}: Unresolved placeholder {} in {}",
                module.name,
                token.as_str(),
                module.snakefile.display()
            );
        }

        let fragment_name = format!("{}.{FRAGMENT_EXTENSION}", module.lowercase_name());
        ex::fs::write(target_dir.join(&fragment_name), content.as_bytes())
            .with_context(|| format!("Could not write fragment {fragment_name}"))?;
        fragment_names.push(fragment_name);

        let lib_src = module
            .snakefile
            .parent()
            .map(|dir| dir.join("lib"))
            .filter(|dir| dir.is_dir());
        if let Some(lib_src) = lib_src {
            let lib_dest = target_dir.join(format!("{}_lib", module.lowercase_name()));
            sync_lib(&lib_src, &lib_dest)
                .with_context(|| format!("Module {}: Could not copy lib directory", module.name))?;
        }
    }

    let entry_path = output.join("Snakefile");
    ex::fs::write(&entry_path, entry_file(modules, &fragment_names))
        .with_context(|| format!("Could not write {}", entry_path.display()))?;
    info!("Workflow written to {}", entry_path.display());
    Ok(entry_path)
}

fn entry_file(modules: &[ResolvedModule], fragment_names: &[String]) -> String {
    let mut entry = format!(
        "configfile: \"{SNAKEFILES_TARGET_DIRECTORY}/{}\"\n\n",
        runconfig::RUN_CONFIG_NAME
    );
    for name in fragment_names {
        entry.push_str(&format!("include: \"{SNAKEFILES_TARGET_DIRECTORY}/{name}\"\n"));
    }
    entry.push('\n');
    entry.push_str("rule all:\n    input:\n");
    for module in modules {
        entry.push_str(&format!("        rules.{}__all.input,\n", module.rule_prefix()));
    }
    entry
}

/// Textual `%%NAME%%` substitution from the resolved settings. Module authors
/// own their fragment's syntax; we only splice values in. A setting without a
/// placeholder is fine, a placeholder without a setting is caught by the
/// leftover scan in the caller.
fn substitute_placeholders<'a>(
    content: &'a str,
    module: &ResolvedModule,
) -> std::borrow::Cow<'a, str> {
    let mut result = std::borrow::Cow::Borrowed(content);
    for (name, value) in &module.settings {
        let token = format!("%%{}%%", name.to_uppercase());
        if result.contains(&token) {
            result = std::borrow::Cow::Owned(result.replace(&token, value));
        }
    }
    result
}

/// Copy a module's `lib/` directory next to its fragment, but only when the
/// previously synchronized copy differs from the source. Files that exist
/// only in the destination do not trigger a resync.
fn sync_lib(src: &Path, dest: &Path) -> Result<()> {
    if dest.is_dir() {
        if dirs_differ(src, dest)? {
            copy_lib(src, dest)?;
        }
    } else {
        copy_lib(src, dest)?;
    }
    Ok(())
}

fn dirs_differ(src: &Path, dest: &Path) -> Result<bool> {
    for entry in std::fs::read_dir(src)
        .with_context(|| format!("Could not read lib directory {}", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());
        if src_path.is_dir() {
            if !dest_path.is_dir() || dirs_differ(&src_path, &dest_path)? {
                return Ok(true);
            }
        } else {
            if !dest_path.is_file() || !files_equal(&src_path, &dest_path)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn files_equal(left: &Path, right: &Path) -> Result<bool> {
    let left_meta = ex::fs::metadata(left)?;
    let right_meta = ex::fs::metadata(right)?;
    if left_meta.len() != right_meta.len() {
        return Ok(false);
    }
    Ok(ex::fs::read(left)? == ex::fs::read(right)?)
}

/// Full delete-then-recreate copy.
fn copy_lib(src: &Path, dest: &Path) -> Result<()> {
    debug!("Synchronizing {} -> {}", src.display(), dest.display());
    if dest.is_dir() {
        ex::fs::remove_dir_all(dest)?;
    }
    copy_tree(src, dest)
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    ex::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)
        .with_context(|| format!("Could not read lib directory {}", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());
        if src_path.is_dir() {
            copy_tree(&src_path, &dest_path)?;
        } else {
            ex::fs::copy(&src_path, &dest_path)?;
        }
    }
    Ok(())
}
