use std::path::Path;

use anyhow::{bail, Result};

fn main() -> Result<()> {
    human_panic::setup_panic!();
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() != 4 {
        bail!(
            "Usage: snakeforge <pipeline.yml> <samples.tsv> <module-library> <output-dir>"
        );
    }
    let snakefile = snakeforge::run(
        Path::new(&args[0]),
        Path::new(&args[1]),
        Path::new(&args[2]),
        Path::new(&args[3]),
    )?;
    println!("{}", snakefile.display());
    Ok(())
}
