//! End-to-end composition over a scratch module library.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

struct Scratch {
    dir: TempDir,
}

impl Scratch {
    fn new() -> Scratch {
        Scratch {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn library(&self) -> PathBuf {
        self.path().join("modules")
    }

    fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn run(&self, pipeline: &str, samples: &str) -> anyhow::Result<PathBuf> {
        let pipeline_file = self.write("pipeline.yml", pipeline);
        let samples_file = self.write("samples.tsv", samples);
        snakeforge::run(
            &pipeline_file,
            &samples_file,
            &self.library(),
            &self.path().join("out"),
        )
    }

    fn out(&self, relative: &str) -> String {
        std::fs::read_to_string(self.path().join("out").join(relative)).unwrap()
    }

    fn generated(&self, name: &str) -> String {
        self.out(&format!("{}/{name}", snakeforge::SNAKEFILES_TARGET_DIRECTORY))
    }

    fn run_config(&self) -> serde_yaml::Value {
        serde_yaml::from_str(&self.generated(snakeforge::RUN_CONFIG_NAME)).unwrap()
    }
}

/// A mapper plus one analysis module, both shipping a rule named `all`.
fn populate_library(scratch: &Scratch) {
    scratch.write(
        "modules/mapping/bowtie2/bowtie2.yaml",
        "
required_settings:
    genome:
        type: file
optional_settings:
    quality:
        type: number
        number_type: integer
        range:
            min: 0
            max: 100
        default: 20
single_end:
    snakefile: 'Snakefile_se'
paired_end:
    snakefile: 'Snakefile_pe'
",
    );
    scratch.write(
        "modules/mapping/bowtie2/Snakefile_se",
        "rule all:\n    input: \"mapped.bam\"\n\nrule map:\n    shell: \"bowtie2 -q %%QUALITY%% -x %%GENOME%%\"\n",
    );
    scratch.write(
        "modules/mapping/bowtie2/Snakefile_pe",
        "rule all:\n    input: \"mapped.bam\"\n",
    );

    scratch.write(
        "modules/analysis/coverage/coverage.yaml",
        "
columns:
    depth:
        type: number
        description: 'target coverage depth'
single_end:
    snakefile: 'Snakefile'
paired_end:
    snakefile: 'Snakefile'
",
    );
    scratch.write(
        "modules/analysis/coverage/Snakefile",
        "rule all:\n    input: \"coverage.tsv\"\n\nrule report:\n    script: \"lib/report.py\"\n",
    );
    scratch.write("modules/analysis/coverage/lib/report.py", "print('report')\n");
}

const PIPELINE: &str = "
pipeline:
    paired_end: false
mapping:
    module: bowtie2
    bowtie2:
        genome: genome.fa
analysis:
    modules:
        - coverage
";

#[test]
fn composes_a_complete_workflow() {
    let scratch = Scratch::new();
    populate_library(&scratch);
    scratch.write("genome.fa", ">chr1\nACGT\n");
    scratch.write("reads/s1.fastq", "@r1\nACGT\n+\nIIII\n");

    let snakefile = scratch
        .run(PIPELINE, "name\treads\tdepth\ns1\treads/s1.fastq\t10\n")
        .unwrap();

    let entry = std::fs::read_to_string(&snakefile).unwrap();
    assert!(entry.contains("configfile: \"snakemake_lib/workflow_config.yml\""));
    assert!(entry.contains("include: \"snakemake_lib/bowtie2.sm\""));
    assert!(entry.contains("include: \"snakemake_lib/coverage.sm\""));
    assert!(entry.contains("rules.bowtie2__all.input,"));
    assert!(entry.contains("rules.coverage__all.input,"));

    // rule names namespaced, placeholders substituted
    let mapper = scratch.generated("bowtie2.sm");
    assert!(mapper.contains("rule bowtie2__all:"));
    assert!(mapper.contains("rule bowtie2__map:"));
    assert!(mapper.contains("bowtie2 -q 20 -x "));
    assert!(mapper.contains("genome.fa"));
    assert!(!mapper.contains("%%"));

    // lib shipped and referenced under the module's namespace
    let coverage = scratch.generated("coverage.sm");
    assert!(coverage.contains("snakemake_lib/coverage_lib/report.py"));
    assert!(scratch
        .path()
        .join("out/snakemake_lib/coverage_lib/report.py")
        .is_file());

    // run configuration carries the bound sample values
    let config = scratch.run_config();
    let s1 = &config["entries"]["s1"];
    assert_eq!(s1["coverage"]["depth"], serde_yaml::Value::String("10".into()));
    assert_eq!(s1["main"]["reads_gzipped"], serde_yaml::Value::Bool(false));
    let reads = s1["main"]["reads"].as_str().unwrap();
    assert!(Path::new(reads).is_absolute());
    assert!(reads.ends_with("reads/s1.fastq"));
}

#[test]
fn rerunning_composition_is_idempotent() {
    let scratch = Scratch::new();
    populate_library(&scratch);
    scratch.write("genome.fa", ">chr1\nACGT\n");
    scratch.write("reads/s1.fastq", "@r1\nACGT\n+\nIIII\n");
    let samples = "name\treads\tdepth\ns1\treads/s1.fastq\t10\n";

    scratch.run(PIPELINE, samples).unwrap();
    // a second run must not recopy the unchanged lib directory
    let marker = scratch
        .path()
        .join("out")
        .join(snakeforge::SNAKEFILES_TARGET_DIRECTORY)
        .join("coverage_lib/generated.txt");
    std::fs::write(&marker, "kept\n").unwrap();
    scratch.run(PIPELINE, samples).unwrap();
    assert!(marker.is_file());
}

#[test]
fn relative_invocation_still_yields_absolute_paths() {
    let scratch = Scratch::new();
    populate_library(&scratch);
    scratch.write("genome.fa", ">chr1\nACGT\n");
    scratch.write("reads/s1.fastq", "@r1\nACGT\n+\nIIII\n");
    scratch.write("pipeline.yml", PIPELINE);
    scratch.write("samples.tsv", "name\treads\tdepth\ns1\treads/s1.fastq\t10\n");

    // everything handed over as relative paths, as a shell user would
    std::env::set_current_dir(scratch.path()).unwrap();
    snakeforge::run(
        Path::new("pipeline.yml"),
        Path::new("samples.tsv"),
        Path::new("modules"),
        Path::new("out"),
    )
    .unwrap();

    let config = scratch.run_config();
    let reads = config["entries"]["s1"]["main"]["reads"].as_str().unwrap();
    assert!(Path::new(reads).is_absolute(), "{reads}");
    assert!(reads.ends_with("reads/s1.fastq"));

    let mapper = scratch.generated("bowtie2.sm");
    assert!(mapper.contains("-x /"), "{mapper}");
}

#[test]
fn missing_required_setting_names_the_module() {
    let scratch = Scratch::new();
    populate_library(&scratch);
    let err = scratch
        .run(
            "
pipeline:
    paired_end: false
mapping:
    module: bowtie2
",
            "name\treads\ns1\ts1.fastq\n",
        )
        .unwrap_err();
    let msg = format!("{err:?}");
    assert!(msg.contains("Error in pipeline file"));
    assert!(msg.contains("Error in module bowtie2"));
    assert!(msg.contains("Required parameter \"genome\" is missing"));
}

#[test]
fn unknown_module_is_a_pipeline_error() {
    let scratch = Scratch::new();
    populate_library(&scratch);
    let err = scratch
        .run(
            "
pipeline:
    paired_end: false
mapping:
    module: hisat2
",
            "name\treads\ns1\ts1.fastq\n",
        )
        .unwrap_err();
    assert!(format!("{err:?}").contains("mapping: Unknown module \"hisat2\""));
}

#[test]
fn missing_declared_column_is_a_samples_error() {
    let scratch = Scratch::new();
    populate_library(&scratch);
    scratch.write("genome.fa", ">chr1\nACGT\n");
    let err = scratch
        .run(PIPELINE, "name\treads\ns1\ts1.fastq\n")
        .unwrap_err();
    let msg = format!("{err:?}");
    assert!(msg.contains("Error in samples file"));
    assert!(msg.contains("Column \"depth\" is missing"));
}

#[test]
fn paired_end_needs_both_read_columns() {
    let scratch = Scratch::new();
    populate_library(&scratch);
    scratch.write("genome.fa", ">chr1\nACGT\n");
    let pipeline = "
pipeline:
    paired_end: true
mapping:
    module: bowtie2
    bowtie2:
        genome: genome.fa
";
    let err = scratch
        .run(pipeline, "name\tforward_reads\ns1\ts1_R1.fastq\n")
        .unwrap_err();
    assert!(format!("{err:?}").contains("Column \"reverse_reads\" is missing"));
}
