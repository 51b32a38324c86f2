/// Everything the workflow runner's command line is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOptions<'a> {
    pub repository: &'a str,
    pub profile: &'a str,
    /// Tag or commit of the pipeline repository.
    pub revision: &'a str,
    /// Output root; the pipeline name and run id are appended to it.
    pub output_path: &'a str,
    pub pipeline_name: &'a str,
    pub hash_id: &'a str,
    /// Location of the samplesheet describing the run's inputs.
    pub input: &'a str,
    /// Deployment stage exactly as configured, e.g. "prod".
    pub stage: &'a str,
    /// GPU queue to run on; `None` runs without GPUs.
    pub gpu_queue: Option<&'a str>,
}

/// Builds the command handed to the compute backend. The same options always yield the same string.
pub fn get_command_string(options: &CommandOptions) -> String {
    let mut parts = vec![
        options.repository.to_string(),
        format!("-profile {}", options.profile),
        format!("-revision {}", options.revision),
        format!(
            "--outdir {}/{}/{}",
            options.output_path, options.pipeline_name, options.hash_id
        ),
        format!("--input {}", options.input),
        format!("--with_gpu {}", options.gpu_queue.is_some()),
        format!("--stage {}", options.stage),
    ];

    if let Some(gpu_queue) = options.gpu_queue {
        parts.push(format!("--awsgpuqueue {gpu_queue}"));
    }

    parts.join(" ")
}

/// The job name is `wf-{stage}-{pipeline_name}-{hash_id}-{registry_id}`.
///
/// Field order matters: log filtering keys off the `wf-` prefix, the stage selects the tracking store and the
/// pipeline name plus hash id locate the run within it. The registry id is only there for people.
pub fn get_job_name(pipeline_name: &str, hash_id: &str, stage: &str, registry_id: &str) -> String {
    format!("wf-{stage}-{pipeline_name}-{hash_id}-{registry_id}")
}

/// Maps the configured deployment stage onto the name used in job names.
pub fn stage_name(stage: &str) -> &'static str {
    match stage {
        "prod" => "production",
        _ => "development",
    }
}

/// Derives a registry id from a file path: the final path segment's name before its extension, without dashes.
/// Returns `None` when the file has no extension.
pub fn registry_id_from_filename(path: &str) -> Option<String> {
    let filename = path.rsplit('/').next()?;
    let (rest, _extension) = filename.rsplit_once('.')?;
    let stem = rest.rsplit('.').next()?;

    Some(stem.replace('-', ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case::production("autoantibodyclassifier", "abc123", "production", "SE001",
        "wf-production-autoantibodyclassifier-abc123-SE001")]
    #[case::development("wf", "brave_otter_x7K2mQp", "development", "samplesheet",
        "wf-development-wf-brave_otter_x7K2mQp-samplesheet")]
    fn job_names(
        #[case] pipeline_name: &str,
        #[case] hash_id: &str,
        #[case] stage: &str,
        #[case] registry_id: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(get_job_name(pipeline_name, hash_id, stage, registry_id), expected);
    }

    #[rstest]
    #[case::prod("prod", "production")]
    #[case::dev("dev", "development")]
    #[case::staging("staging", "development")]
    #[case::full_word("production", "development")]
    fn stage_names(#[case] stage: &str, #[case] expected: &str) {
        assert_eq!(stage_name(stage), expected);
    }

    #[rstest]
    #[case::plain("uploads/SE-001.tsv", Some("SE001"))]
    #[case::nested("inputs/wf/brave_otter_x7K2mQp/samplesheet.csv", Some("samplesheet"))]
    #[case::double_extension("SE-002.fasta.gz", Some("fasta"))]
    #[case::no_directory("lib-42.csv", Some("lib42"))]
    #[case::no_extension("uploads/SE001", None)]
    fn registry_ids(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(registry_id_from_filename(path), expected.map(String::from));
    }

    #[test]
    fn command_with_gpu() {
        let command = get_command_string(&CommandOptions {
            repository: "https://github.com/alchemab/wf-nf-autoantibodyclassifier.git",
            profile: "awsbatch",
            revision: "v1.2.0",
            output_path: "s3://outputs",
            pipeline_name: "autoantibodyclassifier",
            hash_id: "brave_otter_x7K2mQp",
            input: "s3://inputs/autoantibodyclassifier/brave_otter_x7K2mQp/samplesheet.csv",
            stage: "prod",
            gpu_queue: Some("gpu-queue"),
        });

        assert_eq!(
            command,
            "https://github.com/alchemab/wf-nf-autoantibodyclassifier.git -profile awsbatch \
            -revision v1.2.0 --outdir s3://outputs/autoantibodyclassifier/brave_otter_x7K2mQp \
            --input s3://inputs/autoantibodyclassifier/brave_otter_x7K2mQp/samplesheet.csv \
            --with_gpu true --stage prod --awsgpuqueue gpu-queue"
        );
    }

    #[test]
    fn command_without_gpu() {
        let command = get_command_string(&CommandOptions {
            repository: "repo.git",
            profile: "local",
            revision: "main",
            output_path: "file:///tmp/out",
            pipeline_name: "wf",
            hash_id: "calm_fox_2222222",
            input: "file:///tmp/in/samplesheet.csv",
            stage: "dev",
            gpu_queue: None,
        });

        assert_eq!(
            command,
            "repo.git -profile local -revision main --outdir file:///tmp/out/wf/calm_fox_2222222 \
            --input file:///tmp/in/samplesheet.csv --with_gpu false --stage dev"
        );
    }
}
