use super::{parse_timestamp, print_json, CliHarness};
use crate::tracking::{
    DefaultAssignment, JobStatus, Match, NewRun, RegistryId, RunUpdate, ScanFilters,
};
use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use clap::{Args, Subcommand};

#[derive(Debug, Args)]
pub struct RunsSubcommands {
    #[clap(subcommand)]
    pub command: RunsCommands,
}

#[derive(Debug, Subcommand)]
pub enum RunsCommands {
    /// Detail a single run.
    Get {
        pipeline_name: String,
        hash_id: String,
    },

    /// List every run of a pipeline; defaults to the configured pipeline.
    List { pipeline_name: Option<String> },

    /// Scan all runs; every given filter must match.
    Scan(ScanArgs),

    /// Find runs whose identifier contains the given text, oldest first.
    Search {
        search: String,

        /// Maximum number of runs returned.
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Update fields of an existing run. Only the given fields change.
    Update(UpdateArgs),

    /// Soft delete a run. It can be brought back with restore.
    Remove {
        pipeline_name: String,
        hash_id: String,
    },

    /// Restore a removed run.
    Restore {
        pipeline_name: String,
        hash_id: String,
    },

    /// Write every run in a JSON array file in one transaction. Runs whose key already exists are replaced.
    Import {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Make a run the default and unset the default flag of the given siblings, all at once.
    SetDefault {
        pipeline_name: String,
        hash_id: String,

        /// Sibling runs of the same pipeline that lose the default flag.
        #[arg(long = "unset", value_name = "HASH_ID")]
        unset: Vec<String>,
    },
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    #[arg(long)]
    pipeline_name: Option<String>,

    /// May be repeated; matches any of the given ids.
    #[arg(long = "hash-id", value_name = "HASH_ID")]
    hash_ids: Vec<String>,

    #[arg(long)]
    user_id: Option<String>,

    #[arg(long)]
    user_email: Option<String>,

    #[arg(long)]
    pipeline_version: Option<String>,

    #[arg(long)]
    registry_type: Option<String>,

    /// May be repeated. With registry type "multi" the ids must match a run's ids exactly.
    #[arg(long = "registry-id", value_name = "REGISTRY_ID")]
    registry_ids: Vec<String>,

    #[arg(long, value_parser = parse_timestamp)]
    started_at: Option<NaiveDateTime>,

    #[arg(long, value_parser = parse_timestamp, conflicts_with = "started_at")]
    started_after: Option<NaiveDateTime>,

    #[arg(long, value_parser = parse_timestamp, conflicts_with = "started_at")]
    started_before: Option<NaiveDateTime>,

    #[arg(long, value_parser = parse_timestamp)]
    ended_at: Option<NaiveDateTime>,

    #[arg(long, value_parser = parse_timestamp, conflicts_with = "ended_at")]
    ended_after: Option<NaiveDateTime>,

    #[arg(long, value_parser = parse_timestamp, conflicts_with = "ended_at")]
    ended_before: Option<NaiveDateTime>,

    #[arg(long)]
    job_status: Option<JobStatus>,

    #[arg(long)]
    default: Option<bool>,

    #[arg(long)]
    tag: Option<String>,

    #[arg(long)]
    removed: Option<bool>,
}

/// Builds an exact or inclusive range match from command line bounds.
fn date_match(
    at: Option<NaiveDateTime>,
    after: Option<NaiveDateTime>,
    before: Option<NaiveDateTime>,
) -> Option<Match<NaiveDateTime>> {
    match (at, after, before) {
        (Some(at), _, _) => Some(Match::Exact(at)),
        (None, Some(after), Some(before)) => Some(Match::Between(after, before)),
        (None, Some(after), None) => Some(Match::AtLeast(after)),
        (None, None, Some(before)) => Some(Match::AtMost(before)),
        (None, None, None) => None,
    }
}

impl From<ScanArgs> for ScanFilters {
    fn from(args: ScanArgs) -> Self {
        ScanFilters {
            pipeline_name: args.pipeline_name.map(Match::Exact),
            hash_ids: args.hash_ids,
            user_id: args.user_id,
            user_email: args.user_email,
            pipeline_version: args.pipeline_version,
            registry_type: args.registry_type,
            registry_ids: args.registry_ids,
            date_start: date_match(args.started_at, args.started_after, args.started_before),
            date_end: date_match(args.ended_at, args.ended_after, args.ended_before),
            job_status: args.job_status,
            default: args.default,
            tag: args.tag,
            removed: args.removed,
        }
    }
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    pipeline_name: String,
    hash_id: String,

    #[arg(long)]
    pipeline_version: Option<String>,

    #[arg(long)]
    registry_type: Option<String>,

    /// May be repeated; more than one id stores a sorted list.
    #[arg(long = "registry-id", value_name = "REGISTRY_ID")]
    registry_ids: Vec<String>,

    #[arg(long, value_parser = parse_timestamp)]
    date_start: Option<NaiveDateTime>,

    #[arg(long, value_parser = parse_timestamp)]
    date_end: Option<NaiveDateTime>,

    #[arg(long)]
    command: Option<String>,

    #[arg(long)]
    job_status: Option<JobStatus>,

    #[arg(long)]
    default: Option<bool>,

    #[arg(long)]
    tag: Option<String>,

    #[arg(long)]
    output_path: Option<String>,

    #[arg(long)]
    user_id: Option<String>,

    #[arg(long)]
    user_email: Option<String>,

    /// JSON document.
    #[arg(long)]
    pipeline_tools_submit_parameters: Option<serde_json::Value>,

    /// JSON document.
    #[arg(long)]
    cloning_parameters: Option<serde_json::Value>,

    #[arg(long)]
    scheduler_job_id: Option<String>,

    /// JSON document.
    #[arg(long)]
    error_data: Option<serde_json::Value>,

    #[arg(long)]
    log_stream: Option<String>,

    #[arg(long)]
    removed: Option<bool>,

    #[arg(long, value_parser = parse_timestamp)]
    removed_date: Option<NaiveDateTime>,
}

impl From<UpdateArgs> for RunUpdate {
    fn from(args: UpdateArgs) -> Self {
        let registry_id = match args.registry_ids.len() {
            0 => None,
            1 => args.registry_ids.into_iter().next().map(RegistryId::Single),
            _ => Some(RegistryId::multi(args.registry_ids)),
        };

        RunUpdate {
            pipeline_version: args.pipeline_version,
            registry_type: args.registry_type,
            registry_id,
            date_start: args.date_start,
            date_end: args.date_end,
            command: args.command,
            job_status: args.job_status,
            default: args.default,
            tag: args.tag,
            output_path: args.output_path,
            user_id: args.user_id,
            user_email: args.user_email,
            pipeline_tools_submit_parameters: args.pipeline_tools_submit_parameters,
            cloning_parameters: args.cloning_parameters,
            scheduler_job_id: args.scheduler_job_id,
            error_data: args.error_data,
            log_stream: args.log_stream,
            removed: args.removed,
            removed_date: args.removed_date,
        }
    }
}

impl CliHarness {
    pub async fn runs(&self, command: RunsCommands) -> Result<()> {
        let tracking = self.tracking().await?;

        match command {
            RunsCommands::Get {
                pipeline_name,
                hash_id,
            } => match tracking.get_entry(&pipeline_name, &hash_id).await? {
                Some(run) => print_json(&run),
                None => bail!("run '{hash_id}' of pipeline '{pipeline_name}' not found"),
            },
            RunsCommands::List { pipeline_name } => {
                let pipeline_name =
                    pipeline_name.unwrap_or_else(|| self.config.pipeline.name.clone());
                print_json(&tracking.query_entries(&pipeline_name).await?)
            }
            RunsCommands::Scan(args) => {
                print_json(&tracking.scan_entries(&ScanFilters::from(args)).await?)
            }
            RunsCommands::Search { search, limit } => {
                print_json(&tracking.search_entries(&search, limit).await?)
            }
            RunsCommands::Update(args) => {
                let pipeline_name = args.pipeline_name.clone();
                let hash_id = args.hash_id.clone();
                let changes = tracking
                    .update_entry(&pipeline_name, &hash_id, RunUpdate::from(args))
                    .await?;
                print_json(&changes)
            }
            RunsCommands::Remove {
                pipeline_name,
                hash_id,
            } => {
                tracking.remove_entry(&pipeline_name, &hash_id).await?;
                print_json(&serde_json::json!({"status": "removed", "hash_id": hash_id}))
            }
            RunsCommands::Restore {
                pipeline_name,
                hash_id,
            } => {
                tracking.restore_entry(&pipeline_name, &hash_id).await?;
                print_json(&serde_json::json!({"status": "restored", "hash_id": hash_id}))
            }
            RunsCommands::Import { path } => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("Could not read '{path}'"))?;
                let new_runs: Vec<NewRun> = serde_json::from_str(&contents)
                    .with_context(|| format!("Could not parse runs from '{path}'"))?;
                let count = new_runs.len();

                tracking.write_batch(new_runs).await?;
                print_json(&serde_json::json!({"status": "success", "imported": count}))
            }
            RunsCommands::SetDefault {
                pipeline_name,
                hash_id,
                unset,
            } => {
                if unset.contains(&hash_id) {
                    bail!("run '{hash_id}' cannot be both set and unset as default");
                }

                let mut assignments = vec![DefaultAssignment {
                    pipeline_name: pipeline_name.clone(),
                    hash_id: hash_id.clone(),
                    default: true,
                }];
                assignments.extend(unset.into_iter().map(|sibling| DefaultAssignment {
                    pipeline_name: pipeline_name.clone(),
                    hash_id: sibling,
                    default: false,
                }));

                tracking.update_batch_default_field(&assignments).await?;
                print_json(&serde_json::json!({"status": "success", "default": hash_id}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::record;
    use pretty_assertions::assert_eq;

    fn timestamp(value: &str) -> NaiveDateTime {
        record::parse_timestamp(value).unwrap()
    }

    #[test]
    fn date_bounds_become_matches() {
        let from = timestamp("2024-01-01 00:00:00");
        let to = timestamp("2024-02-01 00:00:00");

        assert_eq!(date_match(None, None, None), None);
        assert_eq!(date_match(Some(from), None, None), Some(Match::Exact(from)));
        assert_eq!(
            date_match(None, Some(from), Some(to)),
            Some(Match::Between(from, to))
        );
        assert_eq!(date_match(None, Some(from), None), Some(Match::AtLeast(from)));
        assert_eq!(date_match(None, None, Some(to)), Some(Match::AtMost(to)));
    }

    #[test]
    fn repeated_registry_ids_become_a_sorted_list() {
        let args = UpdateArgs {
            pipeline_name: "wf".into(),
            hash_id: "abc".into(),
            pipeline_version: None,
            registry_type: Some("multi".into()),
            registry_ids: vec!["SE002".into(), "SE001".into()],
            date_start: None,
            date_end: None,
            command: None,
            job_status: Some(JobStatus::Running),
            default: None,
            tag: None,
            output_path: None,
            user_id: None,
            user_email: None,
            pipeline_tools_submit_parameters: None,
            cloning_parameters: None,
            scheduler_job_id: None,
            error_data: None,
            log_stream: None,
            removed: None,
            removed_date: None,
        };

        let update = RunUpdate::from(args);
        assert_eq!(
            update,
            RunUpdate {
                registry_type: Some("multi".into()),
                registry_id: Some(RegistryId::multi(["SE001", "SE002"])),
                job_status: Some(JobStatus::Running),
                ..Default::default()
            }
        );
    }
}
