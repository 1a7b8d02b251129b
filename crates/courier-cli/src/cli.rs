use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use courier_core::domain::{EntryId, ExecutorType, TaskId, TenantId};

#[derive(Parser, Debug)]
#[command(name = "courier", version, about = "Task execution queue and dispatcher")]
pub struct Args {
    #[arg(long, default_value = courier_core::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Tenant every command is scoped to.
    #[arg(long)]
    pub tenant: TenantId,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a task; it is queued at once unless it waits for other tasks.
    AddTask(AddTaskArgs),
    /// Submit a JSON plan (array of tasks with `depends_on` indexes).
    Plan { file: PathBuf },
    /// Queue ready tasks.
    Enqueue {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Run one dispatch pass for an automated executor type.
    Run {
        #[arg(long)]
        executor: ExecutorType,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Entry counts by executor and status.
    Depth,
    /// Quarantined entries with their last error.
    Quarantined {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Requeue quarantined entries.
    Reset {
        #[arg(long)]
        executor: Option<ExecutorType>,
        #[arg(long)]
        task: Option<TaskId>,
        #[arg(long)]
        entry: Option<EntryId>,
        #[arg(long)]
        limit: usize,
    },
    /// Claim the best queued entry for an executor type.
    Claim {
        #[arg(long)]
        executor: ExecutorType,
        #[arg(long)]
        claimant: String,
    },
    Complete {
        entry: EntryId,
        #[arg(long, default_value = "")]
        output: String,
    },
    Fail {
        entry: EntryId,
        #[arg(long)]
        error: String,
    },
    Cancel { entry: EntryId },
    /// Purge duplicate quarantine and old finished entries.
    Cleanup {
        #[arg(long)]
        duplicates: bool,
        #[arg(long)]
        stale: bool,
        /// Overrides `dispatch.stale_retention_days`.
        #[arg(long)]
        retention_days: Option<i64>,
    },
    /// Dispatch log of one entry.
    Timeline { entry: EntryId },
    /// Show which executor a title routes to.
    Route { title: String },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct AddTaskArgs {
    pub title: String,

    #[arg(long, default_value = "")]
    pub description: String,

    #[arg(long, default_value_t = 3)]
    pub urgency: u8,

    #[arg(long, default_value_t = 3)]
    pub importance: u8,

    #[arg(long)]
    pub domain: Option<String>,

    /// Existing task this one waits for. Repeatable.
    #[arg(long = "after", action = clap::ArgAction::Append)]
    pub after: Vec<TaskId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn tenant_is_required() {
        assert!(Args::try_parse_from(["courier", "depth"]).is_err());
        let args = Args::try_parse_from(["courier", "--tenant", "alice", "depth"]).unwrap();
        assert_eq!(args.tenant.as_str(), "alice");
        assert!(matches!(args.command, Commands::Depth));
    }

    #[test]
    fn executor_types_parse_by_name() {
        let args = Args::try_parse_from([
            "courier", "--tenant", "alice", "run", "--executor", "code-agent", "--limit", "3",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Commands::Run {
                executor: ExecutorType::CodeAgent,
                limit: 3
            }
        ));
        assert!(
            Args::try_parse_from(["courier", "--tenant", "alice", "run", "--executor", "robot"])
                .is_err()
        );
    }
}
