use std::sync::Arc;

use anyhow::Context;
use courier_core::app::{Applied, BuildError, PlannedTask};
use courier_core::config::{ConfigError, CourierConfig};
use courier_core::domain::{NewTask, QueueEntry, Rating, TenantId};
use courier_core::impls::{HttpExecutor, SqliteStore};
use courier_core::ports::ResetFilter;
use courier_core::{DispatchError, Dispatcher, router};

use crate::cli::{AddTaskArgs, Args, Commands};

pub async fn dispatch(args: Args, config: CourierConfig) -> anyhow::Result<i32> {
    let tenant = args.tenant;
    if let Commands::Route { title } = &args.command {
        let (executor, tag) = router::classify(title);
        println!("{executor}\t{}", tag.unwrap_or("(default)"));
        return Ok(0);
    }

    let dispatcher = build_dispatcher(&config)?;
    match args.command {
        Commands::AddTask(add) => add_task(&dispatcher, &tenant, add).await,
        Commands::Plan { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read plan {}", file.display()))?;
            let plan: Vec<PlannedTask> = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse plan {}", file.display()))?;
            let report = dispatcher.planner().submit_plan(&tenant, plan).await?;
            for task in &report.tasks {
                println!("{}\t{}\t{}", task.id, task.status, task.title);
            }
            println!("queued {} of {} task(s)", report.entries.len(), report.tasks.len());
            Ok(0)
        }
        Commands::Enqueue { limit } => {
            let report = dispatcher.enqueue_ready(&tenant, limit).await?;
            for entry in &report.entries {
                print_entry(entry);
            }
            println!(
                "queued {} task(s), {} already queued",
                report.entries.len(),
                report.conflicts
            );
            Ok(0)
        }
        Commands::Run { executor, limit } => {
            let report = dispatcher.run_pass(&tenant, executor, limit).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.failures() > 0 { 1 } else { 0 })
        }
        Commands::Depth => {
            for row in dispatcher.status().depth(&tenant).await? {
                println!("{}\t{}\t{}", row.executor, row.status, row.count);
            }
            Ok(0)
        }
        Commands::Quarantined { limit } => {
            for entry in dispatcher.status().quarantined(&tenant, limit).await? {
                println!(
                    "{}\t{}\t{}\tretries={}\t{}",
                    entry.id,
                    entry.task_id,
                    entry.executor,
                    entry.retry_count,
                    entry.error.as_deref().unwrap_or("")
                );
            }
            Ok(0)
        }
        Commands::Reset {
            executor,
            task,
            entry,
            limit,
        } => {
            let mut filter = ResetFilter::all();
            if let Some(executor) = executor {
                filter = filter.executor(executor);
            }
            if let Some(task) = task {
                filter = filter.task(task);
            }
            if let Some(entry) = entry {
                filter = filter.entry(entry);
            }
            let reset = dispatcher
                .maintenance()
                .reset_quarantined(&tenant, &filter, limit)
                .await?;
            for id in &reset {
                println!("{id}");
            }
            println!("reset {} entr{}", reset.len(), if reset.len() == 1 { "y" } else { "ies" });
            Ok(0)
        }
        Commands::Claim { executor, claimant } => {
            match dispatcher.claim_next(&tenant, executor, &claimant).await? {
                Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
                None => println!("nothing queued for {executor}"),
            }
            Ok(0)
        }
        Commands::Complete { entry, output } => {
            let applied = dispatcher.complete(&tenant, entry, &output).await?;
            print_applied(&applied);
            Ok(0)
        }
        Commands::Fail { entry, error } => {
            let applied = dispatcher.fail(&tenant, entry, &error).await?;
            print_applied(&applied);
            Ok(0)
        }
        Commands::Cancel { entry } => {
            let cancelled = dispatcher.cancel(&tenant, entry).await?;
            print_entry(&cancelled);
            Ok(0)
        }
        Commands::Cleanup {
            duplicates,
            stale,
            retention_days,
        } => {
            let both = !duplicates && !stale;
            let maintenance = dispatcher.maintenance();
            if duplicates || both {
                let deleted = maintenance.cleanup_duplicates(&tenant).await?;
                println!("purged {deleted} duplicate quarantined entr(ies)");
            }
            if stale || both {
                let retention = match retention_days {
                    Some(days) => chrono::Duration::try_days(days).ok_or_else(|| {
                        DispatchError::InvalidInput(format!(
                            "--retention-days {days} is out of range"
                        ))
                    })?,
                    None => config.dispatch.stale_retention()?,
                };
                let deleted = maintenance.cleanup_stale(&tenant, retention).await?;
                println!("purged {deleted} finished entr(ies)");
            }
            Ok(0)
        }
        Commands::Timeline { entry } => {
            for record in dispatcher.status().timeline(&tenant, entry).await? {
                println!(
                    "{}\t{}\t{}",
                    record.recorded_at.to_rfc3339(),
                    record.action,
                    record.details
                );
            }
            Ok(0)
        }
        Commands::Route { .. } => Ok(0),
    }
}

fn build_dispatcher(config: &CourierConfig) -> anyhow::Result<Dispatcher> {
    let store = SqliteStore::open(&config.store.path)
        .with_context(|| format!("failed to open store {}", config.store.path.display()))?;
    let settings = config.dispatch.settings();
    let executor_timeout = settings.executor_timeout;

    let mut builder = Dispatcher::builder()
        .store(store)
        .settings(settings)
        .retry_policy(config.dispatch.retry_policy());
    for (executor_type, executor) in config.executors()? {
        let http = HttpExecutor::new(&executor.endpoint, executor.token()?, executor_timeout)
            .map_err(|e| ConfigError::Invalid(format!("executors.{executor_type}: {e}")))?;
        tracing::debug!(executor = %executor_type, endpoint = http.endpoint(), "executor registered");
        builder = builder
            .register(executor_type, Arc::new(http))
            .map_err(BuildError::from)?;
    }
    Ok(builder.build()?)
}

async fn add_task(
    dispatcher: &Dispatcher,
    tenant: &TenantId,
    add: AddTaskArgs,
) -> anyhow::Result<i32> {
    let mut task = NewTask::new(add.title)
        .with_description(add.description)
        .with_ratings(Rating::new(add.urgency)?, Rating::new(add.importance)?);
    if let Some(domain) = add.domain {
        task = task.with_domain(domain);
    }
    let mut step = PlannedTask::new(task);
    for prerequisite in add.after {
        step = step.after(prerequisite);
    }

    let report = dispatcher.planner().submit_plan(tenant, vec![step]).await?;
    for task in &report.tasks {
        println!("{}\t{}\t{}", task.id, task.status, task.title);
    }
    for entry in &report.entries {
        print_entry(entry);
    }
    Ok(0)
}

fn print_entry(entry: &QueueEntry) {
    println!(
        "{}\t{}\t{}\t{}\tpriority={}",
        entry.id,
        entry.task_id,
        entry.executor,
        entry.status,
        entry.priority.get()
    );
}

fn print_applied(applied: &Applied) {
    match applied {
        Applied::Completed { entry, resolution } => {
            print_entry(entry);
            for task in &resolution.promoted {
                println!("unblocked {task}");
            }
        }
        Applied::Retried { failed, retry } => {
            print_entry(failed);
            println!("retry {} of {}", retry.retry_count, retry.max_retries);
            print_entry(retry);
        }
        Applied::Quarantined(entry) | Applied::Abandoned(entry) => {
            print_entry(entry);
            if let Some(error) = &entry.error {
                println!("error: {error}");
            }
        }
    }
}
