//! `devrelay status` command: show task progress, either fleet-wide or
//! for a single task.

use anyhow::{Context, Result};
use sqlx::PgPool;

use devrelay_db::queries::{runs as runs_db, steps as steps_db, tasks as tasks_db};

/// Run the status command.
///
/// When `task_id` is `Some`, shows detailed status for that task.
/// When `None`, lists every task with a one-line summary.
pub async fn run_status(pool: &PgPool, task_id: Option<i64>) -> Result<()> {
    match task_id {
        Some(id) => run_task_status(pool, id).await,
        None => run_fleet_status(pool).await,
    }
}

async fn run_task_status(pool: &PgPool, task_id: i64) -> Result<()> {
    let task = tasks_db::get_task(pool, task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    println!("Task: {} ({})", task.title, task.id);
    println!("Source: {} / {}", task.source, task.external_item_id);
    println!("Status: {}", task.status);
    println!("Repository: {}", task.repository_url);
    if let Some(until) = task.cooldown_until {
        let kind = task.cooldown_type.map(|c| c.to_string()).unwrap_or_default();
        println!("Cooldown: until {} ({kind})", until.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!(
        "Reactivations: {} (failed attempts {})",
        task.reactivation_count, task.failed_reactivation_attempts
    );
    if task.is_locked {
        println!("Locked by: {}", task.lock_owner.as_deref().unwrap_or("unknown"));
    }
    println!();

    let runs = runs_db::list_runs_for_task(pool, task.id).await?;
    println!("Runs:");
    if runs.is_empty() {
        println!("  (none)");
    }
    for run in &runs {
        let reactivated = if run.is_reactivation { " (reactivation)" } else { "" };
        println!(
            "  run {} #{} -- {}{} (debug attempts {})",
            run.id, run.run_number, run.status, reactivated, run.debug_attempts
        );
        let steps = steps_db::list_steps_for_run(pool, run.id).await?;
        for step in &steps {
            let icon = match step.status.to_string().as_str() {
                "pending" => ".",
                "running" => "*",
                "completed" => "+",
                "failed" => "!",
                _ => " ",
            };
            println!("    [{icon}] {} -- {}", step.node_name, step.status);
        }
    }

    Ok(())
}

async fn run_fleet_status(pool: &PgPool) -> Result<()> {
    let tasks = tasks_db::list_tasks(pool).await?;

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!("{:<6} {:<10} {:<30} {:<14} {:>4}", "ID", "SOURCE", "TITLE", "STATUS", "LCK");
    println!("{}", "-".repeat(70));

    for task in &tasks {
        let title_display = if task.title.len() > 28 {
            format!("{}...", &task.title[..25])
        } else {
            task.title.clone()
        };
        let lock = if task.is_locked { "Y" } else { "" };
        println!(
            "{:<6} {:<10} {:<30} {:<14} {:>4}",
            task.id, task.source, title_display, task.status, lock
        );
    }

    Ok(())
}
