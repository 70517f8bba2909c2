//! `devrelay report` command: cost and duration breakdown for a task.

use anyhow::{Context, Result};
use sqlx::PgPool;

use devrelay_db::queries::{ai_usage, pull_requests, runs as runs_db, tasks as tasks_db};

pub async fn run_report(pool: &PgPool, task_id: i64) -> Result<()> {
    let task = tasks_db::get_task(pool, task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    println!("Task: {} ({})", task.title, task.id);
    println!("Status: {}", task.status);
    println!();

    let total_cost = ai_usage::total_cost_for_task(pool, task.id).await?;
    println!("Total estimated cost: ${total_cost:.4}");
    println!();

    let runs = runs_db::list_runs_for_task(pool, task.id).await?;

    println!("{:<6} {:<10} {:<12} {:>10} {:>10}", "RUN", "NUMBER", "STATUS", "COST", "DURATION");
    println!("{}", "-".repeat(52));

    let mut completed_runs = 0usize;

    for run in &runs {
        if run.completed_at.is_some() {
            completed_runs += 1;
        }

        let run_cost = ai_usage::total_cost_for_run(pool, run.id).await?;
        let duration_str = match run.duration_ms {
            Some(ms) => format!("{:.1}s", ms as f64 / 1000.0),
            None => "-".to_string(),
        };

        println!(
            "{:<6} {:<10} {:<12} {:>10} {:>10}",
            run.id,
            run.run_number,
            run.status,
            format!("${run_cost:.4}"),
            duration_str
        );
    }

    println!();
    println!(
        "Completed runs: {}/{} ({:.0}%)",
        completed_runs,
        runs.len(),
        if runs.is_empty() { 0.0 } else { (completed_runs as f64 / runs.len() as f64) * 100.0 }
    );

    let prs = pull_requests::list_for_task(pool, task.id).await?;
    if !prs.is_empty() {
        println!();
        println!("Pull requests:");
        for pr in &prs {
            let merged = if pr.merged { "merged" } else { "open" };
            println!("  {} -- {merged}", pr.url);
        }
    }

    Ok(())
}
