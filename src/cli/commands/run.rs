//! Run, job listing and sweep commands.

use console::style;

use crate::admin::{Admin, RunRequest};
use crate::models::{JobKind, JobStatus};
use crate::scheduler::Sweep;

use super::super::helpers::{format_time, styled_job_status, truncate};

pub async fn cmd_run(admin: &Admin, id: i64, kind: JobKind, now: bool) -> anyhow::Result<()> {
    match admin.run(id, kind, now).await? {
        RunRequest::Enqueued(job) => println!(
            "{} Enqueued {} job {} for target {}",
            style("✓").green(),
            job.kind,
            job.id,
            id
        ),
        RunRequest::AlreadyQueued => println!(
            "{} Target {} already has a job queued or running",
            style("!").yellow(),
            id
        ),
        RunRequest::Completed { job_id, outcome } => println!(
            "{} Job {} crawled target {}: title {}, {} chapter(s) synced, {} skipped",
            style("✓").green(),
            job_id,
            id,
            outcome.production_id,
            outcome.chapters_synced,
            outcome.chapters_skipped
        ),
    }
    Ok(())
}

pub fn cmd_run_all(admin: &Admin) -> anyhow::Result<()> {
    let jobs = admin.run_all()?;
    println!("{} Enqueued {} job(s)", style("✓").green(), jobs.len());
    Ok(())
}

pub fn cmd_jobs(
    admin: &Admin,
    target: Option<i64>,
    status: Option<JobStatus>,
    limit: u32,
) -> anyhow::Result<()> {
    let jobs = admin.list_jobs(target, status, limit)?;
    if jobs.is_empty() {
        println!("{} No jobs", style("!").yellow());
        return Ok(());
    }

    println!("\n{}", style("Crawl jobs").bold());
    println!("{}", "-".repeat(100));
    println!(
        "{:<6} {:<7} {:<7} {:<10} {:<9} {:<18} Error",
        "ID", "Target", "Kind", "Status", "Attempts", "Created"
    );
    println!("{}", "-".repeat(100));
    for job in jobs {
        println!(
            "{:<6} {:<7} {:<7} {:<10} {:<9} {:<18} {}",
            job.id,
            job.target_id,
            job.kind.as_str(),
            styled_job_status(job.status),
            format!("{}/{}", job.attempts, job.max_attempts),
            format_time(Some(job.created_at), "-"),
            job.error_message
                .as_deref()
                .map(|m| truncate(m, 40))
                .unwrap_or_default()
        );
    }
    Ok(())
}

pub fn cmd_sweep(admin: &Admin, sweep: Sweep) -> anyhow::Result<()> {
    let report = admin.sweep(sweep)?;
    println!(
        "{} {} sweep: {} selected, {} enqueued, {} already in flight",
        style("✓").green(),
        sweep,
        report.selected,
        report.enqueued,
        report.skipped()
    );
    Ok(())
}
