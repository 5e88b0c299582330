//! Target management commands.

use console::style;

use crate::admin::Admin;
use crate::models::TargetStatus;

use super::super::helpers::{format_time, styled_job_status, styled_target_status, truncate};

pub fn cmd_target_add(admin: &Admin, url: &str, title: Option<&str>) -> anyhow::Result<()> {
    let target = admin.add_target(url, title)?;
    println!(
        "{} Added target {} ({})",
        style("✓").green(),
        style(target.id).bold(),
        target.source_url
    );
    Ok(())
}

pub fn cmd_target_list(
    admin: &Admin,
    status: Option<TargetStatus>,
    limit: u32,
) -> anyhow::Result<()> {
    let targets = admin.list_targets(status, limit)?;
    if targets.is_empty() {
        println!("{} No targets", style("!").yellow());
        return Ok(());
    }

    println!("\n{}", style("Crawl targets").bold());
    println!("{}", "-".repeat(96));
    println!(
        "{:<6} {:<10} {:<30} {:<10} {:<18} URL",
        "ID", "Status", "Title", "Linked", "Last crawled"
    );
    println!("{}", "-".repeat(96));
    for target in targets {
        println!(
            "{:<6} {:<10} {:<30} {:<10} {:<18} {}",
            target.id,
            styled_target_status(target.status),
            truncate(target.label(), 29),
            target
                .production_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            format_time(target.last_crawled_at, "Never"),
            target.source_url
        );
    }

    let counts = admin.status_counts()?;
    let summary: Vec<String> = counts
        .iter()
        .map(|(status, n)| format!("{} {}", n, status))
        .collect();
    println!("\n{}", summary.join(", "));
    Ok(())
}

pub fn cmd_target_show(admin: &Admin, id: i64) -> anyhow::Result<()> {
    let target = admin.get_target(id)?;

    println!("\n{} {}", style("Target").bold(), target.id);
    println!("  URL:          {}", target.source_url);
    println!("  Domain:       {}", target.source_domain);
    println!("  Title:        {}", target.title.as_deref().unwrap_or("-"));
    println!("  Slug:         {}", target.slug.as_deref().unwrap_or("-"));
    println!("  Cover:        {}", target.cover_url.as_deref().unwrap_or("-"));
    println!("  Status:       {}", styled_target_status(target.status));
    println!(
        "  Production:   {}",
        target
            .production_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "not linked".to_string())
    );
    println!(
        "  Last crawled: {}",
        format_time(target.last_crawled_at, "Never")
    );

    let jobs = admin.list_jobs(Some(id), None, 5)?;
    if !jobs.is_empty() {
        println!("\n  {}", style("Recent jobs").bold());
        for job in jobs {
            println!(
                "  #{:<5} {:<7} {:<10} attempts {}/{}  {}",
                job.id,
                job.kind.as_str(),
                styled_job_status(job.status),
                job.attempts,
                job.max_attempts,
                job.error_message
                    .as_deref()
                    .map(|m| truncate(m, 60))
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}

pub fn cmd_target_update(
    admin: &Admin,
    id: i64,
    url: Option<&str>,
    title: Option<&str>,
) -> anyhow::Result<()> {
    if url.is_none() && title.is_none() {
        println!("{} Nothing to update (use --url or --title)", style("!").yellow());
        return Ok(());
    }
    let target = admin.update_target(id, url, title)?;
    println!(
        "{} Updated target {} ({})",
        style("✓").green(),
        target.id,
        target.source_url
    );
    Ok(())
}

pub fn cmd_target_remove(admin: &Admin, id: i64) -> anyhow::Result<()> {
    admin.remove_target(id)?;
    println!("{} Removed target {}", style("✓").green(), id);
    Ok(())
}
