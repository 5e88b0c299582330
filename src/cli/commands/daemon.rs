//! Long-running scheduler and worker process.

use console::style;
use tokio::sync::watch;

use crate::runtime::Runtime;

/// Run until Ctrl-C, then let in-flight jobs finish.
pub async fn cmd_daemon(runtime: &Runtime) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    println!(
        "{} comicrawl daemon started ({} site(s)); press Ctrl-C to stop",
        style("→").cyan(),
        runtime.registry.len()
    );
    runtime.run_daemon(shutdown_rx).await?;
    println!("{} Stopped", style("✓").green());
    Ok(())
}
