//! Initialize and site listing commands.

use console::style;

use crate::admin::Admin;
use crate::runtime::Runtime;

/// Create the data directory, databases and asset root.
pub fn cmd_init(runtime: &Runtime) -> anyhow::Result<()> {
    let settings = &runtime.settings;
    std::fs::create_dir_all(&settings.asset_dir)?;

    println!(
        "{} Initialized comicrawl in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    println!("  Crawl database:   {}", settings.database_path.display());
    println!("  Catalog database: {}", settings.catalog_path.display());
    println!("  Assets:           {}", settings.asset_dir.display());

    if runtime.registry.is_empty() {
        println!(
            "{} No sites configured. Add a [sites.\"<domain>\"] section to comicrawl.toml",
            style("!").yellow()
        );
    } else {
        println!(
            "  {} site(s) configured: {}",
            runtime.registry.len(),
            runtime.registry.supported_domains().join(", ")
        );
    }
    Ok(())
}

pub fn cmd_sites(admin: &Admin) -> anyhow::Result<()> {
    let domains = admin.supported_domains();
    if domains.is_empty() {
        println!("{} No sites configured", style("!").yellow());
        return Ok(());
    }
    println!("\n{}", style("Supported sites").bold());
    for domain in domains {
        println!("  {}", domain);
    }
    Ok(())
}
