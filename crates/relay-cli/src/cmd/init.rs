use anyhow::Context;
use relay_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    println!("Initializing relay in: {}", root.display());

    let config_path = paths::config_path(root);
    if !config_path.exists() {
        let cfg = Config::new(&project_name);
        cfg.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    io::ensure_gitignore_entry(root, paths::JOURNAL_FILE)
        .context("failed to update .gitignore")?;

    println!();
    println!("Edit {} to point workers at real commands,", paths::CONFIG_FILE);
    println!("then try: relay run backend '{{\"goal\": \"hello\"}}'");
    Ok(())
}
