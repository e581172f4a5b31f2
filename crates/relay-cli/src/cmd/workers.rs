use crate::output::{print_json, print_table};
use anyhow::Context;
use relay_core::config::{Config, ReviewerBackend, WorkerBackend};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;

    if json {
        return print_json(&serde_json::json!({
            "workers": config.workers,
            "reviewer": config.reviewer,
        }));
    }

    let rows = config
        .workers
        .iter()
        .map(|w| {
            let backend = match &w.backend {
                WorkerBackend::Shell { command, .. } => format!("shell: {command}"),
                WorkerBackend::Echo => "echo".to_string(),
            };
            vec![
                w.id.clone(),
                w.capability.to_string(),
                w.category.clone(),
                if w.available { "yes" } else { "no" }.to_string(),
                backend,
            ]
        })
        .collect();
    print_table(&["ID", "CAPABILITY", "CATEGORY", "AVAILABLE", "BACKEND"], rows);

    let reviewer = match &config.reviewer.backend {
        ReviewerBackend::Shell { command, .. } => format!("shell: {command}"),
        ReviewerBackend::AutoApprove => "auto_approve".to_string(),
    };
    println!();
    println!("Reviewer: {} ({reviewer})", config.reviewer.id);
    Ok(())
}
