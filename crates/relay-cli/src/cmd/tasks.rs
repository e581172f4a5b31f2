use crate::output::{print_json, print_table};
use anyhow::Context;
use relay_core::journal::TaskJournal;
use relay_core::paths;
use relay_core::task::Task;
use std::path::Path;
use uuid::Uuid;

fn open_journal(root: &Path) -> anyhow::Result<Option<TaskJournal>> {
    let path = paths::journal_path(root);
    if !path.exists() {
        return Ok(None);
    }
    let journal = TaskJournal::open(&path)
        .with_context(|| format!("failed to open {} (is `relay serve` running?)", path.display()))?;
    Ok(Some(journal))
}

pub fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let tasks = match open_journal(root)? {
        Some(journal) => journal.load_all()?,
        None => Vec::new(),
    };

    if json {
        return print_json(&tasks);
    }
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    let rows = tasks
        .iter()
        .map(|t| {
            vec![
                t.id.to_string(),
                t.status.to_string(),
                t.capability.to_string(),
                t.worker_id.clone(),
                t.attempt_count.to_string(),
                t.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();
    print_table(
        &["ID", "STATUS", "CAPABILITY", "WORKER", "ATTEMPTS", "UPDATED"],
        rows,
    );
    Ok(())
}

pub fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let id = Uuid::parse_str(id).with_context(|| format!("'{id}' is not a task id"))?;
    let task = open_journal(root)?
        .map(|j| j.get(id))
        .transpose()?
        .flatten()
        .with_context(|| format!("task {id} not found"))?;

    if json {
        print_json(&task)
    } else {
        print_task(&task);
        Ok(())
    }
}

/// Human-readable summary: status line, verdict history, then the outcome.
pub fn print_task(task: &Task) {
    println!("Task:       {}", task.id);
    println!("Capability: {} ({})", task.capability, task.worker_id);
    println!("Status:     {}", task.status);
    println!("Attempts:   {}", task.attempt_count);

    if !task.verdicts.is_empty() {
        println!();
        println!("Verdicts:");
        for v in &task.verdicts {
            match &v.feedback {
                Some(feedback) => {
                    println!("  #{} {} by {}: {}", v.attempt, v.outcome, v.reviewer, feedback)
                }
                None => println!("  #{} {} by {}", v.attempt, v.outcome, v.reviewer),
            }
        }
    }

    if let Some(reason) = &task.failure {
        println!();
        println!("Failure: {reason}");
    }
    if let Some(result) = &task.result {
        println!();
        println!("Result:");
        match result {
            serde_json::Value::String(s) => println!("{s}"),
            other => println!(
                "{}",
                serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())
            ),
        }
    }
}
