//! One-shot task management commands.

use anyhow::bail;
use chrono::{Local, TimeZone};

use keepup_scheduler::Scheduler;
use keepup_storage::TaskStore;
use keepup_types::{LogEntry, NetworkTask};

pub async fn add(scheduler: &Scheduler, task: NetworkTask, start: bool) -> anyhow::Result<()> {
    let task = scheduler.add_task(&task).await?;
    println!("Added task {}: {}", task.id, describe(&task));
    if start {
        scheduler.schedule(&task).await?;
        println!("Task {} started", task.id);
    }
    Ok(())
}

pub async fn list(store: &dyn TaskStore) -> anyhow::Result<()> {
    let tasks = store.list_tasks().await?;
    if tasks.is_empty() {
        println!("No tasks configured");
        return Ok(());
    }
    println!(
        "{:>4}  {:<8}  {:<9}  {:>8}  {:>8}  TARGET",
        "ID", "STATE", "TYPE", "INTERVAL", "FAILURES"
    );
    for task in &tasks {
        println!(
            "{:>4}  {:<8}  {:<9}  {:>7}m  {:>8}  {}",
            task.id,
            if task.running { "running" } else { "stopped" },
            task.access_type,
            task.interval_minutes,
            task.failure_count,
            target(task),
        );
    }
    Ok(())
}

pub async fn remove(scheduler: &Scheduler, id: i64) -> anyhow::Result<()> {
    if !scheduler.remove_task(id).await? {
        bail!("Task {id} not found");
    }
    println!("Removed task {id}");
    Ok(())
}

pub async fn start(scheduler: &Scheduler, store: &dyn TaskStore, id: i64) -> anyhow::Result<()> {
    let Some(task) = store.read_task(id).await? else {
        bail!("Task {id} not found");
    };
    if task.running {
        println!("Task {id} is already running");
        return Ok(());
    }
    scheduler.schedule(&task).await?;
    println!("Task {id} started");
    Ok(())
}

pub async fn stop(scheduler: &Scheduler, store: &dyn TaskStore, id: i64) -> anyhow::Result<()> {
    let Some(task) = store.read_task(id).await? else {
        bail!("Task {id} not found");
    };
    scheduler.cancel(&task).await?;
    println!("Task {id} stopped");
    Ok(())
}

pub async fn logs(store: &dyn TaskStore, id: i64, limit: Option<usize>) -> anyhow::Result<()> {
    if store.read_task(id).await?.is_none() {
        bail!("Task {id} not found");
    }
    let entries = store.read_logs(id).await?;
    if entries.is_empty() {
        println!("No log entries for task {id}");
        return Ok(());
    }
    for entry in entries.iter().take(limit.unwrap_or(usize::MAX)) {
        println!("{}", format_entry(entry));
    }
    Ok(())
}

pub async fn clear_logs(store: &dyn TaskStore, id: i64) -> anyhow::Result<()> {
    if store.read_task(id).await?.is_none() {
        bail!("Task {id} not found");
    }
    store.delete_logs(id).await?;
    println!("Cleared log of task {id}");
    Ok(())
}

fn target(task: &NetworkTask) -> String {
    if task.port == 0 {
        task.address.clone()
    } else {
        format!("{}:{}", task.address, task.port)
    }
}

fn describe(task: &NetworkTask) -> String {
    format!(
        "{} {} every {} min",
        task.access_type,
        target(task),
        task.interval_minutes
    )
}

fn format_entry(entry: &LogEntry) -> String {
    let time = Local
        .timestamp_millis_opt(entry.timestamp)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| entry.timestamp.to_string());
    let status = if entry.success { "OK  " } else { "FAIL" };
    format!("{time}  {status}  {}", entry.message)
}
