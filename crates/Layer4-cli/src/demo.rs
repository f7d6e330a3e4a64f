//! Demo workload - submits a batch of analysis tasks and reports on them

use insight_foundation::EngineConfig;
use insight_task::{TaskPriority, TaskRequest, TaskService, TaskStatus};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const PRIORITIES: [TaskPriority; 4] = [
    TaskPriority::Low,
    TaskPriority::Normal,
    TaskPriority::High,
    TaskPriority::Urgent,
];

/// Run `count` analysis tasks of `steps` steps each, then shut down
pub async fn run(config: EngineConfig, count: usize, steps: u32) -> anyhow::Result<()> {
    println!("Insight - Running {} tasks on {} workers\n", count, config.max_workers);

    let service = Arc::new(TaskService::start(config)?);
    let mut task_ids = Vec::with_capacity(count + 1);

    for i in 0..count {
        let request = TaskRequest::new(move |args, progress| {
            let steps: u32 = args.kwarg_as("steps")?;
            let mut total = 0u64;
            for step in 1..=steps {
                if progress.is_canceled() {
                    anyhow::bail!("stopped at step {}", step);
                }
                total += (step as u64).pow(2);
                std::thread::sleep(Duration::from_millis(50));
                progress.update(
                    step as f64 * 100.0 / steps as f64,
                    format!("step {}/{}", step, steps),
                );
            }
            Ok(json!({ "batch": i, "sumOfSquares": total }))
        })
        .with_kwarg("steps", steps.max(1))
        .with_priority(PRIORITIES[i % PRIORITIES.len()])
        .with_metadata("kind", "analysis")
        .on_error(|snapshot, error| {
            warn!("Task {} failed: {}", snapshot.task_id.short(), error);
        });

        task_ids.push(service.submit(request)?);
    }

    // One task with bad input to show failure handling
    let broken = service.submit(
        TaskRequest::new(|args, _| {
            let column: f64 = args.kwarg_as("column")?;
            Ok(json!(column))
        })
        .with_kwarg("column", "not a number")
        .with_metadata("kind", "validation"),
    )?;
    task_ids.push(broken);

    // Show cancellation on the last analysis task
    if count > 1 {
        let last = task_ids[count - 1];
        if service.cancel(last) {
            info!("Canceled task {}", last.short());
        }
    }

    // Progress loop
    loop {
        let active = service.list_active();
        if active.is_empty() {
            break;
        }
        for task in &active {
            if task.status == TaskStatus::Running {
                println!("[{}] {:>3}% {}", task.task_id.short(), task.progress, task.message);
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    println!();
    for task_id in &task_ids {
        let snapshot = service.get_status(*task_id)?;
        let result = match service.get_result(*task_id) {
            Ok(value) => value,
            Err(e) => json!({ "error": e.to_string(), "httpStatus": e.http_status() }),
        };
        println!(
            "{}",
            json!({
                "taskId": snapshot.task_id,
                "status": snapshot.status,
                "priority": snapshot.priority,
                "executionTime": snapshot.execution_time,
                "waitTime": snapshot.wait_time,
                "result": result,
            })
        );
    }

    service.shutdown(true).await;
    println!("\n{}", serde_json::to_string_pretty(&service.stats())?);

    Ok(())
}
