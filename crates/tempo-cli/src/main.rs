use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

use tempo_core::{
    RecurringTask, Schedule, Scheduler, SchedulerConfig, SchedulerError, TaskBody, TaskContext,
    TaskError, TaskRecord, TaskRegistry, TaskSet, TaskState, TaskType,
};

#[derive(Debug, Deserialize)]
struct HelloPayload {
    name: String,
}

struct HelloTask {
    name: String,
}

#[async_trait]
impl TaskBody for HelloTask {
    async fn run(&self, ctx: TaskContext) -> Result<TaskState, TaskError> {
        if self.name.is_empty() {
            return Err(TaskError::InvalidPayload("name is empty".to_string()));
        }
        info!(task_id = %ctx.task_id(), "hello, {}!", self.name);
        Ok(TaskState::CompletedSuccessfully)
    }
}

#[derive(Debug, Deserialize)]
struct ReportPayload {
    steps: u32,
}

/// 1 ステップごとに割り込みを確認する長めのタスク
struct ReportTask {
    steps: u32,
}

#[async_trait]
impl TaskBody for ReportTask {
    async fn run(&self, mut ctx: TaskContext) -> Result<TaskState, TaskError> {
        let task_id = ctx.task_id().clone();
        for step in 1..=self.steps {
            tokio::select! {
                interruption = ctx.interrupted() => {
                    return Err(TaskError::Interrupted(interruption.reason));
                }
                _ = sleep(Duration::from_millis(200)) => {
                    info!(task_id = %task_id, step, steps = self.steps, "report step done");
                }
            }
        }
        Ok(TaskState::CompletedSuccessfully)
    }

    fn abort(&self, state: TaskState, reason: &str) {
        warn!(%state, reason, "report aborted");
    }
}

fn load_config() -> anyhow::Result<SchedulerConfig> {
    let config = match std::env::var_os("TEMPO_CONFIG") {
        Some(path) => {
            let path = PathBuf::from(path);
            SchedulerConfig::load(&path)
                .with_context(|| format!("loading {}", path.display()))?
        }
        None => SchedulerConfig::default().allow("hello").allow("report"),
    };
    Ok(config)
}

fn registry() -> anyhow::Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    registry.register_typed(TaskType::new("hello"), |p: HelloPayload| HelloTask { name: p.name })?;
    registry.register_typed(TaskType::new("report"), |p: ReportPayload| ReportTask {
        steps: p.steps,
    })?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // (A) 設定とレジストリを用意し、バッキングファイルから復元
    let config = load_config()?;
    let scheduler = Scheduler::builder(config)
        .registry(registry()?)
        .open()
        .await
        .context("opening scheduler")?;
    info!(summary = ?scheduler.replay_summary(), "replayed backing store");

    // (B) control loop を起動
    scheduler.start().await?;

    // (C) 毎分のハートビート（再起動後は既に登録済み）
    let heartbeat = RecurringTask::new(
        "heartbeat",
        Schedule::parse("* * * * *")?,
        TaskType::new("hello"),
        serde_json::json!({ "name": "heartbeat" }),
    );
    match scheduler.add_recurring(heartbeat, true).await {
        Ok(_) | Err(SchedulerError::DuplicateRecurringId(_)) => {}
        Err(e) => return Err(e.into()),
    }

    // (D) 依存関係つきのタスク: greet が成功したら report
    let greet = scheduler
        .submit(TaskRecord::new(
            scheduler.new_task_id(),
            TaskType::new("hello"),
            serde_json::json!({ "name": "tempo" }),
        ))
        .await?;
    let report = scheduler
        .submit(
            TaskRecord::new(
                scheduler.new_task_id(),
                TaskType::new("report"),
                serde_json::json!({ "steps": 5 }),
            )
            .depends_on(greet.id.clone()),
        )
        .await?;
    info!(greet = %greet.id, report = %report.id, "submitted dependency chain");

    // (E) report が終わるか Ctrl-C まで待つ
    let wait = async {
        loop {
            if scheduler.task_location(&report.id).await == Some(TaskSet::Completed) {
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
    };
    tokio::select! {
        _ = wait => {}
        _ = tokio::signal::ctrl_c() => warn!("interrupted"),
    }

    for task in [&greet.id, &report.id] {
        if let Some(t) = scheduler.get_task(task).await {
            info!(task_id = %t.id, state = %t.state, "final state");
        }
    }
    info!(counts = ?scheduler.counts().await, "scheduler counts");

    // (F) 実行中のタスクを止めてから終了
    scheduler
        .interrupt_running(TaskState::StoppedByShutdown, "shutting down", true)
        .await;
    scheduler.stop().await;
    Ok(())
}
