//! Cron scheduler service: schedule lifecycle and firing.

mod common;

use common::*;
use serde_json::json;
use stepline::{
    config::SchedulerConfig,
    queue::{EnqueueReceipt, JobQueue},
    runtime::{handlers::mock::MockHandler, Scheduler, SchedulerError},
};

async fn scheduler() -> (Scheduler, std::sync::Arc<MockHandler>) {
    let (engine, mock) = engine_with(MockHandler::new());
    let queue = JobQueue::direct(engine);
    queue.register_workflow(workflow("report", vec![probe("probe")], vec![]));
    let scheduler = Scheduler::new(queue, &SchedulerConfig::default()).await.unwrap();
    (scheduler, mock)
}

#[tokio::test]
async fn schedule_registers_an_active_job() {
    let (scheduler, _mock) = scheduler().await;

    let job = scheduler.schedule("report", "0 9 * * 1-5", None).await.unwrap();

    assert!(job.is_active);
    assert_eq!(job.workflow_id, "report");
    assert_eq!(job.timezone, "UTC");
    assert!(job.last_run_at.is_none());
    assert!(job.next_run_at.unwrap() > chrono::Utc::now());
    assert_eq!(scheduler.list().await.len(), 1);
    let serialized = serde_json::to_value(&job).unwrap();
    assert_eq!(serialized["cronExpression"], "0 9 * * 1-5");
    assert_eq!(serialized["isActive"], true);
}

#[tokio::test]
async fn named_timezone_is_kept() {
    let (scheduler, _mock) = scheduler().await;

    let job = scheduler
        .schedule("report", "30 8 * * *", Some("America/New_York"))
        .await
        .unwrap();

    assert_eq!(job.timezone, "America/New_York");
}

#[tokio::test]
async fn invalid_input_registers_nothing() {
    let (scheduler, _mock) = scheduler().await;

    let bad_cron = scheduler.schedule("report", "61 * * * *", None).await.unwrap_err();
    let bad_tz = scheduler.schedule("report", "* * * * *", Some("Mars/Olympus_Mons")).await.unwrap_err();
    let no_workflow = scheduler.schedule("ghost", "* * * * *", None).await.unwrap_err();
    let bad_cron_no_workflow = scheduler.schedule("ghost", "not a cron", None).await.unwrap_err();
    let bad_tz_no_workflow = scheduler.schedule("ghost", "* * * * *", Some("Nowhere/Land")).await.unwrap_err();

    assert!(matches!(bad_cron, SchedulerError::InvalidCronExpression(_)));
    assert!(matches!(bad_tz, SchedulerError::InvalidTimezone(_)));
    assert!(matches!(no_workflow, SchedulerError::WorkflowNotFound(id) if id == "ghost"));
    assert!(matches!(bad_cron_no_workflow, SchedulerError::InvalidCronExpression(_)));
    assert!(matches!(bad_tz_no_workflow, SchedulerError::InvalidTimezone(_)));
    assert!(scheduler.list().await.is_empty());
}

#[tokio::test]
async fn stop_and_resume_keep_the_same_job() {
    let (scheduler, _mock) = scheduler().await;
    let job = scheduler.schedule("report", "*/5 * * * *", None).await.unwrap();

    let stopped = scheduler.stop(&job.id).await.unwrap();
    assert!(!stopped.is_active);
    assert!(stopped.next_run_at.is_none());

    let resumed = scheduler.resume(&job.id).await.unwrap();
    assert_eq!(resumed.id, job.id);
    assert!(resumed.is_active);
    assert!(resumed.next_run_at.is_some());

    // Resuming an active job is a no-op
    let again = scheduler.resume(&job.id).await.unwrap();
    assert_eq!(again.next_run_at, resumed.next_run_at);
}

#[tokio::test]
async fn fire_enqueues_with_schedule_input() {
    let (scheduler, _mock) = scheduler().await;
    let job = scheduler.schedule("report", "0 0 1 1 *", None).await.unwrap();

    let receipt = scheduler.fire(&job.id).await.unwrap();

    let EnqueueReceipt::Completed(result) = receipt else {
        panic!("direct queue completes inline");
    };
    let output = result.output.unwrap();
    assert_eq!(output["mode"], "schedule");
    assert_eq!(output["input"]["trigger"], "schedule");
    assert_eq!(output["input"]["workflowId"], "report");
    assert_eq!(output["input"]["scheduleId"], json!(job.id));
    assert!(output["input"]["timestamp"].is_string());

    let after = scheduler.get(&job.id).await.unwrap();
    assert!(after.last_run_at.is_some());
    assert!(after.next_run_at.is_some());
}

#[tokio::test]
async fn stopped_job_does_not_fire() {
    let (scheduler, mock) = scheduler().await;
    let job = scheduler.schedule("report", "* * * * *", None).await.unwrap();
    scheduler.stop(&job.id).await.unwrap();

    assert!(scheduler.fire(&job.id).await.is_none());
    assert!(mock.calls().is_empty());
    assert!(scheduler.get(&job.id).await.unwrap().last_run_at.is_none());
}

#[tokio::test]
async fn firing_for_a_removed_workflow_still_advances_bookkeeping() {
    let (engine, mock) = engine_with(MockHandler::new());
    let queue = JobQueue::direct(engine);
    queue.register_workflow(workflow("report", vec![probe("probe")], vec![]));
    let scheduler = Scheduler::new(queue.clone(), &SchedulerConfig::default()).await.unwrap();
    let job = scheduler.schedule("report", "0 12 * * *", None).await.unwrap();

    assert!(queue.engine().workflows().remove("report"));
    assert!(scheduler.fire(&job.id).await.is_none());

    let after = scheduler.get(&job.id).await.unwrap();
    assert!(after.is_active);
    assert!(after.last_run_at.is_some());
    assert!(after.next_run_at.is_some());
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn remove_deletes_the_record() {
    let (scheduler, _mock) = scheduler().await;
    let job = scheduler.schedule("report", "0 * * * *", None).await.unwrap();

    scheduler.remove(&job.id).await.unwrap();

    assert!(scheduler.get(&job.id).await.is_none());
    assert!(scheduler.fire(&job.id).await.is_none());
    assert!(matches!(
        scheduler.remove(&job.id).await,
        Err(SchedulerError::JobNotFound(_))
    ));
    assert!(matches!(scheduler.stop("nope").await, Err(SchedulerError::JobNotFound(_))));
}

#[tokio::test]
async fn list_is_ordered_by_workflow() {
    let (scheduler, _mock) = scheduler().await;
    scheduler.register_workflow(workflow("audit", vec![probe("probe")], vec![]));

    scheduler.schedule("report", "0 1 * * *", None).await.unwrap();
    scheduler.schedule("audit", "0 2 * * *", None).await.unwrap();

    let workflows: Vec<String> = scheduler.list().await.into_iter().map(|j| j.workflow_id).collect();
    assert_eq!(workflows, vec!["audit", "report"]);
}

#[tokio::test]
async fn validate_cron_reports_next_run() {
    let schedule = Scheduler::validate_cron("15 10 * * *").unwrap();
    let now = chrono::Utc::now();
    let next = schedule.next_after(now, chrono_tz::UTC).unwrap();

    assert!(next > now);
    assert!(Scheduler::validate_cron("not a cron").is_err());
}
