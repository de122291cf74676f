use crate::entities;
use crate::errors::EshError;
use crate::storage;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub const SWEEP_DEVICE_SESSIONS: &str = "sweep_device_sessions";
pub const CLEANUP_EXPIRED_SESSIONS: &str = "cleanup_expired_sessions";
pub const PRUNE_SECURITY_EVENTS: &str = "prune_security_events";

async fn run_job(db: &DatabaseConnection, job_name: &str) -> Result<u64, EshError> {
    match job_name {
        SWEEP_DEVICE_SESSIONS => {
            storage::cleanup_expired_device_sessions(db, Utc::now().timestamp()).await
        }
        CLEANUP_EXPIRED_SESSIONS => storage::cleanup_expired_sessions(db).await,
        PRUNE_SECURITY_EVENTS => {
            storage::prune_security_events(db, Utc::now().timestamp()).await
        }
        _ => Err(EshError::Other(format!("Unknown job name: {}", job_name))),
    }
}

/// Run a job once and record it in `job_executions`.
async fn run_tracked(db: &DatabaseConnection, job_name: &str) {
    info!("Running {} job", job_name);
    let execution_id = start_job_execution(db, job_name).await.ok();

    match run_job(db, job_name).await {
        Ok(count) => {
            info!(job = job_name, records = count, "Job completed");
            if let Some(id) = execution_id {
                let _ = complete_job_execution(db, id, true, None, Some(count as i64)).await;
            }
        }
        Err(e) => {
            error!(job = job_name, error = %e, "Job failed");
            if let Some(id) = execution_id {
                let _ = complete_job_execution(db, id, false, Some(e.to_string()), None).await;
            }
        }
    }
}

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(db: DatabaseConnection) -> Result<JobScheduler, EshError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| EshError::Other(format!("Failed to create job scheduler: {}", e)))?;

    // Device sessions are short-lived, so sweep every five minutes
    let schedules = [
        (SWEEP_DEVICE_SESSIONS, "0 */5 * * * *"),
        (CLEANUP_EXPIRED_SESSIONS, "0 0 * * * *"),
        (PRUNE_SECURITY_EVENTS, "0 30 3 * * *"),
    ];

    for (job_name, schedule) in schedules {
        let db_clone = db.clone();
        let job = Job::new_async(schedule, move |_uuid, _l| {
            let db = db_clone.clone();
            Box::pin(async move {
                run_tracked(&db, job_name).await;
            })
        })
        .map_err(|e| EshError::Other(format!("Failed to create {} job: {}", job_name, e)))?;

        sched
            .add(job)
            .await
            .map_err(|e| EshError::Other(format!("Failed to add {} job: {}", job_name, e)))?;
    }

    sched
        .start()
        .await
        .map_err(|e| EshError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!("Job scheduler started with {} jobs", schedules.len());

    Ok(sched)
}

/// Record the start of a job execution
pub async fn start_job_execution(db: &DatabaseConnection, job_name: &str) -> Result<i64, EshError> {
    use entities::job_execution;

    let execution = job_execution::ActiveModel {
        job_name: Set(job_name.to_string()),
        started_at: Set(Utc::now().timestamp()),
        completed_at: Set(None),
        success: Set(None),
        error_message: Set(None),
        records_processed: Set(None),
        ..Default::default()
    };

    let result = execution.insert(db).await?;
    Ok(result.id)
}

/// Record the completion of a job execution
pub async fn complete_job_execution(
    db: &DatabaseConnection,
    execution_id: i64,
    success: bool,
    error_message: Option<String>,
    records_processed: Option<i64>,
) -> Result<(), EshError> {
    use entities::job_execution::{Column, Entity};

    if let Some(execution) = Entity::find()
        .filter(Column::Id.eq(execution_id))
        .one(db)
        .await?
    {
        let mut active: entities::job_execution::ActiveModel = execution.into_active_model();
        active.completed_at = Set(Some(Utc::now().timestamp()));
        active.success = Set(Some(if success { 1 } else { 0 }));
        active.error_message = Set(error_message);
        active.records_processed = Set(records_processed);
        active.update(db).await?;
    }

    Ok(())
}

/// Run a job immediately, outside the schedule. Used by `esh-server run-job`.
pub async fn trigger_job_manually(db: &DatabaseConnection, job_name: &str) -> Result<u64, EshError> {
    info!("Manually triggering job: {}", job_name);
    let execution_id = start_job_execution(db, job_name).await?;

    match run_job(db, job_name).await {
        Ok(count) => {
            complete_job_execution(db, execution_id, true, None, Some(count as i64)).await?;
            Ok(count)
        }
        Err(e) => {
            complete_job_execution(db, execution_id, false, Some(e.to_string()), None).await?;
            Err(e)
        }
    }
}
