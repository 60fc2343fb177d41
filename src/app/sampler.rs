use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use serde::Serialize;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::adb::device::MemoryProbe;
use crate::app::error::AppError;
use crate::app::meminfo::parse_memory_dump;
use crate::app::session::{register_session, Session};
use crate::app::snapshot::{
    is_foreground, kb_to_mb, MemorySnapshot, PidSnapshot, Remark, SnapshotAccumulator,
};
use crate::app::store::SampleStore;

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub package: String,
    pub campaign: String,
    pub interval: Duration,
    pub output_root: PathBuf,
}

/// Final accounting for one session, written to the session log and
/// returned to the caller after the drain completes.
#[derive(Debug, Clone, Serialize)]
pub struct SamplerSummary {
    pub session: String,
    pub session_dir: String,
    pub samples_inserted: u64,
    pub iterations_skipped: u64,
    pub elapsed_secs: f64,
}

/// Session-scoped sampling lifecycle: IDLE -> SAMPLING -> DRAINING -> CLOSED.
///
/// `start` performs the preconditions and spawns the loop task; `stop`
/// raises the cancellation token and then awaits the task, so an iteration
/// already in flight always finishes and persists before teardown.
#[derive(Debug)]
pub struct Sampler {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<Result<SamplerSummary, AppError>>,
    trace_id: String,
    session_id: String,
}

impl Sampler {
    pub async fn start(
        probe: Arc<dyn MemoryProbe>,
        store: SampleStore,
        config: SamplerConfig,
        trace_id: &str,
    ) -> Result<Self, AppError> {
        let installed = {
            let probe = Arc::clone(&probe);
            let package = config.package.clone();
            spawn_blocking(move || probe.package_installed(&package))
                .await
                .map_err(|err| {
                    AppError::system(format!("Device task failed: {err}"), trace_id)
                })?
        };
        if !installed {
            return Err(AppError::validation(
                format!(
                    "Package {} is not installed on device {}",
                    config.package,
                    probe.identity()
                ),
                trace_id,
            ));
        }

        store.ensure_schema()?;
        let mut session = Session::create(&config.output_root, trace_id)?;
        register_session(
            &config.output_root,
            &config.campaign,
            probe.identity(),
            session.id(),
            trace_id,
        )?;
        session.log(&format!(
            "sampling {} on {} every {}ms (campaign {})",
            config.package,
            probe.identity(),
            config.interval.as_millis(),
            config.campaign
        ));
        info!(
            trace_id = %trace_id,
            session = %session.id(),
            package = %config.package,
            "sampling started"
        );

        // uid is stable for an installed package, so it is resolved once.
        let uid = {
            let probe = Arc::clone(&probe);
            let package = config.package.clone();
            spawn_blocking(move || probe.uid_of(&package))
                .await
                .map_err(|err| {
                    AppError::system(format!("Device task failed: {err}"), trace_id)
                })?
                .unwrap_or_else(|| "unknown".to_string())
        };

        let cancel = CancellationToken::new();
        let session_id = session.id().to_string();
        let task = tokio::spawn(run_loop(
            probe,
            store,
            config,
            session,
            uid,
            cancel.clone(),
            trace_id.to_string(),
        ));
        Ok(Self {
            cancel,
            task,
            trace_id: trace_id.to_string(),
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Request drain and wait for it. Storage failures inside the loop
    /// surface here.
    pub async fn stop(self) -> Result<SamplerSummary, AppError> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|err| AppError::system(format!("Sampler task failed: {err}"), &self.trace_id))?
    }
}

async fn run_loop(
    probe: Arc<dyn MemoryProbe>,
    store: SampleStore,
    config: SamplerConfig,
    mut session: Session,
    uid: String,
    cancel: CancellationToken,
    trace_id: String,
) -> Result<SamplerSummary, AppError> {
    let started = Instant::now();
    let mut inserted = 0u64;
    let mut skipped = 0u64;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        // The iteration body has no cancellation points: once begun it runs
        // to completion, so a sample in flight at interrupt time is
        // persisted, not dropped.
        match sample_once(&probe, &config.package, &uid, &trace_id).await? {
            Some(snapshot) => {
                store.insert(session.id(), &config.campaign, &snapshot)?;
                inserted += 1;
                session.log(&format!(
                    "sample {inserted}: pss={} opss={} fg={} ({})",
                    snapshot.summary.pss,
                    snapshot.summary.opss,
                    snapshot.remark.foreground,
                    snapshot.remark.process_label
                ));
            }
            None => {
                skipped += 1;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }

    let summary = SamplerSummary {
        session: session.id().to_string(),
        session_dir: session.dir().display().to_string(),
        samples_inserted: inserted,
        iterations_skipped: skipped,
        elapsed_secs: started.elapsed().as_secs_f64(),
    };
    session.log(&format!(
        "closed: {} samples, {} skipped, {:.1}s elapsed",
        summary.samples_inserted, summary.iterations_skipped, summary.elapsed_secs
    ));
    info!(
        trace_id = %trace_id,
        session = %summary.session,
        samples = summary.samples_inserted,
        skipped = summary.iterations_skipped,
        "sampling closed"
    );
    Ok(summary)
}

/// One sampling iteration. `None` means a transient condition (no live
/// process, context unreadable, incomplete dump) and the loop carries on;
/// only task-dispatch failures are errors.
async fn sample_once(
    probe: &Arc<dyn MemoryProbe>,
    package: &str,
    uid: &str,
    trace_id: &str,
) -> Result<Option<MemorySnapshot>, AppError> {
    let processes = {
        let probe = Arc::clone(probe);
        let package = package.to_string();
        spawn_blocking(move || probe.resolve_process_ids(&package))
            .await
            .map_err(|err| AppError::system(format!("Device task failed: {err}"), trace_id))?
    };
    let Some(first_pid) = processes.keys().next().cloned() else {
        debug!(trace_id = %trace_id, package = %package, "process not running, skipping iteration");
        return Ok(None);
    };

    let adj_task = {
        let probe = Arc::clone(probe);
        let pid = first_pid.clone();
        spawn_blocking(move || probe.oom_adjustment(&pid))
    };
    let activity_task = {
        let probe = Arc::clone(probe);
        spawn_blocking(move || probe.foreground_activity())
    };
    let (adj, activity) = tokio::join!(adj_task, activity_task);
    let adj = adj
        .map_err(|err| AppError::system(format!("Device task failed: {err}"), trace_id))?;
    let activity = activity
        .map_err(|err| AppError::system(format!("Device task failed: {err}"), trace_id))?;
    let (Some(oom_adj), Some(activity)) = (adj, activity) else {
        debug!(trace_id = %trace_id, "adjustment or activity unreadable, skipping iteration");
        return Ok(None);
    };

    // Fan the dump and status reads out across all resolved pids at once,
    // two tasks per pid; the iteration completes when the slowest one does.
    let mut fetches = Vec::with_capacity(processes.len());
    for pid in processes.keys().cloned() {
        let dump_task = {
            let probe = Arc::clone(probe);
            let pid = pid.clone();
            spawn_blocking(move || {
                probe
                    .raw_memory_dump(&pid)
                    .map(|raw| parse_memory_dump(&raw))
                    .unwrap_or_default()
            })
        };
        let status_task = {
            let probe = Arc::clone(probe);
            spawn_blocking(move || {
                probe
                    .resident_set_kb(&pid)
                    .and_then(|kb| kb.parse::<f64>().ok())
                    .map(kb_to_mb)
                    .unwrap_or(0.0)
            })
        };
        fetches.push((dump_task, status_task));
    }

    let mut acc = SnapshotAccumulator::default();
    for (dump_task, status_task) in fetches {
        let (report, vm_size_mb) = tokio::join!(dump_task, status_task);
        let report = report
            .map_err(|err| AppError::system(format!("Device task failed: {err}"), trace_id))?;
        let vm_size_mb = vm_size_mb
            .map_err(|err| AppError::system(format!("Device task failed: {err}"), trace_id))?;
        acc.add(&PidSnapshot {
            categories: report.categories,
            summary: report.summary,
            vm_size_mb,
        });
    }

    let process_label = processes
        .iter()
        .map(|(pid, name)| format!("{pid}/{name}"))
        .collect::<Vec<_>>()
        .join(",");
    let remark = Remark {
        taken_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        uid: uid.to_string(),
        oom_adj: oom_adj.clone(),
        activity,
        foreground: is_foreground(&oom_adj),
        process_label,
    };

    let merged = acc.finish(remark);
    if merged.is_none() {
        warn!(trace_id = %trace_id, "incomplete snapshot discarded, skipping iteration");
    }
    Ok(merged)
}
