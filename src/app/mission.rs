use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::spawn_blocking;
use tracing::{info, warn};

use crate::app::adb::device::MemoryProbe;
use crate::app::error::AppError;
use crate::app::sampler::{Sampler, SamplerConfig, SamplerSummary};
use crate::app::store::SampleStore;

/// Plays named audio cues during replay. Actual playback is a host concern;
/// the default implementation just announces the cue.
pub trait CuePlayer: Send + Sync {
    fn play(&self, cue: &str);
}

pub struct LogCuePlayer;

impl CuePlayer for LogCuePlayer {
    fn play(&self, cue: &str) {
        info!(cue = %cue, "audio cue");
    }
}

/// Mission file shape as written by test engineers. Step kinds are free-form
/// strings on disk and are narrowed during compilation.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawMission {
    package: Option<String>,
    loop_count: Option<u32>,
    steps: Option<Vec<RawStep>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawStep {
    #[serde(default)]
    name: String,
    action: Option<String>,
    #[serde(default)]
    values: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    params: HashMap<String, String>,
}

/// Closed set of things a step can do. Anything else in the file becomes a
/// skipped step, never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    UiAction { input_args: Vec<String> },
    Sleep { seconds: f64 },
    AudioCue { cue: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissionStep {
    pub name: String,
    pub kind: Option<StepKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mission {
    pub package: String,
    pub loop_count: u32,
    pub steps: Vec<MissionStep>,
}

fn classify(raw: &RawStep) -> Option<StepKind> {
    match raw.action.as_deref()?.trim() {
        "ui_action" | "ui-action" => {
            if raw.values.is_empty() {
                return None;
            }
            Some(StepKind::UiAction {
                input_args: raw.values.clone(),
            })
        }
        "sleep" => {
            let seconds = raw.values.first()?.parse::<f64>().ok()?;
            // Rejects NaN, negatives, and values too large for a Duration.
            Duration::try_from_secs_f64(seconds).ok()?;
            Some(StepKind::Sleep { seconds })
        }
        "audio_cue" | "audio-cue" => Some(StepKind::AudioCue {
            cue: raw.values.first().cloned().unwrap_or_default(),
        }),
        _ => None,
    }
}

pub fn load_mission(path: &Path, trace_id: &str) -> Result<Mission, AppError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| AppError::validation(format!("Failed to read mission: {err}"), trace_id))?;
    let parsed: RawMission = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse mission: {err}"), trace_id))?;
    compile_mission(parsed, trace_id)
}

fn compile_mission(raw: RawMission, trace_id: &str) -> Result<Mission, AppError> {
    let package = raw
        .package
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| AppError::validation("Mission is missing `package`", trace_id))?;
    let loop_count = raw
        .loop_count
        .ok_or_else(|| AppError::validation("Mission is missing `loop_count`", trace_id))?;
    if loop_count == 0 {
        return Err(AppError::validation("Mission `loop_count` must be >= 1", trace_id));
    }
    let raw_steps = raw
        .steps
        .filter(|steps| !steps.is_empty())
        .ok_or_else(|| AppError::validation("Mission is missing `steps`", trace_id))?;

    let steps = raw_steps
        .iter()
        .map(|raw| MissionStep {
            name: raw.name.clone(),
            kind: classify(raw),
        })
        .collect();
    Ok(Mission {
        package,
        loop_count,
        steps,
    })
}

/// Replays the mission while sampling runs in the background. Whatever
/// happens during replay, the sampler is stopped and fully drained before
/// this returns.
pub async fn run_mission(
    probe: Arc<dyn MemoryProbe>,
    store: SampleStore,
    mission: &Mission,
    campaign: &str,
    interval: Duration,
    output_root: PathBuf,
    cues: Arc<dyn CuePlayer>,
    trace_id: &str,
) -> Result<SamplerSummary, AppError> {
    let config = SamplerConfig {
        package: mission.package.clone(),
        campaign: campaign.to_string(),
        interval,
        output_root,
    };
    let sampler = Sampler::start(Arc::clone(&probe), store, config, trace_id).await?;

    let replay_result = replay(&probe, mission, &cues, trace_id).await;
    let stop_result = sampler.stop().await;

    replay_result?;
    stop_result
}

async fn replay(
    probe: &Arc<dyn MemoryProbe>,
    mission: &Mission,
    cues: &Arc<dyn CuePlayer>,
    trace_id: &str,
) -> Result<(), AppError> {
    for round in 1..=mission.loop_count {
        info!(trace_id = %trace_id, round, total = mission.loop_count, "mission round");
        for step in &mission.steps {
            let Some(kind) = &step.kind else {
                warn!(trace_id = %trace_id, step = %step.name, "unknown step kind, skipping");
                continue;
            };
            match kind {
                StepKind::UiAction { input_args } => {
                    let probe = Arc::clone(probe);
                    let args = input_args.clone();
                    let dispatched = spawn_blocking(move || probe.ui_action(&args))
                        .await
                        .map_err(|err| {
                            AppError::system(format!("Replay task failed: {err}"), trace_id)
                        })?;
                    if !dispatched {
                        warn!(trace_id = %trace_id, step = %step.name, "ui action was not applied");
                    }
                }
                StepKind::Sleep { seconds } => match Duration::try_from_secs_f64(*seconds) {
                    Ok(delay) => tokio::time::sleep(delay).await,
                    Err(_) => {
                        warn!(trace_id = %trace_id, step = %step.name, "sleep duration out of range, skipping");
                    }
                },
                StepKind::AudioCue { cue } => {
                    cues.play(cue);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::store::SampleStore;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn raw_step(action: Option<&str>, values: &[&str]) -> RawStep {
        RawStep {
            name: "step".to_string(),
            action: action.map(|a| a.to_string()),
            values: values.iter().map(|v| v.to_string()).collect(),
            params: HashMap::new(),
        }
    }

    #[test]
    fn classifies_known_step_kinds() {
        assert_eq!(
            classify(&raw_step(Some("ui_action"), &["tap", "540", "1200"])),
            Some(StepKind::UiAction {
                input_args: vec!["tap".to_string(), "540".to_string(), "1200".to_string()]
            })
        );
        assert_eq!(
            classify(&raw_step(Some("sleep"), &["1.5"])),
            Some(StepKind::Sleep { seconds: 1.5 })
        );
        assert_eq!(
            classify(&raw_step(Some("audio_cue"), &["start"])),
            Some(StepKind::AudioCue {
                cue: "start".to_string()
            })
        );
    }

    #[test]
    fn unknown_or_malformed_steps_become_skips() {
        assert_eq!(classify(&raw_step(None, &["x"])), None);
        assert_eq!(classify(&raw_step(Some("teleport"), &["x"])), None);
        assert_eq!(classify(&raw_step(Some("ui_action"), &[])), None);
        assert_eq!(classify(&raw_step(Some("sleep"), &["soon"])), None);
        assert_eq!(classify(&raw_step(Some("sleep"), &["-1"])), None);
        assert_eq!(classify(&raw_step(Some("sleep"), &["nan"])), None);
        // Parses as a valid f64 but overflows Duration.
        assert_eq!(classify(&raw_step(Some("sleep"), &["1e20"])), None);
    }

    #[tokio::test]
    async fn oversized_sleep_is_skipped_and_still_drains() {
        let dir = TempDir::new().expect("tmp");
        let store = SampleStore::open(&dir.path().join("samples.db"), "t").expect("store");
        let probe = Arc::new(ScriptedDevice {
            ui_calls: Mutex::new(Vec::new()),
        });
        // A hand-built step carrying a Duration-overflowing value must be
        // skipped during replay, not panic past the sampler drain.
        let mission = Mission {
            package: "com.example.app".to_string(),
            loop_count: 1,
            steps: vec![MissionStep {
                name: "forever".to_string(),
                kind: Some(StepKind::Sleep { seconds: 1e20 }),
            }],
        };

        let summary = run_mission(
            Arc::clone(&probe) as Arc<dyn MemoryProbe>,
            store,
            &mission,
            "mission-test",
            Duration::from_millis(10),
            dir.path().to_path_buf(),
            Arc::new(LogCuePlayer),
            "t",
        )
        .await
        .expect("mission should complete");
        assert!(summary.samples_inserted >= 1);
    }

    #[test]
    fn load_mission_round_trips_a_file() {
        let dir = TempDir::new().expect("tmp");
        let path = dir.path().join("mission.json");
        std::fs::write(
            &path,
            r#"{
                "package": "com.example.app",
                "loop_count": 2,
                "steps": [
                    {"name": "open", "action": "ui_action", "values": ["tap", "10", "10"]},
                    {"name": "settle", "action": "sleep", "values": ["0.5"]},
                    {"name": "future", "action": "hologram", "values": ["?"]}
                ]
            }"#,
        )
        .expect("write mission");
        let mission = load_mission(&path, "t").expect("mission");
        assert_eq!(mission.package, "com.example.app");
        assert_eq!(mission.loop_count, 2);
        assert_eq!(mission.steps.len(), 3);
        assert!(mission.steps[0].kind.is_some());
        assert!(mission.steps[2].kind.is_none());
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        let err = compile_mission(RawMission::default(), "t").unwrap_err();
        assert_eq!(err.code, "ERR_VALIDATION");
        assert!(err.error.contains("package"));

        let err = compile_mission(
            RawMission {
                package: Some("com.example.app".to_string()),
                loop_count: Some(0),
                steps: Some(vec![raw_step(Some("sleep"), &["1"])]),
            },
            "t",
        )
        .unwrap_err();
        assert!(err.error.contains("loop_count"));
    }

    struct ScriptedDevice {
        ui_calls: Mutex<Vec<Vec<String>>>,
    }

    impl MemoryProbe for ScriptedDevice {
        fn identity(&self) -> &str {
            "FAKE-SERIAL"
        }

        fn resolve_process_ids(&self, _package: &str) -> BTreeMap<String, String> {
            let mut processes = BTreeMap::new();
            processes.insert("77".to_string(), "com.example.app".to_string());
            processes
        }

        fn uid_of(&self, _package: &str) -> Option<String> {
            Some("10042".to_string())
        }

        fn foreground_activity(&self) -> Option<String> {
            Some("MainActivity".to_string())
        }

        fn oom_adjustment(&self, _pid: &str) -> Option<String> {
            Some("0".to_string())
        }

        fn resident_set_kb(&self, _pid: &str) -> Option<String> {
            Some("10240".to_string())
        }

        fn raw_memory_dump(&self, _pid: &str) -> Option<String> {
            Some(
                "\
** MEMINFO in pid 77 [com.example.app] **
  Native Heap     1024
        TOTAL    10240 0 0 0 0

 App Summary
            Graphics:     1024
           TOTAL PSS:     8192            TOTAL RSS:    10240       TOTAL SWAP PSS:        0
"
                .to_string(),
            )
        }

        fn package_installed(&self, _package: &str) -> bool {
            true
        }

        fn ui_action(&self, args: &[String]) -> bool {
            self.ui_calls
                .lock()
                .expect("ui calls lock")
                .push(args.to_vec());
            true
        }
    }

    struct RecordingCues {
        played: Mutex<Vec<String>>,
    }

    impl CuePlayer for RecordingCues {
        fn play(&self, cue: &str) {
            self.played.lock().expect("cues lock").push(cue.to_string());
        }
    }

    #[tokio::test]
    async fn mission_replay_samples_and_drains() {
        let dir = TempDir::new().expect("tmp");
        let store = SampleStore::open(&dir.path().join("samples.db"), "t").expect("store");
        let probe = Arc::new(ScriptedDevice {
            ui_calls: Mutex::new(Vec::new()),
        });
        let cues = Arc::new(RecordingCues {
            played: Mutex::new(Vec::new()),
        });
        let mission = Mission {
            package: "com.example.app".to_string(),
            loop_count: 2,
            steps: vec![
                MissionStep {
                    name: "tap".to_string(),
                    kind: Some(StepKind::UiAction {
                        input_args: vec!["tap".to_string(), "10".to_string(), "10".to_string()],
                    }),
                },
                MissionStep {
                    name: "settle".to_string(),
                    kind: Some(StepKind::Sleep { seconds: 0.02 }),
                },
                MissionStep {
                    name: "chime".to_string(),
                    kind: Some(StepKind::AudioCue {
                        cue: "round-done".to_string(),
                    }),
                },
                MissionStep {
                    name: "mystery".to_string(),
                    kind: None,
                },
            ],
        };

        let summary = run_mission(
            Arc::clone(&probe) as Arc<dyn MemoryProbe>,
            store,
            &mission,
            "mission-test",
            Duration::from_millis(10),
            dir.path().to_path_buf(),
            cues.clone(),
            "t",
        )
        .await
        .expect("mission");

        assert!(summary.samples_inserted >= 1);
        assert_eq!(probe.ui_calls.lock().expect("lock").len(), 2);
        assert_eq!(
            cues.played.lock().expect("lock").as_slice(),
            ["round-done", "round-done"]
        );

        let store = SampleStore::open(&dir.path().join("samples.db"), "t").expect("store");
        store.ensure_schema().expect("schema");
        assert_eq!(
            store.session_row_count(&summary.session).expect("count"),
            summary.samples_inserted
        );
    }
}
