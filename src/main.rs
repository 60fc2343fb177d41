use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use droidmem_lib::app::adb::device::DeviceBridge;
use droidmem_lib::app::adb::locator::{resolve_adb_program, validate_adb_program};
use droidmem_lib::app::config::{clamp_interval_ms, load_config};
use droidmem_lib::app::error::AppError;
use droidmem_lib::app::logging::init_logging;
use droidmem_lib::app::mission::{load_mission, run_mission, LogCuePlayer};
use droidmem_lib::app::sampler::{Sampler, SamplerConfig, SamplerSummary};
use droidmem_lib::app::store::SampleStore;

#[derive(Debug, Clone, Default)]
struct Args {
    serial: Option<String>,
    package: Option<String>,
    campaign: Option<String>,
    interval_ms: Option<u64>,
    mission: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    adb_path: Option<String>,
}

const USAGE: &str = "\
droidmem - memory telemetry for Android apps over adb

USAGE:
  droidmem --package <pkg> [options]            sample until Ctrl-C
  droidmem --mission <file> [options]           replay a mission while sampling

OPTIONS:
  --serial <serial>       device serial (default: $ANDROID_SERIAL)
  --package <pkg>         target package (ignored with --mission)
  --campaign <label>      campaign label for the manifest (default: default)
  --interval-ms <n>       sample interval, clamped to [500, 60000]
  --mission <file>        mission JSON to replay
  --out <dir>             output root for sessions and manifests
  --db <path>             sample store path
  --adb <path>            adb executable";

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        serial: std::env::var("ANDROID_SERIAL")
            .ok()
            .filter(|s| !s.trim().is_empty()),
        ..Args::default()
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value_for = |flag: &str| {
            it.next()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--serial" => args.serial = Some(value_for("--serial")?),
            "--package" => args.package = Some(value_for("--package")?),
            "--campaign" => args.campaign = Some(value_for("--campaign")?),
            "--interval-ms" => {
                let raw = value_for("--interval-ms")?;
                let parsed = raw
                    .parse::<u64>()
                    .map_err(|_| format!("--interval-ms must be a number, got {raw}"))?;
                args.interval_ms = Some(parsed);
            }
            "--mission" => args.mission = Some(PathBuf::from(value_for("--mission")?)),
            "--out" => args.out_dir = Some(PathBuf::from(value_for("--out")?)),
            "--db" => args.db_path = Some(PathBuf::from(value_for("--db")?)),
            "--adb" => args.adb_path = Some(value_for("--adb")?),
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

fn print_summary(summary: &SamplerSummary) {
    println!("session {} closed", summary.session);
    println!("  samples inserted:   {}", summary.samples_inserted);
    println!("  iterations skipped: {}", summary.iterations_skipped);
    println!("  elapsed:            {:.1}s", summary.elapsed_secs);
    println!("  directory:          {}", summary.session_dir);
}

async fn run(trace_id: &str) -> Result<(), AppError> {
    let args =
        parse_args().map_err(|err| AppError::validation(format!("{err}\n\n{USAGE}"), trace_id))?;
    let config = load_config()?;

    let adb_program = resolve_adb_program(args.adb_path.as_deref().unwrap_or(&config.adb_path));
    validate_adb_program(&adb_program, trace_id)?;

    let serial = args
        .serial
        .ok_or_else(|| AppError::validation("no device serial given (--serial)", trace_id))?;

    let interval_ms = clamp_interval_ms(args.interval_ms.or(Some(config.sampling.interval_ms)));
    let interval = Duration::from_millis(interval_ms);
    let output_root = args
        .out_dir
        .unwrap_or_else(|| config.output_root_or_default());
    let db_path = args.db_path.unwrap_or_else(|| config.db_path_or_default());
    let campaign = args.campaign.unwrap_or_else(|| "default".to_string());

    let probe = Arc::new(DeviceBridge::new(
        adb_program,
        serial,
        Duration::from_secs(config.sampling.command_timeout_sec),
        trace_id,
    ));
    let store = SampleStore::open(&db_path, trace_id)?;

    let summary = if let Some(mission_path) = args.mission {
        let mission = load_mission(&mission_path, trace_id)?;
        run_mission(
            probe,
            store,
            &mission,
            &campaign,
            interval,
            output_root,
            Arc::new(LogCuePlayer),
            trace_id,
        )
        .await?
    } else {
        let package = args
            .package
            .ok_or_else(|| AppError::validation("no target package given (--package)", trace_id))?;
        let sampler = Sampler::start(
            probe,
            store,
            SamplerConfig {
                package,
                campaign,
                interval,
                output_root,
            },
            trace_id,
        )
        .await?;

        tokio::signal::ctrl_c()
            .await
            .map_err(|err| AppError::system(format!("Failed to wait for Ctrl-C: {err}"), trace_id))?;
        eprintln!("interrupt received, draining...");
        sampler.stop().await?
    };

    print_summary(&summary);
    Ok(())
}

#[tokio::main]
async fn main() {
    init_logging();
    let trace_id = Uuid::new_v4().to_string();
    if let Err(err) = run(&trace_id).await {
        eprintln!("droidmem: {err}");
        std::process::exit(1);
    }
}
