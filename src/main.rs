use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use wheel_odometry::calibration::{
    calibrate_sequence, calibrate_turnaround, calibrate_turnaround_bias, Calibration,
    CalibrationSequence,
};
use wheel_odometry::records::{load_json, save_json, CalibrationRecord, RecordingRecord};
use wheel_odometry::{InputWarning, KinematicTrace, OdometryConfig, ParameterVector, RateSeries};

#[derive(Parser, Debug)]
#[command(name = "odometry")]
#[command(about = "Wheelchair wheel odometry: trace recordings and calibrate wheel parameters", long_about = None)]
struct Args {
    /// JSON config; defaults apply to anything it leaves out
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Integrate a recording and print the trace
    Trace {
        /// Recording .json[.gz]
        recording: PathBuf,
        /// Calibration record holding the parameters
        #[arg(long)]
        params: PathBuf,
        /// Ignore any trace already stored in the recording
        #[arg(long, default_value_t = false)]
        recompute: bool,
    },
    /// Recompute a recording's stored trace with new parameters
    Refresh {
        recording: PathBuf,
        #[arg(long)]
        params: PathBuf,
        /// Write here instead of overwriting the recording
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Calibrate from a recorded structured sequence
    Sequence {
        /// Sequence .json[.gz]: list of named segments
        input: PathBuf,
        #[command(flatten)]
        save: SaveArgs,
    },
    /// Calibrate from one out-and-back recording
    Turnaround {
        recording: PathBuf,
        #[command(flatten)]
        save: SaveArgs,
    },
    /// Calibrate with bias terms from an out-and-back and a closed loop
    TurnaroundBias {
        recording: PathBuf,
        loop_recording: PathBuf,
        #[command(flatten)]
        save: SaveArgs,
    },
}

#[derive(clap::Args, Debug)]
struct SaveArgs {
    /// Write a calibration record here
    #[arg(long, requires_all = ["device", "name"])]
    output: Option<PathBuf>,
    /// Device the calibration belongs to
    #[arg(long)]
    device: Option<String>,
    /// Name stored with the calibration
    #[arg(long)]
    name: Option<String>,
}

#[derive(Serialize)]
struct TraceOutput {
    samples: usize,
    final_distance: f64,
    final_displacement: f64,
    final_heading_deg: f64,
    closure_error: f64,
    warnings: Vec<InputWarning>,
    trace: KinematicTrace,
}

fn load_params(path: &Path) -> Result<ParameterVector> {
    let params: ParameterVector =
        load_json(path).with_context(|| format!("reading parameters from {}", path.display()))?;
    params.validate()?;
    Ok(params)
}

fn load_recording(path: &Path) -> Result<RecordingRecord> {
    load_json(path).with_context(|| format!("reading recording {}", path.display()))
}

/// Raw rates of a recording, low-passed when the config asks for it
fn calibration_input(record: &RecordingRecord, config: &OdometryConfig) -> RateSeries {
    let raw = record.rates(false);
    match config.smoothing_cutoff_hz {
        Some(cutoff) => raw.smoothed(cutoff),
        None => raw,
    }
}

fn finish(calibration: Calibration, save: &SaveArgs, recordings: &[&RateSeries]) -> Result<()> {
    if let Some(output) = save.output.as_ref() {
        let record = CalibrationRecord::new(
            save.device.clone().unwrap_or_default(),
            save.name.clone().unwrap_or_default(),
            &calibration,
            recordings,
        )?;
        save_json(output, &record)?;
        log::info!("saved calibration record to {}", output.display());
    } else {
        calibration.accept(recordings)?;
    }
    println!("{}", serde_json::to_string_pretty(&calibration)?);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = OdometryConfig::load_or_default(args.config.as_deref())?;

    match args.command {
        Command::Trace {
            recording,
            params,
            recompute,
        } => {
            let params = load_params(&params)?;
            let record = load_recording(&recording)?;
            let integration = if recompute {
                params.trace(&record.rates(true))
            } else {
                record.trace(&params)
            };
            let trace = integration.trace;
            let output = TraceOutput {
                samples: trace.len(),
                final_distance: trace.final_distance(),
                final_displacement: trace.final_displacement(),
                final_heading_deg: trace.final_heading_deg(),
                closure_error: trace.closure_error(),
                warnings: integration.warnings,
                trace,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Refresh {
            recording,
            params,
            output,
        } => {
            let params = load_params(&params)?;
            let mut record = load_recording(&recording)?;
            let warnings = record.refresh(&params, config.smoothing_cutoff_hz);
            let target = output.unwrap_or(recording);
            save_json(&target, &record)?;
            log::info!("wrote {}", target.display());
            println!("{}", serde_json::to_string_pretty(&warnings)?);
        }
        Command::Sequence { input, save } => {
            let sequence: CalibrationSequence = load_json(&input)
                .with_context(|| format!("reading sequence {}", input.display()))?;
            let calibration =
                calibrate_sequence(&sequence, config.sequence, config.initial.sequence, &config.solver)?;
            let recordings: Vec<&RateSeries> = sequence.segments().iter().map(|s| &s.series).collect();
            finish(calibration, &save, &recordings)?;
        }
        Command::Turnaround { recording, save } => {
            let series = calibration_input(&load_recording(&recording)?, &config);
            let calibration = calibrate_turnaround(
                &series,
                config.turnaround,
                config.detector,
                config.initial.turnaround,
                &config.solver,
            )?;
            finish(calibration, &save, &[&series])?;
        }
        Command::TurnaroundBias {
            recording,
            loop_recording,
            save,
        } => {
            let turnaround = calibration_input(&load_recording(&recording)?, &config);
            let closed_loop = calibration_input(&load_recording(&loop_recording)?, &config);
            let calibration = calibrate_turnaround_bias(
                &turnaround,
                &closed_loop,
                config.turnaround,
                config.detector,
                config.initial.turnaround_bias,
                &config.solver,
            )?;
            finish(calibration, &save, &[&turnaround, &closed_loop])?;
        }
    }

    Ok(())
}
