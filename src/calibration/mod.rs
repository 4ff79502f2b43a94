//! Calibration of the integrator's physical constants
//!
//! Two families of reference maneuvers:
//! - a recorded multi-step [`CalibrationSequence`] with known leg lengths and
//!   turn angles ([`sequence`])
//! - a single out-and-back turnaround, optionally paired with a closed loop
//!   ([`turnaround`])

pub mod recorder;
pub mod sequence;
pub mod turnaround;

pub use recorder::{CalibrationRecorder, RecorderState};
pub use sequence::{calibrate_sequence, SequenceModel, SequenceTargets};
pub use turnaround::{
    calibrate_turnaround, calibrate_turnaround_bias, TurnWindowCache, TurnaroundBiasModel,
    TurnaroundModel, TurnaroundResiduals, TurnaroundTargets,
};

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::error::{OdometryError, Result};
use crate::solver::SolverReport;
use crate::turn_detect::TurnWindow;
use crate::types::{ParameterVector, RateSeries, SensorSample};

/// Fixed label set of calibration steps
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Start,
    Pause,
    Forward,
    TurnLeft,
    TurnRight,
    SetPosition,
    End,
}

impl SegmentKind {
    pub const ALL: [SegmentKind; 7] = [
        SegmentKind::Start,
        SegmentKind::Pause,
        SegmentKind::Forward,
        SegmentKind::TurnLeft,
        SegmentKind::TurnRight,
        SegmentKind::SetPosition,
        SegmentKind::End,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SegmentKind::Start => "start",
            SegmentKind::Pause => "pause",
            SegmentKind::Forward => "forward",
            SegmentKind::TurnLeft => "turnleft",
            SegmentKind::TurnRight => "turnright",
            SegmentKind::SetPosition => "setposition",
            SegmentKind::End => "end",
        }
    }

    /// Parse a step label such as `forward3` or `pause`; the trailing
    /// repetition number is ignored.
    pub fn from_label(label: &str) -> Option<Self> {
        let base = label.trim().trim_end_matches(|c: char| c.is_ascii_digit());
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(base))
    }

    pub fn is_turn(self) -> bool {
        matches!(self, SegmentKind::TurnLeft | SegmentKind::TurnRight)
    }
}

impl Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk shape of a segment: `{"name": "forward1", "time_from_start": …}`
#[derive(Clone, Serialize, Deserialize)]
struct SegmentRecord {
    name: String,
    #[serde(flatten)]
    series: RateSeries,
    #[serde(default)]
    frozen: bool,
}

/// Samples recorded during one calibration step.
///
/// Created empty when the step begins and appended to while it is active.
/// Once frozen it no longer accepts samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SegmentRecord", into = "SegmentRecord")]
pub struct CalibrationSegment {
    pub kind: SegmentKind,
    /// Step name including its repetition number, e.g. `turnleft2`
    pub label: String,
    pub series: RateSeries,
    frozen: bool,
}

impl TryFrom<SegmentRecord> for CalibrationSegment {
    type Error = String;

    fn try_from(record: SegmentRecord) -> std::result::Result<Self, Self::Error> {
        let kind = SegmentKind::from_label(&record.name)
            .ok_or_else(|| format!("unknown calibration step '{}'", record.name))?;
        Ok(Self {
            kind,
            label: record.name,
            series: record.series,
            frozen: record.frozen,
        })
    }
}

impl From<CalibrationSegment> for SegmentRecord {
    fn from(segment: CalibrationSegment) -> Self {
        SegmentRecord {
            name: segment.label,
            series: segment.series,
            frozen: segment.frozen,
        }
    }
}

impl CalibrationSegment {
    pub fn new(kind: SegmentKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            series: RateSeries::default(),
            frozen: false,
        }
    }

    /// Already-complete segment, frozen on creation
    pub fn with_series(kind: SegmentKind, label: impl Into<String>, series: RateSeries) -> Self {
        Self {
            kind,
            label: label.into(),
            series,
            frozen: true,
        }
    }

    pub fn push(&mut self, sample: SensorSample) -> Result<()> {
        if self.frozen {
            return Err(OdometryError::InvalidState(format!(
                "segment '{}' is frozen",
                self.label
            )));
        }
        self.series.push(sample);
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Ordered segments of one full protocol run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationSequence {
    segments: Vec<CalibrationSegment>,
}

impl CalibrationSequence {
    pub fn new(segments: Vec<CalibrationSegment>) -> Self {
        Self { segments }
    }

    pub fn push(&mut self, segment: CalibrationSegment) {
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[CalibrationSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn of_kind(&self, kind: SegmentKind) -> impl Iterator<Item = &CalibrationSegment> + '_ {
        self.segments.iter().filter(move |s| s.kind == kind)
    }

    /// Closest forward segment before position `index`
    pub fn preceding_forward(&self, index: usize) -> Option<&CalibrationSegment> {
        self.segments[..index.min(self.segments.len())]
            .iter()
            .rev()
            .find(|s| s.kind == SegmentKind::Forward)
    }

    /// Each segment of `kind` together with its preceding forward segment.
    ///
    /// A forward segment shared by two turns is only counted once.
    pub fn turn_group(&self, kind: SegmentKind) -> Vec<&CalibrationSegment> {
        let mut group: Vec<&CalibrationSegment> = Vec::new();
        for (index, segment) in self.segments.iter().enumerate() {
            if segment.kind != kind {
                continue;
            }
            group.push(segment);
            if let Some(forward) = self.preceding_forward(index) {
                if !group.iter().any(|s| std::ptr::eq(*s, forward)) {
                    group.push(forward);
                }
            }
        }
        group
    }

    /// Every sample of the segments of `kind`, joined in order
    pub fn joined(&self, kind: SegmentKind) -> RateSeries {
        RateSeries::concat(self.of_kind(kind).map(|s| &s.series))
    }

    /// Fail unless the sequence can drive the structured solver
    pub fn check_solvable(&self) -> Result<()> {
        for kind in [SegmentKind::Forward, SegmentKind::TurnLeft, SegmentKind::TurnRight] {
            if self.of_kind(kind).next().is_none() {
                return Err(OdometryError::MissingSegments(kind));
            }
        }
        Ok(())
    }
}

/// One operator step of a calibration protocol
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStep {
    pub kind: SegmentKind,
    pub label: String,
    pub instruction: String,
}

/// Ordered list of operator steps
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProtocol {
    pub steps: Vec<ProtocolStep>,
}

impl CalibrationProtocol {
    /// Two forward+180° loops, the first tracking the left wheel along the
    /// tape, the second the right wheel.
    pub fn standard() -> Self {
        use SegmentKind::*;

        const HOLD_LEFT: &str = "Wait for at least 5 seconds with the left wheel on the tape. Do not move the wheelchair.";
        const FORWARD_LEFT: &str = "Move the wheelchair forward 10 meters. Keep the left wheel on the tape.";
        const TURN_LEFT: &str = "Turn the wheelchair 180 degrees, keeping the left wheel on the tape.";
        const HOLD_RIGHT: &str = "Wait for at least 5 seconds with the right wheel on the tape. Do not move the wheelchair.";
        const FORWARD_RIGHT: &str = "Move the wheelchair forward 10 meters. Keep the right wheel on the tape.";
        const TURN_RIGHT: &str = "Turn the wheelchair 180 degrees, keeping the right wheel on the tape.";

        let steps = [
            (Start, "start", "Move the wheelchair to the starting position. Set the left wheel on the end tape."),
            (Pause, "pause1", HOLD_LEFT),
            (Forward, "forward1", FORWARD_LEFT),
            (TurnLeft, "turnleft1", TURN_LEFT),
            (Forward, "forward2", FORWARD_LEFT),
            (TurnLeft, "turnleft2", TURN_LEFT),
            (SetPosition, "setposition", "The wheelchair should be back at the starting position. Set the right wheel on the tape."),
            (Pause, "pause2", HOLD_RIGHT),
            (Forward, "forward3", FORWARD_RIGHT),
            (TurnRight, "turnright1", TURN_RIGHT),
            (Forward, "forward4", FORWARD_RIGHT),
            (TurnRight, "turnright2", TURN_RIGHT),
            (End, "end", "The wheelchair should be at the starting position. Finish to save the calibration."),
        ];

        Self {
            steps: steps
                .into_iter()
                .map(|(kind, label, instruction)| ProtocolStep {
                    kind,
                    label: label.to_string(),
                    instruction: instruction.to_string(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&ProtocolStep> {
        self.steps.get(index)
    }
}

/// Which solver produced a calibration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    Sequence,
    Turnaround,
    TurnaroundBias,
}

/// Solved parameters with the solver outcome that produced them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub method: CalibrationMethod,
    pub parameters: ParameterVector,
    pub report: SolverReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_window: Option<TurnWindow>,
}

impl Calibration {
    /// Gate before persistence: the parameters must describe a real vehicle
    /// and produce finite traces over every given recording.
    ///
    /// Convergence is not checked; see [`SolverReport::converged`].
    pub fn accept(&self, recordings: &[&RateSeries]) -> Result<()> {
        self.parameters.validate()?;
        for recording in recordings {
            let integration = self.parameters.trace(recording);
            if let Some(channel) = integration.trace.first_non_finite() {
                return Err(OdometryError::NonFiniteTrace(channel));
            }
        }
        Ok(())
    }
}
