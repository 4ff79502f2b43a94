use serde::{Deserialize, Serialize};

use super::{CalibrationProtocol, CalibrationSegment, CalibrationSequence, ProtocolStep};
use crate::error::{OdometryError, Result};
use crate::types::SensorSample;

/// Recorder state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderState {
    /// Protocol loaded, nothing recorded yet
    Idle,
    /// Appending samples to step `step`
    Recording { step: usize },
    /// Every segment frozen and handed out
    Finished,
}

/// Walks an operator through a [`CalibrationProtocol`], collecting one
/// segment per step.
pub struct CalibrationRecorder {
    protocol: CalibrationProtocol,
    state: RecorderState,
    segments: Vec<CalibrationSegment>,
}

impl CalibrationRecorder {
    pub fn new(protocol: CalibrationProtocol) -> Self {
        Self {
            protocol,
            state: RecorderState::Idle,
            segments: Vec::new(),
        }
    }

    pub fn standard() -> Self {
        Self::new(CalibrationProtocol::standard())
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn protocol(&self) -> &CalibrationProtocol {
        &self.protocol
    }

    /// Step the operator is currently performing
    pub fn current_step(&self) -> Option<&ProtocolStep> {
        match self.state {
            RecorderState::Recording { step } => self.protocol.step(step),
            _ => None,
        }
    }

    /// Segments recorded so far, the active one last
    pub fn segments(&self) -> &[CalibrationSegment] {
        &self.segments
    }

    fn open(&mut self, step: usize) -> Result<()> {
        let step_info = self
            .protocol
            .step(step)
            .ok_or_else(|| OdometryError::InvalidState(format!("protocol has no step {}", step)))?;
        log::info!("calibration step {}: {}", step_info.label, step_info.instruction);
        self.segments
            .push(CalibrationSegment::new(step_info.kind, step_info.label.clone()));
        self.state = RecorderState::Recording { step };
        Ok(())
    }

    fn freeze_active(&mut self) {
        if let Some(active) = self.segments.last_mut() {
            active.freeze();
            log::debug!("froze segment {} ({} samples)", active.label, active.len());
        }
    }

    /// Transition Idle → Recording(step 0)
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            RecorderState::Idle => {
                if self.protocol.is_empty() {
                    return Err(OdometryError::InvalidState("protocol has no steps".to_string()));
                }
                self.open(0)
            }
            RecorderState::Recording { .. } => Err(OdometryError::AlreadyRunning),
            RecorderState::Finished => Err(OdometryError::InvalidState(
                "calibration already finished".to_string(),
            )),
        }
    }

    /// Append a sample to the active step
    pub fn push(&mut self, sample: SensorSample) -> Result<()> {
        match self.state {
            RecorderState::Recording { .. } => match self.segments.last_mut() {
                Some(active) => active.push(sample),
                None => Err(OdometryError::InvalidState("no active segment".to_string())),
            },
            _ => Err(OdometryError::NotRunning),
        }
    }

    /// Freeze the active step and open the next one.
    ///
    /// Returns the new step, or `None` when the active step was the last one;
    /// in that case the recorder stays on it until [`finish`](Self::finish).
    pub fn advance(&mut self) -> Result<Option<&ProtocolStep>> {
        let RecorderState::Recording { step } = self.state else {
            return Err(OdometryError::NotRunning);
        };
        if step + 1 >= self.protocol.len() {
            return Ok(None);
        }
        self.freeze_active();
        self.open(step + 1)?;
        Ok(self.protocol.step(step + 1))
    }

    /// Freeze the active step and hand out the recorded sequence.
    ///
    /// Steps never reached are absent from the result.
    pub fn finish(&mut self) -> Result<CalibrationSequence> {
        match self.state {
            RecorderState::Recording { step } => {
                self.freeze_active();
                self.state = RecorderState::Finished;
                if step + 1 < self.protocol.len() {
                    log::warn!(
                        "calibration finished early at step {} of {}",
                        step + 1,
                        self.protocol.len()
                    );
                }
                Ok(CalibrationSequence::new(std::mem::take(&mut self.segments)))
            }
            _ => Err(OdometryError::NotRunning),
        }
    }
}

impl Default for CalibrationRecorder {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::SegmentKind;

    #[test]
    fn test_state_transitions() {
        let mut recorder = CalibrationRecorder::standard();
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert!(matches!(
            recorder.push(SensorSample::new(0.0, 0.0, 0.0)),
            Err(OdometryError::NotRunning)
        ));
        assert!(matches!(recorder.advance(), Err(OdometryError::NotRunning)));

        recorder.start().unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording { step: 0 });
        assert!(matches!(recorder.start(), Err(OdometryError::AlreadyRunning)));
        assert_eq!(recorder.current_step().unwrap().kind, SegmentKind::Start);
    }

    #[test]
    fn test_full_protocol() {
        let mut recorder = CalibrationRecorder::standard();
        recorder.start().unwrap();

        let mut t = 0.0;
        for _ in 0..12 {
            for _ in 0..5 {
                recorder.push(SensorSample::new(t, 1.0, 1.0)).unwrap();
                t += 0.1;
            }
            assert!(recorder.advance().unwrap().is_some());
        }
        recorder.push(SensorSample::new(t, 0.0, 0.0)).unwrap();
        assert!(recorder.advance().unwrap().is_none());

        let sequence = recorder.finish().unwrap();
        assert_eq!(recorder.state(), RecorderState::Finished);
        assert_eq!(sequence.len(), 13);
        assert!(sequence.segments().iter().all(|s| s.is_frozen()));
        assert_eq!(sequence.segments()[2].label, "forward1");
        assert_eq!(sequence.segments()[2].len(), 5);
        assert_eq!(sequence.segments()[12].len(), 1);

        assert!(matches!(recorder.finish(), Err(OdometryError::NotRunning)));
        assert!(recorder.start().is_err());
    }

    #[test]
    fn test_samples_go_to_active_step_only() {
        let mut recorder = CalibrationRecorder::standard();
        recorder.start().unwrap();
        recorder.push(SensorSample::new(0.0, 0.0, 0.0)).unwrap();
        recorder.advance().unwrap();
        recorder.push(SensorSample::new(0.1, 0.0, 0.0)).unwrap();
        recorder.push(SensorSample::new(0.2, 0.0, 0.0)).unwrap();

        let segments = recorder.segments();
        assert_eq!(segments.len(), 2);
        assert!(segments[0].is_frozen());
        assert_eq!(segments[0].len(), 1);
        assert!(!segments[1].is_frozen());
        assert_eq!(segments[1].len(), 2);
    }

    #[test]
    fn test_early_finish() {
        let mut recorder = CalibrationRecorder::standard();
        recorder.start().unwrap();
        recorder.advance().unwrap();
        let sequence = recorder.finish().unwrap();
        assert_eq!(sequence.len(), 2);
        assert!(sequence.check_solvable().is_err());
    }
}
