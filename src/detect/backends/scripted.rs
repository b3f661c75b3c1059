use anyhow::{anyhow, Result};
use image::RgbImage;
use std::collections::VecDeque;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// One scripted detector response.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Detections(Vec<Detection>),
    Failure(String),
}

/// Deterministic backend that replays a script, one step per `detect` call.
///
/// When the script runs out the last step repeats, or the whole script
/// restarts if the backend was built with `looping`.
pub struct ScriptedBackend {
    script: Vec<ScriptStep>,
    pending: VecDeque<ScriptStep>,
    looping: bool,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            pending: script.iter().cloned().collect(),
            script,
            looping: false,
            calls: 0,
        }
    }

    /// Script of runs: `(detections, repeat_count)`.
    pub fn runs(runs: Vec<(Vec<Detection>, usize)>) -> Self {
        let script = runs
            .into_iter()
            .flat_map(|(detections, count)| {
                std::iter::repeat(ScriptStep::Detections(detections)).take(count)
            })
            .collect();
        Self::new(script)
    }

    pub fn looping(mut self, enabled: bool) -> Self {
        self.looping = enabled;
        self
    }

    /// Number of `detect` calls served so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn next_step(&mut self) -> Option<ScriptStep> {
        if self.pending.is_empty() && self.looping {
            self.pending = self.script.iter().cloned().collect();
        }
        match self.pending.len() {
            0 => None,
            1 if !self.looping => self.pending.front().cloned(),
            _ => self.pending.pop_front(),
        }
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _image: &RgbImage, _confidence_threshold: f32) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.next_step() {
            Some(ScriptStep::Detections(detections)) => Ok(detections),
            Some(ScriptStep::Failure(msg)) => Err(anyhow!(msg)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PixelBox;

    fn person() -> Detection {
        Detection::person(PixelBox::new(10, 10, 50, 100), 0.9)
    }

    #[test]
    fn replays_steps_then_repeats_the_last() -> Result<()> {
        let image = RgbImage::new(4, 4);
        let mut backend = ScriptedBackend::new(vec![
            ScriptStep::Detections(vec![person()]),
            ScriptStep::Failure("model exploded".into()),
            ScriptStep::Detections(vec![]),
        ]);

        assert_eq!(backend.detect(&image, 0.5)?.len(), 1);
        assert!(backend.detect(&image, 0.5).is_err());
        assert!(backend.detect(&image, 0.5)?.is_empty());
        assert!(backend.detect(&image, 0.5)?.is_empty());
        assert_eq!(backend.calls(), 4);
        Ok(())
    }

    #[test]
    fn looping_restarts_the_script() -> Result<()> {
        let image = RgbImage::new(4, 4);
        let mut backend = ScriptedBackend::runs(vec![(vec![person()], 2), (vec![], 1)]).looping(true);

        let counts: Vec<usize> = (0..6)
            .map(|_| backend.detect(&image, 0.5).map(|d| d.len()))
            .collect::<Result<_>>()?;
        assert_eq!(counts, vec![1, 1, 0, 1, 1, 0]);
        Ok(())
    }

    #[test]
    fn empty_script_detects_nothing() -> Result<()> {
        let mut backend = ScriptedBackend::new(Vec::new());
        assert!(backend.detect(&RgbImage::new(1, 1), 0.5)?.is_empty());
        Ok(())
    }
}
