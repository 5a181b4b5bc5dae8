//! Per-frame orchestration: landmarks → features → classifier → smoother →
//! dispatcher.

use crate::classifier::{ClassifierError, Prediction, TrainedModel};
use crate::dispatch::{ActionDispatcher, Dispatched};
use crate::features;
use crate::gesture::GestureLabel;
use crate::landmarks::{LandmarkSet, LandmarkSource, Observation};
use crate::smoother::{GestureSmoother, SmoothedState};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Derived state of one frame, for presentation
#[derive(Clone, Debug, PartialEq)]
pub struct FrameState {
    /// Classifier output before smoothing; `None` without a hand
    pub raw: Option<Prediction>,
    pub state: SmoothedState,
    /// Stabilized label, UNKNOWN unless the state is stable
    pub label: GestureLabel,
    /// Raw confidence this frame, 0.0 without a hand
    pub confidence: f32,
    pub dispatched: Option<Dispatched>,
    pub fps: f32,
    /// Hand bounding box (min_x, min_y, max_x, max_y)
    pub bounding_box: Option<(f32, f32, f32, f32)>,
}

/// Frames per second over a sliding time window
#[derive(Clone, Debug)]
pub struct FpsMeter {
    stamps: VecDeque<Instant>,
    window: Duration,
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl FpsMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            stamps: VecDeque::new(),
            window,
        }
    }

    pub fn tick(&mut self, now: Instant) -> f32 {
        self.stamps.push_back(now);
        while let Some(&first) = self.stamps.front() {
            if now.saturating_duration_since(first) > self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
        self.fps()
    }

    pub fn fps(&self) -> f32 {
        match (self.stamps.front(), self.stamps.back()) {
            (Some(first), Some(last)) if self.stamps.len() > 1 => {
                let span = last.saturating_duration_since(*first).as_secs_f32();
                if span > 0.0 {
                    (self.stamps.len() - 1) as f32 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

/// Totals for one `run`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub hands: u64,
    pub actions: u64,
}

/// One gesture pipeline. Each camera stream gets its own instance; only the
/// trained model is shared.
pub struct GesturePipeline {
    model: Arc<TrainedModel>,
    smoother: GestureSmoother,
    dispatcher: ActionDispatcher,
    fps: FpsMeter,
}

impl GesturePipeline {
    pub fn new(model: Arc<TrainedModel>, smoother: GestureSmoother, dispatcher: ActionDispatcher) -> Self {
        Self {
            model,
            smoother,
            dispatcher,
            fps: FpsMeter::default(),
        }
    }

    pub fn model(&self) -> &Arc<TrainedModel> {
        &self.model
    }

    pub fn smoother(&self) -> &GestureSmoother {
        &self.smoother
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut ActionDispatcher {
        &mut self.dispatcher
    }

    /// Run one frame through every stage
    pub fn process(&mut self, hand: Option<&LandmarkSet>, now: Instant) -> Result<FrameState, ClassifierError> {
        let _span = tracing::debug_span!("frame").entered();

        let raw = match hand {
            Some(landmarks) => {
                let features = features::extract(landmarks);
                Some(self.model.predict(&features)?)
            }
            None => None,
        };

        let mut frame = self.process_prediction(raw, now);
        frame.bounding_box = hand.and_then(LandmarkSet::bounding_box);
        Ok(frame)
    }

    /// Smooth and dispatch an already classified frame.
    ///
    /// Only a lost hand releases the dispatcher. A low-confidence frame
    /// keeps the last stable gesture held, so a `Once` binding does not
    /// re-arm on a single flicker.
    pub fn process_prediction(&mut self, raw: Option<Prediction>, now: Instant) -> FrameState {
        let state = self.smoother.update(raw);
        let dispatched = match state {
            SmoothedState::Stable(label) => self.dispatcher.dispatch(label, now),
            SmoothedState::NoHand => {
                self.dispatcher.release();
                None
            }
            SmoothedState::LowConfidence => None,
        };
        let fps = self.fps.tick(now);

        if let Some(p) = raw {
            tracing::debug!("raw={} conf={:.2} state={:?}", p.label, p.confidence, state);
        }

        FrameState {
            raw,
            state,
            label: state.label(),
            confidence: raw.map_or(0.0, |p| p.confidence),
            dispatched,
            fps,
            bounding_box: None,
        }
    }

    /// Pull frames from `source` until it ends or `stop` is set.
    ///
    /// `target_fps` of 0 runs unthrottled. Stopping is checked between
    /// frames, so no frame is left half processed.
    pub fn run<S, F>(
        &mut self,
        source: &mut S,
        stop: &AtomicBool,
        target_fps: u32,
        mut on_frame: F,
    ) -> Result<RunSummary, ClassifierError>
    where
        S: LandmarkSource + ?Sized,
        F: FnMut(&FrameState),
    {
        let frame_duration = (target_fps > 0).then(|| Duration::from_secs_f32(1.0 / target_fps as f32));
        let mut summary = RunSummary::default();
        let mut total_acquire_time = Duration::ZERO;
        let mut total_process_time = Duration::ZERO;

        tracing::info!("Starting gesture loop ({} classifier)", self.model.kind());

        while !stop.load(Ordering::Relaxed) {
            let loop_start = Instant::now();

            let Some(observation) = source.next_frame() else {
                tracing::info!("Landmark feed ended");
                break;
            };
            let acquired = Instant::now();
            total_acquire_time += acquired - loop_start;

            let frame = self.process(observation.hand(), acquired)?;
            total_process_time += acquired.elapsed();

            summary.frames += 1;
            if matches!(observation, Observation::Hand(_)) {
                summary.hands += 1;
            }
            if frame.dispatched.is_some() {
                summary.actions += 1;
            }
            on_frame(&frame);

            // Log stats every 30 frames
            if summary.frames % 30 == 0 {
                let n = summary.frames as f64;
                let avg_acquire_ms = total_acquire_time.as_secs_f64() * 1000.0 / n;
                let avg_process_ms = total_process_time.as_secs_f64() * 1000.0 / n;
                tracing::info!(
                    "Frame {}: acquire={:.1}ms, process={:.2}ms, fps={:.1}, gesture={}",
                    summary.frames,
                    avg_acquire_ms,
                    avg_process_ms,
                    frame.fps,
                    frame.label
                );
            }

            // Frame rate limiting
            if let Some(frame_duration) = frame_duration {
                let elapsed = loop_start.elapsed();
                if elapsed < frame_duration {
                    std::thread::sleep(frame_duration - elapsed);
                }
            }
        }

        tracing::info!(
            "Processed {} frames ({} with a hand), {} actions",
            summary.frames,
            summary.hands,
            summary.actions
        );
        Ok(summary)
    }
}
