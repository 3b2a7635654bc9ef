//! Bounded capture loop driving the match engine.
//!
//! The loop captures every `cadence_frames`-th frame into a two-slot arena.
//! Slot 0 is the first capture of the session and stays the reference; slot
//! 1 is overwritten by each later capture and compared against it. Polling
//! stops on the first match, after `max_iterations` frames, or when the
//! camera stops delivering frames.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::camera::{CameraDevice, Frame, FrameStream};
use crate::config::VerifyConfig;
use crate::embedding::{Embedding, EmbeddingProvider};
use crate::error::{CaptureError, ChannelError};
use crate::matcher::{MatchEngine, MatchResult};
use crate::notify::Notifier;

const REFERENCE: usize = 0;
const CANDIDATE: usize = 1;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub cadence_frames: u32,
    pub max_iterations: u32,
    pub max_read_failures: u32,
    pub work_dir: PathBuf,
}

impl From<&VerifyConfig> for SchedulerSettings {
    fn from(cfg: &VerifyConfig) -> Self {
        Self {
            cadence_frames: cfg.cadence_frames.max(1),
            max_iterations: cfg.max_iterations.max(1),
            max_read_failures: cfg.max_read_failures.max(1),
            work_dir: cfg.work_dir.clone(),
        }
    }
}

/// Counters of one polling run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    pub frame_counter: u64,
    pub capture_count: u32,
    pub match_flag: u8,
    pub iteration_count: u32,
}

#[derive(Debug)]
pub enum VerifyOutcome {
    Matched(MatchResult),
    Exhausted,
    CameraFailed(CaptureError),
}

impl VerifyOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, VerifyOutcome::Matched(_))
    }
}

#[derive(Debug)]
pub struct VerifyReport {
    pub outcome: VerifyOutcome,
    pub state: SessionState,
    /// Result of the match notification, `None` when nothing matched.
    pub notification: Option<Result<(), ChannelError>>,
}

/// What the provider saw in one slot.
struct Observation {
    embedding: Embedding,
    face_size: (f32, f32),
    image_size: (f32, f32),
}

struct Slot {
    frame: Frame,
    observation: Option<Observation>,
}

/// Fixed two-entry frame arena. Deletes its on-disk artifacts when dropped.
struct CaptureSlots {
    slots: [Option<Slot>; 2],
    dir: PathBuf,
    written: [Option<PathBuf>; 2],
}

impl CaptureSlots {
    fn new(dir: &Path) -> Self {
        Self {
            slots: [None, None],
            dir: dir.to_path_buf(),
            written: [None, None],
        }
    }

    /// Stores `frame` and returns the slot it went to.
    fn capture(&mut self, frame: Frame) -> usize {
        let index = if self.slots[REFERENCE].is_none() {
            REFERENCE
        } else {
            CANDIDATE
        };

        let path = self.dir.join(format!("img{index}.jpg"));
        match frame.save(&path) {
            Ok(()) => self.written[index] = Some(path),
            Err(e) => warn!("could not write capture artifact {}: {}", path.display(), e),
        }

        self.slots[index] = Some(Slot {
            frame,
            observation: None,
        });
        index
    }
}

impl Drop for CaptureSlots {
    fn drop(&mut self) {
        for path in self.written.iter_mut().filter_map(Option::take) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not remove capture artifact {}: {}", path.display(), e);
                }
            }
        }
    }
}

pub struct CaptureScheduler<P, N> {
    provider: P,
    notifier: N,
    engine: MatchEngine,
    settings: SchedulerSettings,
    fallback: Embedding,
    message: String,
}

impl<P, N> CaptureScheduler<P, N>
where
    P: EmbeddingProvider,
    N: Notifier,
{
    /// `fallback` stands in for any capture in which no face is found.
    pub fn new(
        provider: P,
        notifier: N,
        engine: MatchEngine,
        settings: SchedulerSettings,
        fallback: Embedding,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            notifier,
            engine,
            settings,
            fallback,
            message: message.into(),
        }
    }

    /// Runs one verification session against `camera`.
    ///
    /// The camera is released and capture artifacts removed before any
    /// notification is attempted.
    pub fn run<C: CameraDevice>(&mut self, camera: &C) -> VerifyReport {
        let mut state = SessionState::default();
        let outcome = self.poll(camera, &mut state);

        let notification = match &outcome {
            VerifyOutcome::Matched(_) => {
                let sent = self.notifier.signal(&self.message);
                if let Err(e) = &sent {
                    warn!("match notification not delivered: {}", e);
                }
                Some(sent)
            }
            _ => None,
        };

        VerifyReport {
            outcome,
            state,
            notification,
        }
    }

    fn poll<C: CameraDevice>(&mut self, camera: &C, state: &mut SessionState) -> VerifyOutcome {
        info!("opening camera {}", camera.name());
        let mut stream = match camera.open() {
            Ok(stream) => stream,
            Err(e) => return VerifyOutcome::CameraFailed(e),
        };
        let mut pending = match stream.next_frame() {
            Ok(frame) => Some(frame),
            Err(e) => return VerifyOutcome::CameraFailed(e),
        };
        info!("camera ready, polling");

        let mut slots = CaptureSlots::new(&self.settings.work_dir);
        let mut read_failures = 0;

        while state.iteration_count < self.settings.max_iterations {
            state.iteration_count += 1;

            let frame = match pending.take() {
                Some(frame) => frame,
                None => match stream.next_frame() {
                    Ok(frame) => {
                        read_failures = 0;
                        frame
                    }
                    Err(e) => {
                        read_failures += 1;
                        if read_failures >= self.settings.max_read_failures {
                            warn!("giving up after {} consecutive failed reads", read_failures);
                            return VerifyOutcome::CameraFailed(e);
                        }
                        warn!("skipping unreadable frame: {}", e);
                        state.frame_counter += 1;
                        continue;
                    }
                },
            };

            if state.frame_counter % u64::from(self.settings.cadence_frames) == 0 {
                let index = slots.capture(frame);
                state.capture_count += 1;
                debug!("captured frame {} into slot {}", state.frame_counter, index);

                if let Some(result) = self.compare_slots(&mut slots) {
                    if result.is_match {
                        state.match_flag = 1;
                        info!(
                            "face is a match ({:.3} <= {:.3})",
                            result.score,
                            self.engine.threshold()
                        );
                        return VerifyOutcome::Matched(result);
                    }
                    info!(
                        "face is not a match ({:.3}, threshold {:.3}, {:?})",
                        result.score,
                        self.engine.threshold(),
                        result.reason
                    );
                }
            }
            state.frame_counter += 1;
        }

        info!("iteration budget exhausted after {} frames", state.iteration_count);
        VerifyOutcome::Exhausted
    }

    /// Compares the candidate slot against the reference once both exist.
    fn compare_slots(&mut self, slots: &mut CaptureSlots) -> Option<MatchResult> {
        let [reference, candidate] = &mut slots.slots;
        let (Some(reference), Some(candidate)) = (reference.as_mut(), candidate.as_ref()) else {
            return None;
        };

        // slot 0 never changes within a session, observe it once
        if reference.observation.is_none() {
            reference.observation = Some(self.observe(&reference.frame));
        }
        let observed = self.observe(&candidate.frame);
        let reference = reference.observation.as_ref()?;

        Some(self.engine.compare(
            &reference.embedding,
            &observed.embedding,
            observed.face_size,
            observed.image_size,
        ))
    }

    fn observe(&mut self, frame: &Frame) -> Observation {
        let image_size = (frame.width() as f32, frame.height() as f32);
        let samples = match self.provider.detect_and_embed(frame) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("embedding provider failed, using fallback: {:#}", e);
                Vec::new()
            }
        };

        match samples.into_iter().next() {
            Some(sample) => Observation {
                face_size: sample.region.size(),
                embedding: sample.embedding,
                image_size,
            },
            None => {
                debug!("no face in capture, using fallback embedding");
                Observation {
                    embedding: self.fallback.clone(),
                    face_size: (0.0, 0.0),
                    image_size,
                }
            }
        }
    }
}
