//! Render-pulled frame queue.
//!
//! The audio clock (a device callback, or a test) calls [`QueueSink::render`]
//! for every block it needs. Queued frames are copied out back to back, so
//! there is no gap between them; an empty queue renders silence.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::{AudioFrame, AudioSink, PlaybackResult, VolumeCallback, VolumeMeter};

#[derive(Default)]
struct QueueState {
    frames: VecDeque<AudioFrame>,
    /// Read offset into the front frame
    position: usize,
}

pub struct QueueSink {
    sample_rate: u32,
    frame_size: usize,
    state: Mutex<QueueState>,
    meter: VolumeMeter,
}

impl QueueSink {
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            sample_rate,
            frame_size: frame_size.max(1),
            state: Mutex::new(QueueState::default()),
            meter: VolumeMeter::new(),
        }
    }

    /// Fill `out` with queued audio, padding with silence.
    ///
    /// Returns how many samples came from the queue. Publishes the block's
    /// level to volume subscribers.
    pub fn render(&self, out: &mut [f32]) -> usize {
        let mut written = 0;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            while written < out.len() {
                let Some(front) = state.frames.front() else {
                    break;
                };
                let start = state.position.min(front.len());
                let n = (front.len() - start).min(out.len() - written);
                out[written..written + n].copy_from_slice(&front[start..start + n]);
                written += n;

                if start + n >= front.len() {
                    state.frames.pop_front();
                    state.position = 0;
                } else {
                    state.position = start + n;
                }
            }
        }

        out[written..].fill(0.0);
        self.meter.publish(out);
        written
    }

    /// Last published volume level.
    pub fn level(&self) -> f32 {
        self.meter.level()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().frames.is_empty()
    }
}

impl AudioSink for QueueSink {
    fn enqueue(&self, frame: AudioFrame) -> PlaybackResult<()> {
        if !frame.is_empty() {
            self.state.lock().frames.push_back(frame);
        }
        Ok(())
    }

    fn stop(&self) {
        let dropped = {
            let mut state = self.state.lock();
            let dropped = state.frames.len();
            state.frames.clear();
            state.position = 0;
            dropped
        };
        self.meter.reset();
        tracing::debug!("Playback stopped, dropped {} queued frames", dropped);
    }

    fn on_volume(&self, callback: VolumeCallback) {
        self.meter.subscribe(callback);
    }

    fn queued_frames(&self) -> usize {
        self.state.lock().frames.len()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}
