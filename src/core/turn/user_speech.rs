//! Recorder for the caller's own speech.
//!
//! Microphone audio is pushed here between `start` and `finish`; the caller
//! decides when an utterance ends. It never shares the model-side
//! [`TurnAccumulator`].

use bytes::Bytes;

use super::TurnAccumulator;
use crate::core::live::INPUT_SAMPLE_RATE;
use crate::utils::pcm16_to_wav;

#[derive(Debug)]
pub struct UserSpeechRecorder {
    sample_rate: u32,
    recording: bool,
    buffer: TurnAccumulator,
}

impl Default for UserSpeechRecorder {
    fn default() -> Self {
        Self::new(INPUT_SAMPLE_RATE)
    }
}

impl UserSpeechRecorder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            recording: false,
            buffer: TurnAccumulator::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Begin a new utterance, dropping anything left from an earlier one.
    pub fn start(&mut self) {
        self.buffer.clear();
        self.recording = true;
    }

    /// Append PCM16 microphone audio. Ignored while not recording.
    pub fn push(&mut self, pcm: Bytes) {
        if self.recording && !pcm.is_empty() {
            self.buffer.push(pcm);
        }
    }

    /// Stop recording and return the utterance as a WAV file.
    ///
    /// `None` when nothing was captured.
    pub fn finish(&mut self) -> Result<Option<Bytes>, hound::Error> {
        self.recording = false;
        match self.buffer.drain() {
            Some(pcm) => Ok(Some(Bytes::from(pcm16_to_wav(&pcm, self.sample_rate)?))),
            None => Ok(None),
        }
    }
}
