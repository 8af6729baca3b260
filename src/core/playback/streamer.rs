//! PCM16 to sink framing.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{AudioSink, PlaybackResult, VolumeCallback};
use crate::utils::pcm16_to_f32;

/// Stateful linear-interpolation resampler for a mono stream.
#[derive(Debug, Clone)]
struct LinearResampler {
    /// Source samples advanced per output sample
    step: f64,
    /// Read position relative to `last`
    position: f64,
    /// Final sample of the previous chunk
    last: Option<f32>,
}

impl LinearResampler {
    fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            step: source_rate as f64 / target_rate as f64,
            position: 0.0,
            last: None,
        }
    }

    fn reset(&mut self) {
        self.position = 0.0;
        self.last = None;
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        // Index 0 is the previous chunk's last sample when there is one.
        let offset = usize::from(self.last.is_some());
        let len = input.len() + offset;
        let sample = |i: usize| -> f32 {
            match (i, self.last) {
                (0, Some(last)) => last,
                _ => input[i - offset],
            }
        };

        let mut pos = self.position;
        while pos + 1.0 < len as f64 {
            let i = pos as usize;
            let frac = (pos - i as f64) as f32;
            out.push(sample(i) * (1.0 - frac) + sample(i + 1) * frac);
            pos += self.step;
        }

        self.position = pos - (len - 1) as f64;
        self.last = input.last().copied();
    }
}

struct StreamerState {
    /// Converted samples not yet forming a full block
    pending: Vec<f32>,
    resampler: Option<LinearResampler>,
    /// Low byte of a sample split across two chunks
    carry: Option<u8>,
}

/// Frames inbound PCM16 into sink-sized blocks, in arrival order.
pub struct AudioStreamer {
    sink: Arc<dyn AudioSink>,
    source_rate: u32,
    state: Mutex<StreamerState>,
    accepted_chunks: AtomicU64,
}

impl AudioStreamer {
    /// Streamer for PCM16 arriving at `source_rate`.
    pub fn new(sink: Arc<dyn AudioSink>, source_rate: u32) -> Self {
        let target_rate = sink.sample_rate();
        let resampler =
            (source_rate != target_rate).then(|| LinearResampler::new(source_rate, target_rate));
        Self {
            sink,
            source_rate,
            state: Mutex::new(StreamerState {
                pending: Vec::new(),
                resampler,
                carry: None,
            }),
            accepted_chunks: AtomicU64::new(0),
        }
    }

    pub fn sink(&self) -> &Arc<dyn AudioSink> {
        &self.sink
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Accept one PCM16 chunk for playback.
    ///
    /// A chunk may end in the middle of a sample; the odd byte is joined
    /// with the start of the next chunk.
    pub fn add_pcm16(&self, pcm: &[u8]) -> PlaybackResult<()> {
        let frame_size = self.sink.frame_size().max(1);

        // Held across enqueue so concurrent callers cannot interleave blocks.
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let bytes: Cow<'_, [u8]> = match state.carry.take() {
            Some(low) => {
                let mut joined = Vec::with_capacity(pcm.len() + 1);
                joined.push(low);
                joined.extend_from_slice(pcm);
                Cow::Owned(joined)
            }
            None => Cow::Borrowed(pcm),
        };
        if bytes.len() % 2 == 1 {
            state.carry = bytes.last().copied();
        }
        let samples = pcm16_to_f32(&bytes);
        match state.resampler.as_mut() {
            Some(resampler) => resampler.process(&samples, &mut state.pending),
            None => state.pending.extend_from_slice(&samples),
        }

        let full = state.pending.len() / frame_size * frame_size;
        let mut rest = state.pending.split_off(full);
        std::mem::swap(&mut rest, &mut state.pending);
        for block in rest.chunks(frame_size) {
            self.sink.enqueue(block.to_vec())?;
        }

        self.accepted_chunks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Queue the trailing partial block, e.g. at the end of a turn.
    pub fn flush(&self) -> PlaybackResult<()> {
        let mut state = self.state.lock();
        if state.pending.is_empty() {
            return Ok(());
        }
        let tail = std::mem::take(&mut state.pending);
        self.sink.enqueue(tail)
    }

    /// Drop everything not yet played.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.carry = None;
        if let Some(resampler) = state.resampler.as_mut() {
            resampler.reset();
        }
        self.sink.stop();
    }

    pub fn on_volume(&self, callback: VolumeCallback) {
        self.sink.on_volume(callback);
    }

    /// Blocks waiting in the sink.
    pub fn queued_frames(&self) -> usize {
        self.sink.queued_frames()
    }

    /// PCM chunks accepted since creation; one per `add_pcm16` call.
    pub fn accepted_chunks(&self) -> u64 {
        self.accepted_chunks.load(Ordering::SeqCst)
    }

    /// Samples held back until a full block is available.
    pub fn pending_samples(&self) -> usize {
        self.state.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::playback::QueueSink;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_frames_into_sink_blocks() {
        let sink = Arc::new(QueueSink::new(24000, 4));
        let streamer = AudioStreamer::new(sink.clone(), 24000);

        streamer.add_pcm16(&pcm(&[1, 2, 3, 4, 5, 6])).unwrap();
        assert_eq!(sink.queued_frames(), 1);
        assert_eq!(streamer.pending_samples(), 2);

        streamer.add_pcm16(&pcm(&[7, 8])).unwrap();
        assert_eq!(sink.queued_frames(), 2);
        assert_eq!(streamer.pending_samples(), 0);
        assert_eq!(streamer.accepted_chunks(), 2);
    }

    #[test]
    fn test_flush_queues_partial_block() {
        let sink = Arc::new(QueueSink::new(24000, 4));
        let streamer = AudioStreamer::new(sink.clone(), 24000);
        streamer.add_pcm16(&pcm(&[1000, 2000])).unwrap();
        assert_eq!(sink.queued_frames(), 0);

        streamer.flush().unwrap();
        assert_eq!(sink.queued_frames(), 1);
        let mut out = [0.0f32; 4];
        assert_eq!(sink.render(&mut out), 2);
    }

    #[test]
    fn test_stop_discards_pending_and_queue() {
        let sink = Arc::new(QueueSink::new(24000, 4));
        let streamer = AudioStreamer::new(sink.clone(), 24000);
        streamer.add_pcm16(&pcm(&[1; 10])).unwrap();
        assert_eq!(sink.queued_frames(), 2);

        streamer.stop();
        assert_eq!(sink.queued_frames(), 0);
        assert_eq!(streamer.pending_samples(), 0);

        streamer.add_pcm16(&pcm(&[1; 4])).unwrap();
        assert_eq!(sink.queued_frames(), 1);
    }

    #[test]
    fn test_sample_split_across_chunks() {
        let sink = Arc::new(QueueSink::new(24000, 3));
        let streamer = AudioStreamer::new(sink.clone(), 24000);

        streamer.add_pcm16(&[1, 0, 2]).unwrap();
        assert_eq!(streamer.pending_samples(), 1);
        streamer.add_pcm16(&[0, 3, 0]).unwrap();
        assert_eq!(sink.queued_frames(), 1);
        assert_eq!(streamer.pending_samples(), 0);

        let mut out = [0.0f32; 3];
        assert_eq!(sink.render(&mut out), 3);
        assert_eq!(out.to_vec(), pcm16_to_f32(&pcm(&[1, 2, 3])));
    }

    #[test]
    fn test_stop_drops_split_byte() {
        let sink = Arc::new(QueueSink::new(24000, 2));
        let streamer = AudioStreamer::new(sink.clone(), 24000);

        streamer.add_pcm16(&[9]).unwrap();
        streamer.stop();
        streamer.add_pcm16(&pcm(&[4, 5])).unwrap();

        let mut out = [0.0f32; 2];
        assert_eq!(sink.render(&mut out), 2);
        assert_eq!(out.to_vec(), pcm16_to_f32(&pcm(&[4, 5])));
    }

    #[test]
    fn test_resamples_to_sink_rate() {
        let sink = Arc::new(QueueSink::new(48000, 1024));
        let streamer = AudioStreamer::new(sink.clone(), 24000);

        // 240 samples at 24kHz is 10ms, about 480 samples at 48kHz.
        streamer.add_pcm16(&pcm(&[0; 240])).unwrap();
        streamer.add_pcm16(&pcm(&[0; 240])).unwrap();
        let produced = streamer.pending_samples();
        assert!((955..=960).contains(&produced), "produced {produced}");
    }

    #[test]
    fn test_resampler_interpolates_across_chunks() {
        let mut resampler = LinearResampler::new(1, 2);
        let mut out = Vec::new();
        resampler.process(&[0.0, 1.0], &mut out);
        resampler.process(&[0.0], &mut out);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 0.5]);
    }
}
