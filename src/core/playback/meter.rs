use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

use super::VolumeCallback;
use crate::utils::rms;

/// RMS level publisher shared by sinks.
#[derive(Default)]
pub struct VolumeMeter {
    callbacks: RwLock<Vec<VolumeCallback>>,
    /// Last level, stored as `f32` bits
    level: AtomicU32,
}

impl VolumeMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: VolumeCallback) {
        self.callbacks.write().push(callback);
    }

    /// Measure `block` and notify subscribers.
    pub fn publish(&self, block: &[f32]) {
        let level = rms(block);
        self.level.store(level.to_bits(), Ordering::Relaxed);

        // Never wait on a subscriber being registered.
        if let Some(callbacks) = self.callbacks.try_read() {
            for callback in callbacks.iter() {
                callback(level);
            }
        }
    }

    /// Most recently published level.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    /// Publish silence, e.g. after the queue was flushed.
    pub fn reset(&self) {
        self.publish(&[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_publish_updates_level_and_callbacks() {
        let meter = VolumeMeter::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        meter.subscribe(Arc::new(move |level: f32| sink.lock().push(level)));

        meter.publish(&[0.5, -0.5]);
        meter.reset();

        assert_eq!(*seen.lock(), vec![0.5, 0.0]);
        assert_eq!(meter.level(), 0.0);
    }
}
