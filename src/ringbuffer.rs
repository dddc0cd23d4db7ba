// Bounded PCM ring buffer bridging the decode worker and the output callback

use parking_lot::Mutex;
use std::sync::Arc;

struct RingState {
    samples: Vec<f32>,
    write_pos: usize,
    read_pos: usize,
}

impl RingState {
    fn free(&self, capacity: usize) -> usize {
        if self.write_pos >= self.read_pos {
            capacity - (self.write_pos - self.read_pos) - 1
        } else {
            self.read_pos - self.write_pos - 1
        }
    }

    fn filled(&self, capacity: usize) -> usize {
        if self.write_pos >= self.read_pos {
            self.write_pos - self.read_pos
        } else {
            capacity - (self.read_pos - self.write_pos)
        }
    }
}

/// Thread-safe bounded ring of interleaved `f32` samples.
///
/// One slot is always kept empty to distinguish full from empty, so a ring
/// created with capacity `n` holds at most `n - 1` samples.
#[derive(Clone)]
pub struct PcmRing {
    state: Arc<Mutex<RingState>>,
}

impl PcmRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            state: Arc::new(Mutex::new(RingState {
                samples: vec![0.0; capacity],
                write_pos: 0,
                read_pos: 0,
            })),
        }
    }

    /// Append as many samples from `data` as fit; returns the count written.
    pub fn write(&self, data: &[f32]) -> usize {
        let mut st = self.state.lock();
        let capacity = st.samples.len();
        let to_write = data.len().min(st.free(capacity));
        if to_write == 0 {
            return 0;
        }

        // Wrap-around is handled as two contiguous copies.
        let write_pos = st.write_pos;
        let end = write_pos + to_write;
        if end <= capacity {
            st.samples[write_pos..end].copy_from_slice(&data[..to_write]);
            st.write_pos = end % capacity;
        } else {
            let head = capacity - write_pos;
            st.samples[write_pos..].copy_from_slice(&data[..head]);
            st.samples[..to_write - head].copy_from_slice(&data[head..to_write]);
            st.write_pos = to_write - head;
        }
        to_write
    }

    /// Pop up to `out.len()` samples into `out`; returns the count read.
    pub fn read(&self, out: &mut [f32]) -> usize {
        let mut st = self.state.lock();
        let capacity = st.samples.len();
        let to_read = out.len().min(st.filled(capacity));
        if to_read == 0 {
            return 0;
        }

        let read_pos = st.read_pos;
        let end = read_pos + to_read;
        if end <= capacity {
            out[..to_read].copy_from_slice(&st.samples[read_pos..end]);
            st.read_pos = end % capacity;
        } else {
            let head = capacity - read_pos;
            out[..head].copy_from_slice(&st.samples[read_pos..]);
            out[head..to_read].copy_from_slice(&st.samples[..to_read - head]);
            st.read_pos = to_read - head;
        }
        to_read
    }

    /// Drop all buffered samples.
    pub fn clear(&self) {
        let mut st = self.state.lock();
        st.write_pos = 0;
        st.read_pos = 0;
    }

    /// Replace the backing storage, dropping any buffered samples.
    pub fn resize(&self, capacity: usize) {
        let capacity = capacity.max(2);
        let mut st = self.state.lock();
        if st.samples.len() != capacity {
            st.samples = vec![0.0; capacity];
        }
        st.write_pos = 0;
        st.read_pos = 0;
    }

    pub fn len(&self) -> usize {
        let st = self.state.lock();
        st.filled(st.samples.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().samples.len()
    }

    /// Occupancy as a fraction in `[0.0, 1.0]`.
    pub fn fullness(&self) -> f32 {
        let st = self.state.lock();
        st.filled(st.samples.len()) as f32 / st.samples.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_capacity_minus_one() {
        let ring = PcmRing::new(8);
        let written = ring.write(&[1.0; 16]);
        assert_eq!(written, 7);
        assert_eq!(ring.len(), 7);
    }

    #[test]
    fn read_returns_what_was_written() {
        let ring = PcmRing::new(16);
        ring.write(&[0.25, 0.5, 0.75]);
        let mut out = [0.0f32; 3];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, [0.25, 0.5, 0.75]);
        assert!(ring.is_empty());
    }

    #[test]
    fn wrap_around_preserves_order() {
        let ring = PcmRing::new(8);
        ring.write(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut out = [0.0f32; 4];
        ring.read(&mut out);

        // Write past the physical end of the backing store.
        ring.write(&[6.0, 7.0, 8.0, 9.0, 10.0]);
        let mut rest = [0.0f32; 6];
        assert_eq!(ring.read(&mut rest), 6);
        assert_eq!(rest, [5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn short_read_reports_count() {
        let ring = PcmRing::new(8);
        ring.write(&[1.0, 2.0]);
        let mut out = [0.0f32; 5];
        assert_eq!(ring.read(&mut out), 2);
    }

    #[test]
    fn clear_empties_without_reallocating() {
        let ring = PcmRing::new(8);
        ring.write(&[1.0; 7]);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 8);
    }

    #[test]
    fn resize_drops_content() {
        let ring = PcmRing::new(8);
        ring.write(&[1.0; 7]);
        ring.resize(32);
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 32);
    }

    #[test]
    fn fullness_tracks_occupancy() {
        let ring = PcmRing::new(10);
        assert_eq!(ring.fullness(), 0.0);
        ring.write(&[0.0; 5]);
        assert!((ring.fullness() - 0.5).abs() < f32::EPSILON);
    }
}
