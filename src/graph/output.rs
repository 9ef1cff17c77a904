//! Output slots: growable per-channel sample buffers owned by a node.

/// One output channel of a node. The buffer grows to whatever window the
/// widest consumer requests and never shrinks below one element.
pub struct OutputSlot {
    buffer: Vec<f32>,
    last_written: usize,
    polled: bool,
    visible: bool,
}

impl OutputSlot {
    pub fn new(default: f32, min_size: usize, visible: bool) -> Self {
        Self {
            buffer: vec![default; min_size.max(1)],
            last_written: 0,
            polled: false,
            visible,
        }
    }

    /// Mutable window of at least `min_size` frames. Marks the slot as
    /// freshly written and clears the polled flag.
    pub fn frames_mut(&mut self, min_size: usize) -> &mut [f32] {
        let size = min_size.max(1);
        if self.buffer.len() < size {
            self.buffer.resize(size, 0.0);
        }
        self.last_written = size;
        self.polled = false;
        &mut self.buffer[..size]
    }

    /// Grow the buffer without claiming new data was produced. Used by the
    /// framework to satisfy a consumer requesting a wider window.
    pub(crate) fn ensure_size(&mut self, min_size: usize) {
        if self.buffer.len() < min_size.max(1) {
            self.buffer.resize(min_size.max(1), 0.0);
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.buffer
    }

    /// Window of the most recent write (falls back to the whole buffer when
    /// nothing was written yet).
    pub fn written(&self) -> &[f32] {
        if self.last_written == 0 {
            &self.buffer
        } else {
            &self.buffer[..self.last_written]
        }
    }

    /// First sample, the scalar view of the channel.
    pub fn value(&self) -> f32 {
        self.buffer.first().copied().unwrap_or(0.0)
    }

    pub fn set_value(&mut self, value: f32) {
        if let Some(first) = self.buffer.first_mut() {
            *first = value;
        }
        self.last_written = self.last_written.max(1);
    }

    /// Fill the whole buffer, e.g. when installing output defaults.
    pub fn fill(&mut self, value: f32) {
        self.buffer.fill(value);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn last_written(&self) -> usize {
        self.last_written
    }

    /// True iff some consumer read from the slot since the last write.
    pub fn is_polled(&self) -> bool {
        self.polled
    }

    pub(crate) fn mark_polled(&mut self) {
        self.polled = true;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_grows_and_tracks_writes() {
        let mut out = OutputSlot::new(0.0, 1, true);
        assert_eq!(out.len(), 1);
        {
            let frames = out.frames_mut(8);
            assert_eq!(frames.len(), 8);
            frames[7] = 0.5;
        }
        assert_eq!(out.last_written(), 8);
        assert_eq!(out.as_slice()[7], 0.5);
    }

    #[test]
    fn test_polled_flag_clears_on_write() {
        let mut out = OutputSlot::new(0.0, 4, true);
        out.mark_polled();
        assert!(out.is_polled());
        let _ = out.frames_mut(4);
        assert!(!out.is_polled());
    }

    #[test]
    fn test_never_shrinks_below_one() {
        let mut out = OutputSlot::new(1.0, 1, true);
        let frames = out.frames_mut(0);
        assert_eq!(frames.len(), 1);
    }
}
