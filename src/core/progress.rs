/// Maps a 0..1 sub-step fraction onto a slice of the overall progress bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRange {
    start: f64,
    end: f64,
}

impl ProgressRange {
    pub fn new(start: f64, end: f64) -> Self {
        let start = start.clamp(0.0, 1.0);
        let end = end.clamp(start, 1.0);
        Self { start, end }
    }

    /// Byte transfer owns `[0, share]`; record creation fills the rest.
    pub fn transfer(share: f64) -> Self {
        Self::new(0.0, share)
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn map(&self, fraction: f64) -> f64 {
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        self.start + (self.end - self.start) * fraction
    }
}

/// Whether an `Uploading` update moved far enough to be worth publishing.
pub fn should_publish(previous: f64, next: f64, threshold: f64) -> bool {
    (next - previous).abs() >= threshold
}
