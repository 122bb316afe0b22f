use std::collections::VecDeque;

/// Rolling time-domain window over the most recent input samples.
pub struct AnalyserWindow {
    size: usize,
    samples: VecDeque<f32>,
}

impl AnalyserWindow {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            samples: VecDeque::with_capacity(size),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn push(&mut self, chunk: &[f32]) {
        let chunk = if chunk.len() > self.size {
            &chunk[chunk.len() - self.size..]
        } else {
            chunk
        };
        let overflow = (self.samples.len() + chunk.len()).saturating_sub(self.size);
        self.samples.drain(..overflow);
        self.samples.extend(chunk.iter().copied());
    }

    /// Oldest-first copy of the window. Shorter than `size` until enough audio arrived.
    pub fn snapshot(&self) -> Vec<f32> {
        self.samples.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Result of one analysis pass; the voice flag and the waveform come from the same
/// window snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameAnalysis {
    /// Maximum absolute deviation from the zero midpoint, in [0, 1].
    pub peak_deviation: f32,
    pub rms: f32,
    pub voice_present: bool,
    pub waveform: Vec<f32>,
}

pub fn compute_levels(samples: &[f32]) -> (f32, f32) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }

    let mut peak = 0.0f32;
    let mut sum_sq = 0.0f32;

    for &s in samples {
        let v = s.abs();
        if v > peak {
            peak = v;
        }
        sum_sq += s * s;
    }

    let rms = (sum_sq / samples.len() as f32).sqrt();
    (rms.clamp(0.0, 1.0), peak.clamp(0.0, 1.0))
}

pub fn analyse_window(window: &[f32], voice_threshold: f32, waveform_points: usize) -> FrameAnalysis {
    let (rms, peak) = compute_levels(window);

    let waveform = if window.is_empty() || waveform_points == 0 {
        Vec::new()
    } else {
        let points = waveform_points.min(window.len());
        (0..points)
            .map(|i| window[i * window.len() / points].clamp(-1.0, 1.0))
            .collect()
    };

    FrameAnalysis {
        peak_deviation: peak,
        rms,
        voice_present: peak > voice_threshold,
        waveform,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn window_keeps_only_most_recent_samples() {
        let mut w = AnalyserWindow::new(4);
        w.push(&[0.1, 0.2, 0.3]);
        assert_eq!(w.snapshot(), vec![0.1, 0.2, 0.3]);

        w.push(&[0.4, 0.5]);
        assert_eq!(w.snapshot(), vec![0.2, 0.3, 0.4, 0.5]);

        w.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(w.snapshot(), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn silence_is_not_voice() {
        let frame = analyse_window(&vec![0.0; 2048], 0.05, 128);
        assert_eq!(frame.peak_deviation, 0.0);
        assert!(!frame.voice_present);
        assert_eq!(frame.waveform.len(), 128);
    }

    #[test]
    fn threshold_is_strict() {
        let mut quiet = vec![0.0f32; 2048];
        quiet[100] = -0.04;
        assert!(!analyse_window(&quiet, 0.05, 64).voice_present);

        let mut loud = vec![0.0f32; 2048];
        loud[1000] = -0.06;
        let frame = analyse_window(&loud, 0.05, 64);
        assert!(frame.voice_present);
        assert_relative_eq!(frame.peak_deviation, 0.06, epsilon = 1e-6);
    }

    #[test]
    fn levels_of_constant_signal() {
        let (rms, peak) = compute_levels(&[0.5; 256]);
        assert_relative_eq!(rms, 0.5, epsilon = 1e-6);
        assert_relative_eq!(peak, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn empty_window_yields_silent_frame() {
        assert_eq!(analyse_window(&[], 0.05, 128), FrameAnalysis::default());
    }
}
