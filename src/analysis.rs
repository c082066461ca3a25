//! Offline audio analysis for rendered buffers.
//!
//! We are "deaf" - rendered output is verified through analysis, both
//! by the CLI stats printout and by the tests.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

#[derive(Debug, Clone)]
pub struct AudioStats {
    pub sample_count: usize,
    pub duration_secs: f32,
    pub rms: f32,
    pub peak: f32,
    pub dc_offset: f32,
    pub zero_crossings: usize,
    pub dominant_hz: f32,
}

/// Analyze a mono buffer.
pub fn analyze(samples: &[f32], srate: u32) -> AudioStats {
    let n = samples.len();
    if n == 0 {
        return AudioStats {
            sample_count: 0,
            duration_secs: 0.0,
            rms: 0.0,
            peak: 0.0,
            dc_offset: 0.0,
            zero_crossings: 0,
            dominant_hz: 0.0,
        };
    }
    let sum_squares: f32 = samples.iter().map(|x| x * x).sum();
    let rms = (sum_squares / n as f32).sqrt();
    let peak = samples.iter().map(|x| x.abs()).fold(0.0f32, f32::max);
    let dc_offset = samples.iter().sum::<f32>() / n as f32;
    let mut zero_crossings = 0;
    for i in 1..n {
        if (samples[i - 1] >= 0.0) != (samples[i] >= 0.0) {
            zero_crossings += 1;
        }
    }
    AudioStats {
        sample_count: n,
        duration_secs: n as f32 / srate as f32,
        rms,
        peak,
        dc_offset,
        zero_crossings,
        dominant_hz: dominant_frequency(samples, srate),
    }
}

/// Strongest FFT bin over the first power-of-two window of the buffer.
pub fn dominant_frequency(samples: &[f32], srate: u32) -> f32 {
    // Largest power-of-two window that fits, capped at 16k.
    let mut size = 1usize;
    while size * 2 <= samples.len() && size * 2 <= 16384 {
        size *= 2;
    }
    if size < 64 {
        return 0.0;
    }
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(size);
    let mut buf: Vec<Complex<f32>> = samples[..size]
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            // Hann window against spectral leakage.
            let w = 0.5
                - 0.5 * (std::f32::consts::TAU * i as f32 / size as f32).cos();
            Complex::new(s * w, 0.0)
        })
        .collect();
    fft.process(&mut buf);
    let mut best_bin = 0;
    let mut best_mag = 0.0f32;
    for (bin, c) in buf.iter().enumerate().take(size / 2).skip(1) {
        let mag = c.norm_sqr();
        if mag > best_mag {
            best_mag = mag;
            best_bin = bin;
        }
    }
    best_bin as f32 * srate as f32 / size as f32
}

/// Extract one channel of an interleaved s16 buffer as floats.
pub fn channel_f32(interleaved: &[i16], channels: u16, ch: u16) -> Vec<f32> {
    interleaved
        .chunks(channels as usize)
        .filter_map(|frame| frame.get(ch as usize))
        .map(|&s| s as f32 / 32768.0)
        .collect()
}

/// Sum an interleaved s16 buffer down to mono floats in -1..1, summing
/// the channels (the stereo pan split halves each side).
pub fn mono_f32(interleaved: &[i16], channels: u16) -> Vec<f32> {
    interleaved
        .chunks(channels as usize)
        .map(|frame| frame.iter().map(|&s| s as f32 / 32768.0).sum())
        .collect()
}

impl AudioStats {
    pub fn print_summary(&self) {
        println!("Render statistics:");
        println!("  Duration:       {:.3} seconds", self.duration_secs);
        println!("  Samples:        {}", self.sample_count);
        println!("  RMS:            {:.3}", self.rms);
        println!("  Peak:           {:.3}", self.peak);
        println!("  DC offset:      {:.6}", self.dc_offset);
        println!("  Zero crossings: {}", self.zero_crossings);
        println!("  Dominant:       {:.1} Hz", self.dominant_hz);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_stats() {
        let srate = 44100u32;
        let samples: Vec<f32> = (0..srate as usize)
            .map(|i| (std::f32::consts::TAU * 440.0 * i as f32 / srate as f32).sin() * 0.5)
            .collect();
        let stats = analyze(&samples, srate);
        assert!((stats.rms - 0.354).abs() < 0.01, "rms {}", stats.rms);
        assert!((stats.peak - 0.5).abs() < 0.01);
        assert!(stats.dc_offset.abs() < 0.001);
        // Two crossings per cycle.
        let est = stats.zero_crossings as f32 / 2.0;
        assert!((est - 440.0).abs() < 5.0, "zero-crossing estimate {est}");
        assert!(
            (stats.dominant_hz - 440.0).abs() < 10.0,
            "dominant {}",
            stats.dominant_hz
        );
    }

    #[test]
    fn channel_extraction() {
        let interleaved = [100i16, -100, 200, -200];
        let left = channel_f32(&interleaved, 2, 0);
        let right = channel_f32(&interleaved, 2, 1);
        assert_eq!(left.len(), 2);
        assert!(left[0] > 0.0 && right[0] < 0.0);
    }
}
