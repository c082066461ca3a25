//! Process-wide wavetables.
//!
//! Two table families per wave type: a plain lookup table for direct
//! (naive) oscillation, and a pre-integrated table (PILUT) whose first
//! differences yield a bandlimited waveform. Both are built once at
//! startup and shared read-only by every generator in the process.

use lazy_static::lazy_static;

/// Table length; the top 11 bits of a 32-bit phase select the entry.
pub const LUT_LEN: usize = 2048;
/// Index mask for wrapping table positions.
pub const LUT_MASK: usize = LUT_LEN - 1;
/// Low bits of a 32-bit phase used as the interpolation fraction.
pub const SCALE_BITS: u32 = 21;

const FRAC_MASK: u32 = (1 << SCALE_BITS) - 1;
const FRAC_SCALE: f64 = (1u32 << SCALE_BITS) as f64;

/// Waveform selector for oscillator operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveType {
    Sin,
    Sqr,
    Tri,
    Saw,
    Par,
    Hsn,
}

impl WaveType {
    pub const ALL: [WaveType; 6] = [
        WaveType::Sin,
        WaveType::Sqr,
        WaveType::Tri,
        WaveType::Saw,
        WaveType::Par,
        WaveType::Hsn,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WaveType::Sin => "sin",
            WaveType::Sqr => "sqr",
            WaveType::Tri => "tri",
            WaveType::Saw => "saw",
            WaveType::Par => "par",
            WaveType::Hsn => "hsn",
        }
    }

    pub fn from_name(name: &str) -> Option<WaveType> {
        WaveType::ALL.iter().copied().find(|w| w.name() == name)
    }

    fn index(self) -> usize {
        match self {
            WaveType::Sin => 0,
            WaveType::Sqr => 1,
            WaveType::Tri => 2,
            WaveType::Saw => 3,
            WaveType::Par => 4,
            WaveType::Hsn => 5,
        }
    }

    /// Ideal waveform value at phase `x` in cycles (0.0 to 1.0).
    fn ideal(self, x: f64) -> f64 {
        use std::f64::consts::TAU;
        match self {
            WaveType::Sin => (TAU * x).sin(),
            WaveType::Sqr => {
                if x < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            WaveType::Tri => {
                if x < 0.25 {
                    4.0 * x
                } else if x < 0.75 {
                    2.0 - 4.0 * x
                } else {
                    4.0 * x - 4.0
                }
            }
            WaveType::Saw => 2.0 * x - 1.0,
            WaveType::Par => 1.0 - 8.0 * (x - 0.5) * (x - 0.5),
            WaveType::Hsn => {
                if x < 0.5 {
                    2.0 * (TAU * x).sin() - 1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

/// The shared table set. One plain LUT and one pre-integrated LUT per
/// wave type, plus the DC term split out of each integral so that the
/// pre-integrated tables stay periodic.
pub struct WaveTables {
    luts: Vec<Vec<f32>>,
    piluts: Vec<Vec<f64>>,
    dc: Vec<f64>,
}

lazy_static! {
    static ref WAVES: WaveTables = WaveTables::build();
}

/// Access the process-wide tables, initializing them on first use.
pub fn tables() -> &'static WaveTables {
    &WAVES
}

impl WaveTables {
    fn build() -> Self {
        let mut luts = Vec::with_capacity(WaveType::ALL.len());
        let mut piluts = Vec::with_capacity(WaveType::ALL.len());
        let mut dc = Vec::with_capacity(WaveType::ALL.len());
        for &w in WaveType::ALL.iter() {
            let samples: Vec<f64> = (0..LUT_LEN)
                .map(|i| w.ideal(i as f64 / LUT_LEN as f64))
                .collect();
            let mean = samples.iter().sum::<f64>() / LUT_LEN as f64;

            // Integral of (f - mean), left-rectangle rule, so that the first
            // difference over one table step reproduces the sample exactly.
            let mut pilut = vec![0.0f64; LUT_LEN];
            let mut acc = 0.0f64;
            for i in 0..LUT_LEN {
                pilut[i] = acc;
                acc += (samples[i] - mean) / LUT_LEN as f64;
            }
            // acc is the residual of the full cycle; spread it so the table
            // wraps to exactly zero.
            for (i, v) in pilut.iter_mut().enumerate() {
                *v -= acc * (i as f64 / LUT_LEN as f64);
            }

            luts.push(samples.iter().map(|&s| s as f32).collect());
            piluts.push(pilut);
            dc.push(mean);
        }
        WaveTables { luts, piluts, dc }
    }

    /// Direct table lookup with linear interpolation.
    pub fn naive(&self, w: WaveType, phase: u32) -> f32 {
        let lut = &self.luts[w.index()];
        let idx = (phase >> SCALE_BITS) as usize;
        let frac = (phase & FRAC_MASK) as f64 / FRAC_SCALE;
        let a = lut[idx & LUT_MASK] as f64;
        let b = lut[(idx + 1) & LUT_MASK] as f64;
        (a + (b - a) * frac) as f32
    }

    /// Pre-integrated table lookup, Catmull-Rom interpolated between the
    /// integral samples.
    pub fn pre_integrated(&self, w: WaveType, phase: u32) -> f64 {
        let lut = &self.piluts[w.index()];
        let idx = (phase >> SCALE_BITS) as usize;
        let t = (phase & FRAC_MASK) as f64 / FRAC_SCALE;
        let p0 = lut[(idx + LUT_LEN - 1) & LUT_MASK];
        let p1 = lut[idx & LUT_MASK];
        let p2 = lut[(idx + 1) & LUT_MASK];
        let p3 = lut[(idx + 2) & LUT_MASK];
        p1 + 0.5
            * t
            * (p2 - p0
                + t * (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3 + t * (3.0 * (p1 - p2) + p3 - p0)))
    }

    /// DC term of a waveform, added back after differentiating the
    /// pre-integrated table.
    pub fn dc(&self, w: WaveType) -> f64 {
        self.dc[w.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_table_quarter_points() {
        let t = tables();
        assert!(t.naive(WaveType::Sin, 0).abs() < 1e-6);
        assert!((t.naive(WaveType::Sin, 1 << 30) - 1.0).abs() < 1e-3);
        assert!(t.naive(WaveType::Sin, 1 << 31).abs() < 1e-3);
    }

    #[test]
    fn dc_terms() {
        let t = tables();
        assert!(t.dc(WaveType::Sin).abs() < 1e-9);
        assert!(t.dc(WaveType::Sqr).abs() < 1e-9);
        // Half-rectified sine rides below center by 1 - 2/pi.
        let expect = 2.0 / std::f64::consts::PI - 1.0;
        assert!((t.dc(WaveType::Hsn) - expect).abs() < 1e-2);
    }

    #[test]
    fn pre_integrated_difference_recovers_waveform() {
        let t = tables();
        for &w in WaveType::ALL.iter() {
            // Step exactly one table entry at a time; the first difference
            // plus the DC term must reproduce the plain table.
            let step = 1u32 << SCALE_BITS;
            let mut prev = t.pre_integrated(w, 0);
            for i in 1..LUT_LEN {
                let phase = (i as u32).wrapping_mul(step);
                let cur = t.pre_integrated(w, phase);
                let s = (cur - prev) / (step as f64 / 4294967296.0) + t.dc(w);
                let want = t.naive(w, phase.wrapping_sub(step)) as f64;
                assert!(
                    (s - want).abs() < 1e-3,
                    "{} at entry {}: got {}, want {}",
                    w.name(),
                    i,
                    s,
                    want
                );
                prev = cur;
            }
        }
    }

    #[test]
    fn wave_names_round_trip() {
        for &w in WaveType::ALL.iter() {
            assert_eq!(WaveType::from_name(w.name()), Some(w));
        }
        assert_eq!(WaveType::from_name("nope"), None);
    }
}
