//! Ramp parameters.
//!
//! A ramp is a time-varying parameter holding a current value, an
//! optional goal with a duration and curve shape, and a sample position
//! within the running goal. Values flagged as ratios are multiplied
//! against a parent-frequency buffer at fill time instead of being used
//! absolutely.

/// Curve shape for the transition from the current value to the goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampCurve {
    /// Hold the current value, stepping to the goal at the end.
    Hold,
    /// Straight line.
    Lin,
    /// Eased start (quarter-cosine).
    Exp,
    /// Eased end, the mirror of `Exp`.
    Log,
    /// True exponential envelope trajectory.
    Xpe,
    /// Point-symmetric counterpart of `Xpe`.
    Lge,
    /// Half-cosine in and out.
    Cos,
}

impl Default for RampCurve {
    fn default() -> Self {
        RampCurve::Lin
    }
}

impl RampCurve {
    pub const ALL: [RampCurve; 7] = [
        RampCurve::Hold,
        RampCurve::Lin,
        RampCurve::Exp,
        RampCurve::Log,
        RampCurve::Xpe,
        RampCurve::Lge,
        RampCurve::Cos,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RampCurve::Hold => "hold",
            RampCurve::Lin => "lin",
            RampCurve::Exp => "exp",
            RampCurve::Log => "log",
            RampCurve::Xpe => "xpe",
            RampCurve::Lge => "lge",
            RampCurve::Cos => "cos",
        }
    }

    pub fn from_name(name: &str) -> Option<RampCurve> {
        RampCurve::ALL.iter().copied().find(|c| c.name() == name)
    }

    /// Evaluate the curve between `v0` and `vt` at normalized time `t`.
    pub fn at(self, v0: f32, vt: f32, t: f32) -> f32 {
        use std::f32::consts::PI;
        let t = t.clamp(0.0, 1.0);
        match self {
            RampCurve::Hold => {
                if t < 1.0 {
                    v0
                } else {
                    vt
                }
            }
            RampCurve::Lin => v0 + (vt - v0) * t,
            RampCurve::Exp => v0 + (vt - v0) * (1.0 - (PI * t * 0.5).cos()),
            RampCurve::Log => v0 + (vt - v0) * (PI * t * 0.5).sin(),
            RampCurve::Xpe => xpe(v0, vt, t),
            RampCurve::Lge => v0 + vt - xpe(v0, vt, 1.0 - t),
            RampCurve::Cos => v0 + (vt - v0) * (1.0 - (PI * t).cos()) * 0.5,
        }
    }
}

/// `v0 * (vt/v0)^t`, falling back to linear when the endpoints cross or
/// touch zero (the ratio form is undefined there).
fn xpe(v0: f32, vt: f32, t: f32) -> f32 {
    if v0 == 0.0 || vt == 0.0 || (v0 < 0.0) != (vt < 0.0) {
        return v0 + (vt - v0) * t;
    }
    v0 * (vt / v0).powf(t)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ramp {
    pub v0: f32,
    pub vt: f32,
    /// Goal duration; rounded to the nearest sample when filling.
    pub time_ms: u32,
    /// Samples elapsed within the running goal.
    pub pos: u32,
    pub curve: RampCurve,
    /// `v0` holds a meaningful value.
    pub state: bool,
    /// `v0` is a multiplier against the parent-frequency buffer.
    pub state_ratio: bool,
    /// A goal is running.
    pub goal: bool,
    /// `vt` is a multiplier against the parent-frequency buffer.
    pub goal_ratio: bool,
    /// The goal duration was given explicitly; otherwise the timing pass
    /// fills it from the operator duration.
    pub time_set: bool,
}

impl Ramp {
    /// Constant-value ramp. NaN is filtered to zero at this boundary.
    pub fn with_value(v: f32) -> Self {
        let mut r = Ramp::default();
        r.set_value(v, false);
        r
    }

    pub fn with_ratio(v: f32) -> Self {
        let mut r = Ramp::default();
        r.set_value(v, true);
        r
    }

    pub fn set_value(&mut self, v: f32, ratio: bool) {
        self.v0 = if v.is_nan() { 0.0 } else { v };
        self.state = true;
        self.state_ratio = ratio;
    }

    pub fn set_goal(&mut self, vt: f32, time_ms: Option<u32>, curve: RampCurve, ratio: bool) {
        self.vt = if vt.is_nan() { 0.0 } else { vt };
        self.goal = true;
        self.goal_ratio = ratio;
        self.curve = curve;
        if let Some(ms) = time_ms {
            self.time_ms = ms;
            self.time_set = true;
        }
        self.pos = 0;
    }

    /// Fill in the goal duration when none was given explicitly.
    pub fn default_time(&mut self, ms: u32) {
        if !self.time_set {
            self.time_ms = ms;
        }
    }

    /// Apply the set parts of `src`: its value when it has state, its
    /// goal (restarting the position) when it has one.
    pub fn copy_from(&mut self, src: &Ramp) {
        if src.state {
            self.set_value(src.v0, src.state_ratio);
        }
        if src.goal {
            self.vt = if src.vt.is_nan() { 0.0 } else { src.vt };
            self.goal = true;
            self.goal_ratio = src.goal_ratio;
            self.curve = src.curve;
            self.time_ms = src.time_ms;
            self.time_set = src.time_set;
            self.pos = 0;
        }
    }

    /// Render `buf.len()` samples of the parameter, advancing the goal
    /// position and committing the goal value once reached. `mul` is the
    /// parent-frequency buffer applied to ratio-flagged endpoints.
    pub fn fill(&mut self, buf: &mut [f32], srate: u32, mul: Option<&[f32]>) {
        let len = buf.len();
        if !self.goal {
            let v = if self.state { self.v0 } else { 0.0 };
            match (self.state_ratio, mul) {
                (true, Some(m)) => {
                    for i in 0..len {
                        buf[i] = v * m[i];
                    }
                }
                _ => {
                    for s in buf.iter_mut() {
                        *s = v;
                    }
                }
            }
            return;
        }
        let time = ms_to_samples(self.time_ms, srate);
        for i in 0..len {
            let p = self.pos.saturating_add(i as u32);
            let t = if time == 0 {
                1.0
            } else {
                (p as f32 / time as f32).min(1.0)
            };
            let va = match (self.state_ratio, mul) {
                (true, Some(m)) => self.v0 * m[i],
                _ => self.v0,
            };
            let vb = match (self.goal_ratio, mul) {
                (true, Some(m)) => self.vt * m[i],
                _ => self.vt,
            };
            buf[i] = self.curve.at(va, vb, t);
        }
        self.pos = self.pos.saturating_add(len as u32);
        if self.pos >= time {
            // Goal reached: the goal value becomes the new state.
            self.v0 = self.vt;
            self.state = true;
            self.state_ratio = self.goal_ratio;
            self.goal = false;
            self.pos = 0;
        }
    }

    /// Current start-of-ramp value, for uses that need a scalar (e.g.
    /// the click-reduction frequency estimate).
    pub fn value(&self) -> f32 {
        self.v0
    }
}

/// Millisecond-to-sample conversion, rounded to the nearest sample.
pub fn ms_to_samples(ms: u32, srate: u32) -> u32 {
    ((ms as u64 * srate as u64 + 500) / 1000) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_endpoints() {
        for &c in RampCurve::ALL.iter() {
            assert!(
                (c.at(0.25, 0.75, 0.0) - 0.25).abs() < 1e-6,
                "{} start",
                c.name()
            );
            assert!(
                (c.at(0.25, 0.75, 1.0) - 0.75).abs() < 1e-6,
                "{} end",
                c.name()
            );
        }
    }

    #[test]
    fn hold_steps_at_end() {
        assert_eq!(RampCurve::Hold.at(1.0, 2.0, 0.999), 1.0);
        assert_eq!(RampCurve::Hold.at(1.0, 2.0, 1.0), 2.0);
    }

    #[test]
    fn xpe_guards_zero_and_sign_change() {
        // Zero endpoint falls back to linear.
        assert!((RampCurve::Xpe.at(0.0, 1.0, 0.5) - 0.5).abs() < 1e-6);
        // Sign change falls back to linear.
        assert!((RampCurve::Xpe.at(-1.0, 1.0, 0.5)).abs() < 1e-6);
        // Proper exponential midpoint is the geometric mean.
        let mid = RampCurve::Xpe.at(1.0, 4.0, 0.5);
        assert!((mid - 2.0).abs() < 1e-5);
    }

    #[test]
    fn fill_constant_and_ratio() {
        let mut r = Ramp::with_value(0.5);
        let mut buf = [0.0f32; 8];
        r.fill(&mut buf, 44100, None);
        assert!(buf.iter().all(|&s| s == 0.5));

        let mut r = Ramp::with_ratio(2.0);
        let mul = [3.0f32; 8];
        r.fill(&mut buf, 44100, Some(&mul));
        assert!(buf.iter().all(|&s| s == 6.0));
    }

    #[test]
    fn fill_goal_commits() {
        let srate = 1000;
        let mut r = Ramp::with_value(0.0);
        r.set_goal(1.0, Some(100), RampCurve::Lin, false);
        let mut buf = [0.0f32; 100];
        r.fill(&mut buf, srate, None);
        assert!((buf[50] - 0.5).abs() < 0.02);
        assert!(!r.goal, "goal should commit at the end");
        assert_eq!(r.v0, 1.0);
        assert_eq!(r.pos, 0);
        // Further fills hold the committed value.
        let mut buf2 = [0.0f32; 10];
        r.fill(&mut buf2, srate, None);
        assert!(buf2.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn fill_is_additive_in_time() {
        let srate = 48000;
        let run = |chunks: &[usize]| -> Vec<f32> {
            let mut r = Ramp::with_value(0.2);
            r.set_goal(0.9, Some(10), RampCurve::Cos, false);
            let mut out = Vec::new();
            for &n in chunks {
                let mut buf = vec![0.0f32; n];
                r.fill(&mut buf, srate, None);
                out.extend_from_slice(&buf);
            }
            out
        };
        let whole = run(&[700]);
        let split = run(&[123, 77, 500]);
        assert_eq!(whole, split);
    }

    #[test]
    fn nan_filtered_at_api() {
        let mut r = Ramp::with_value(f32::NAN);
        assert_eq!(r.v0, 0.0);
        r.set_goal(f32::NAN, Some(10), RampCurve::Lin, false);
        assert_eq!(r.vt, 0.0);
    }

    #[test]
    fn copy_from_applies_set_parts() {
        let mut dst = Ramp::with_value(1.0);
        dst.set_goal(2.0, Some(500), RampCurve::Lin, false);
        dst.pos = 42;

        // A goal-only update keeps the current value but restarts the goal.
        let mut upd = Ramp::default();
        upd.set_goal(3.0, Some(100), RampCurve::Cos, false);
        dst.copy_from(&upd);
        assert_eq!(dst.v0, 1.0);
        assert_eq!(dst.vt, 3.0);
        assert_eq!(dst.time_ms, 100);
        assert_eq!(dst.pos, 0);
        assert_eq!(dst.curve, RampCurve::Cos);

        // A value-only update leaves the goal alone.
        let upd = Ramp::with_value(0.1);
        let mut dst2 = Ramp::with_value(0.9);
        dst2.copy_from(&upd);
        assert_eq!(dst2.v0, 0.1);
        assert!(!dst2.goal);
    }
}
