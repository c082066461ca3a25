//! SAU score text front-end.
//!
//! Hand-rolled single-pass parser producing the score tree the timing
//! passes consume. The accepted subset:
//!
//! ```text
//! /NUM            wait NUM seconds before the next event
//! |               close a duration group
//! S t2 f220 a0.5  set script defaults (time/frequency/amplitude)
//! Wsin 'lbl ...   new wave operator (sin/sqr/tri/saw/par/hsn), labeled
//! N ... / L ...   new noise / line operator
//! @lbl ...        update a labeled operator
//! ; ...           composite follow-on step (after the previous step)
//! ;/NUM ...       gap-shifted follow-on step (NUM seconds after start)
//! ```
//!
//! Parameters: `f`/`r` frequency (absolute / ratio of parent), `a`
//! amplitude, `p` phase in cycles, `b` pan, `t` time seconds (`ti`
//! implicit, `tl` linked), `s` silence seconds, `w` wave type. A value
//! is `NUM`, optionally `>GOAL/SECONDS[curve]`, optionally `,NUM...`
//! for the modulation far endpoint. A `[...]` after `f`/`r`, `p` or `a`
//! holds that parameter's modulator list.

use std::collections::HashMap;

use crate::ramp::{Ramp, RampCurve};
use crate::score::{Fork, ModList, ObjId, OpKind, OpParams, OpRef, Score, ScoreEvent, Time, UseType};
use crate::wave::WaveType;

/// Parse score text into a score tree.
pub fn parse_score(src: &str, name: &str) -> Result<Score, String> {
    let mut p = Parser {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        col: 1,
        score: Score::new(name),
        labels: HashMap::new(),
        group: 0,
        pending_wave: None,
    };
    p.parse_top()?;
    Ok(p.score)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    score: Score,
    labels: HashMap<String, ObjId>,
    group: u32,
    /// Wave named on a `W` intro, picked up as the initial wave param.
    pending_wave: Option<WaveType>,
}

impl Parser {
    fn parse_top(&mut self) -> Result<(), String> {
        let mut pending_wait_ms = 0u32;
        loop {
            self.skip_ws();
            let Some(c) = self.peek() else { break };
            match c {
                '/' => {
                    self.advance();
                    let secs = self.number()?;
                    pending_wait_ms = pending_wait_ms.saturating_add(secs_to_ms(secs)?);
                }
                '|' => {
                    self.advance();
                    self.group += 1;
                }
                'S' => {
                    self.advance();
                    self.parse_settings()?;
                }
                'W' | 'N' | 'L' | '@' => {
                    let ev = self.parse_event(pending_wait_ms)?;
                    pending_wait_ms = 0;
                    self.score.events.push(ev);
                }
                c => return Err(self.err(&format!("unexpected '{}'", c))),
            }
        }
        Ok(())
    }

    /// `S` statement: adjust script defaults for subsequent operators.
    fn parse_settings(&mut self) -> Result<(), String> {
        loop {
            self.skip_ws();
            match self.peek() {
                Some('t') => {
                    self.advance();
                    let secs = self.number()?;
                    self.score.default_time_ms = secs_to_ms(secs)?;
                }
                Some('f') => {
                    self.advance();
                    self.score.default_freq = self.number()? as f32;
                }
                Some('a') => {
                    self.advance();
                    self.score.default_amp = self.number()? as f32;
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn parse_event(&mut self, wait_ms: u32) -> Result<ScoreEvent, String> {
        let mut ev = ScoreEvent::new(wait_ms, self.group);
        let (obj, first) = self.parse_intro(UseType::Carr, false)?;
        let use_type = self.score.objs[obj].use_type;
        let nested = self.score.objs[obj].nested;
        let mut r = OpRef {
            obj,
            use_type,
            nested,
            first,
            params: OpParams::default(),
            mods: Vec::new(),
        };
        self.parse_params(&mut r)?;
        if first {
            // Script defaults in force at this point in the text.
            if r.params.amp.is_none() {
                r.params.amp = Some(Ramp::with_value(self.score.default_amp));
            }
            if r.params.freq.is_none() && self.score.objs[obj].kind == OpKind::Wave {
                r.params.freq = Some(Ramp::with_value(self.score.default_freq));
            }
        }
        ev.refs.push(r);

        // Composite follow-on steps become a fork chain.
        let mut steps: Vec<ScoreEvent> = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some(';') {
                break;
            }
            self.advance();
            let mut fev = ScoreEvent::new(0, self.group);
            if self.peek() == Some('/') {
                self.advance();
                let secs = self.number()?;
                fev.wait_ms = secs_to_ms(secs)?;
                fev.from_gapshift = true;
            } else {
                fev.wait_prev_dur = true;
            }
            let mut sr = OpRef {
                obj,
                use_type,
                nested,
                first: false,
                params: OpParams::default(),
                mods: Vec::new(),
            };
            self.parse_params(&mut sr)?;
            fev.refs.push(sr);
            steps.push(fev);
        }
        if !steps.is_empty() {
            ev.forks.push(Fork { events: steps });
        }
        Ok(ev)
    }

    /// `W<wave>`, `N`, `L` (optionally labeled) or `@label`. Returns the
    /// object and whether this reference creates it.
    fn parse_intro(&mut self, use_type: UseType, nested: bool) -> Result<(ObjId, bool), String> {
        let c = self.peek().ok_or_else(|| self.err("expected operator"))?;
        self.advance();
        match c {
            '@' => {
                let label = self.ident()?;
                let obj = *self
                    .labels
                    .get(&label)
                    .ok_or_else(|| self.err(&format!("unknown operator '{}'", label)))?;
                Ok((obj, false))
            }
            'W' | 'N' | 'L' => {
                let (kind, wave) = match c {
                    'W' => {
                        let name = self.ident()?;
                        let wave = WaveType::from_name(&name)
                            .ok_or_else(|| self.err(&format!("unknown wave type '{}'", name)))?;
                        (OpKind::Wave, Some(wave))
                    }
                    'N' => (OpKind::Noise, None),
                    _ => (OpKind::Line, None),
                };
                let label = if self.peek() == Some('\'') {
                    self.advance();
                    Some(self.ident()?)
                } else {
                    None
                };
                let obj = self.score.add_obj(kind, label.clone(), use_type, nested);
                if let Some(label) = label {
                    if self.labels.insert(label.clone(), obj).is_some() {
                        return Err(self.err(&format!("duplicate label '{}'", label)));
                    }
                }
                // The wave name on the intro is the initial wave param.
                self.pending_wave = wave;
                Ok((obj, true))
            }
            c => Err(self.err(&format!("expected operator, found '{}'", c))),
        }
    }

    fn parse_params(&mut self, r: &mut OpRef) -> Result<(), String> {
        if let Some(w) = self.pending_wave.take() {
            r.params.wave = Some(w);
        }
        loop {
            self.skip_ws();
            let Some(c) = self.peek() else { break };
            match c {
                'f' | 'r' => {
                    self.advance();
                    let ratio = c == 'r';
                    let v = self.parse_value(ratio, true)?;
                    if let Some(ramp) = v.primary {
                        r.params.freq = Some(merge(r.params.freq, ramp));
                    }
                    if let Some(ramp) = v.second {
                        r.params.freq2 = Some(merge(r.params.freq2, ramp));
                    }
                    if self.peek() == Some('[') {
                        let refs = self.parse_sublist(UseType::Fmod)?;
                        set_mods(r, UseType::Fmod, refs);
                    }
                }
                'a' => {
                    self.advance();
                    let v = self.parse_value(false, true)?;
                    if let Some(ramp) = v.primary {
                        r.params.amp = Some(merge(r.params.amp, ramp));
                    }
                    if let Some(ramp) = v.second {
                        r.params.amp2 = Some(merge(r.params.amp2, ramp));
                    }
                    if self.peek() == Some('[') {
                        let refs = self.parse_sublist(UseType::Amod)?;
                        set_mods(r, UseType::Amod, refs);
                    }
                }
                'p' => {
                    self.advance();
                    if self.peek() != Some('[') {
                        let cycles = self.number()?;
                        r.params.phase = Some(cycles);
                    }
                    if self.peek() == Some('[') {
                        let refs = self.parse_sublist(UseType::Pmod)?;
                        set_mods(r, UseType::Pmod, refs);
                    }
                }
                'b' => {
                    self.advance();
                    let v = self.parse_value(false, false)?;
                    if let Some(ramp) = v.primary {
                        r.params.pan = Some(merge(r.params.pan, ramp));
                    } else {
                        return Err(self.err("expected pan value"));
                    }
                }
                't' => {
                    self.advance();
                    r.params.time = Some(match self.peek() {
                        Some('i') => {
                            self.advance();
                            Time::implicit()
                        }
                        Some('l') => {
                            self.advance();
                            Time::linked()
                        }
                        _ => {
                            let secs = self.number()?;
                            Time::with_ms(secs_to_ms(secs)?)
                        }
                    });
                }
                's' => {
                    self.advance();
                    let secs = self.number()?;
                    r.params.silence_ms = Some(secs_to_ms(secs)?);
                }
                'w' => {
                    self.advance();
                    let name = self.ident()?;
                    let wave = WaveType::from_name(&name)
                        .ok_or_else(|| self.err(&format!("unknown wave type '{}'", name)))?;
                    r.params.wave = Some(wave);
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn parse_sublist(&mut self, use_type: UseType) -> Result<Vec<OpRef>, String> {
        self.advance(); // '['
        let mut refs = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(']') => {
                    self.advance();
                    break;
                }
                Some('W') | Some('N') | Some('L') | Some('@') => {
                    let (obj, first) = self.parse_intro(use_type, true)?;
                    let mut r = OpRef {
                        obj,
                        use_type,
                        nested: true,
                        first,
                        params: OpParams::default(),
                        mods: Vec::new(),
                    };
                    self.parse_params(&mut r)?;
                    refs.push(r);
                }
                Some(c) => return Err(self.err(&format!("unexpected '{}' in modulator list", c))),
                None => return Err(self.err("unterminated modulator list")),
            }
        }
        Ok(refs)
    }

    /// `NUM [>GOAL/SECS[curve]] [,NUM [>GOAL/SECS[curve]]]`, all parts
    /// optional from the front.
    fn parse_value(&mut self, ratio: bool, allow_second: bool) -> Result<Value, String> {
        let primary = self.parse_ramp_part(ratio)?;
        let mut second = None;
        if allow_second && self.peek() == Some(',') {
            self.advance();
            second = self.parse_ramp_part(ratio)?;
            if second.is_none() {
                return Err(self.err("expected value after ','"));
            }
        }
        Ok(Value { primary, second })
    }

    fn parse_ramp_part(&mut self, ratio: bool) -> Result<Option<Ramp>, String> {
        let mut ramp = Ramp::default();
        let mut any = false;
        if matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '-' || c == '.') {
            let v = self.number()?;
            ramp.set_value(v as f32, ratio);
            any = true;
        }
        if self.peek() == Some('>') {
            self.advance();
            let goal = self.number()?;
            if self.peek() != Some('/') {
                return Err(self.err("expected '/' and ramp time after goal value"));
            }
            self.advance();
            let secs = self.number()?;
            let curve = if matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
                let name = self.ident()?;
                RampCurve::from_name(&name)
                    .ok_or_else(|| self.err(&format!("unknown curve '{}'", name)))?
            } else {
                RampCurve::Lin
            };
            ramp.set_goal(goal as f32, Some(secs_to_ms(secs)?), curve, ratio);
            any = true;
        }
        Ok(if any { Some(ramp) } else { None })
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.advance();
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.advance();
        }
        if self.pos == start {
            return Err(self.err("expected a number"));
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|_| self.err(&format!("bad number '{}'", text)))
    }

    fn ident(&mut self) -> Result<String, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.advance();
        }
        if self.pos == start {
            return Err(self.err("expected a name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn skip_ws(&mut self) {
        loop {
            match self.peek() {
                Some('#') => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.advance();
                    }
                }
                Some(c) if c.is_whitespace() => self.advance(),
                _ => break,
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) {
        if let Some(&c) = self.chars.get(self.pos) {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn err(&self, msg: &str) -> String {
        format!("line {}, col {}: {}", self.line, self.col, msg)
    }
}

struct Value {
    primary: Option<Ramp>,
    second: Option<Ramp>,
}

/// Combine value and goal given in separate mentions of one parameter.
fn merge(prev: Option<Ramp>, new: Ramp) -> Ramp {
    match prev {
        Some(mut r) => {
            r.copy_from(&new);
            r
        }
        None => new,
    }
}

fn set_mods(r: &mut OpRef, use_type: UseType, refs: Vec<OpRef>) {
    r.mods.push(ModList { use_type, refs });
}

fn secs_to_ms(secs: f64) -> Result<u32, String> {
    if !(secs >= 0.0) || secs > 4.0e6 {
        return Err(format!("time {} out of range", secs));
    }
    Ok((secs * 1000.0).round() as u32)
}
