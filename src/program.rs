//! Program: the flat, identifier-addressed form a timed score compiles
//! to, and the builder that produces it.
//!
//! Events carry partial parameter updates against operators addressed
//! by dense IDs. The first event for an operator creates it with a full
//! parameter set; later events update subsets. Modulator lists are
//! interned into one table, with index 0 reserved for the empty list.

use std::collections::HashMap;

use crate::ramp::Ramp;
use crate::score::{ObjId, OpKind, OpRef, Score, UseType};
use crate::wave::WaveType;
use tracing::debug;

pub type OpId = u32;

/// The empty modulator list.
pub const EMPTY_MODS: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundKind {
    Wave,
    Noise,
    Line,
}

/// Partial operator parameters; `None` fields are untouched by the
/// event. Create events carry every field the operator kind has.
#[derive(Debug, Clone, Default)]
pub struct OpParams {
    pub time_ms: Option<u32>,
    pub silence_ms: Option<u32>,
    pub wave: Option<WaveType>,
    /// Phase in cycles.
    pub phase: Option<f64>,
    /// Frequency for wave operators, value for line operators.
    pub freq: Option<Ramp>,
    /// Frequency-modulation far endpoint.
    pub freq2: Option<Ramp>,
    pub amp: Option<Ramp>,
    /// Amplitude-modulation far endpoint.
    pub amp2: Option<Ramp>,
    pub pan: Option<Ramp>,
    pub fmods: Option<u32>,
    pub pmods: Option<u32>,
    pub amods: Option<u32>,
}

#[derive(Debug, Clone)]
pub enum OpData {
    Create {
        op: OpId,
        kind: SoundKind,
        carrier: bool,
        params: OpParams,
    },
    Update {
        op: OpId,
        params: OpParams,
    },
}

impl OpData {
    pub fn op(&self) -> OpId {
        match self {
            OpData::Create { op, .. } | OpData::Update { op, .. } => *op,
        }
    }

    pub fn params(&self) -> &OpParams {
        match self {
            OpData::Create { params, .. } | OpData::Update { params, .. } => params,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub wait_ms: u32,
    pub voice: u16,
    pub ops: Vec<OpData>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunMode {
    /// Scale output by 1/voice_count.
    pub amp_div_voices: bool,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub events: Vec<Event>,
    /// Interned modulator lists; index 0 is the empty list.
    pub mod_lists: Vec<Vec<OpId>>,
    pub voice_count: u16,
    pub op_count: u32,
    pub mode: RunMode,
    pub duration_ms: u32,
}

struct Build {
    op_ids: HashMap<ObjId, OpId>,
    voice_of_obj: HashMap<ObjId, u16>,
    op_count: u32,
    voice_count: u16,
    mod_lists: Vec<Vec<OpId>>,
    interned: HashMap<Vec<OpId>, u32>,
}

/// Linearize a timed score into a program.
pub fn build_program(score: &Score, mode: RunMode) -> Result<Program, String> {
    let mut b = Build {
        op_ids: HashMap::new(),
        voice_of_obj: HashMap::new(),
        op_count: 0,
        voice_count: 0,
        mod_lists: vec![Vec::new()],
        interned: HashMap::new(),
    };
    let mut events = Vec::with_capacity(score.events.len());
    for ev in &score.events {
        let mut ops = Vec::new();
        let mut ev_voice: Option<u16> = None;
        for r in &ev.refs {
            let voice = b.voice_for(score, r)?;
            match ev_voice {
                None => ev_voice = Some(voice),
                Some(v) if v != voice => {
                    return Err("event addresses more than one voice".to_string())
                }
                _ => {}
            }
            b.visit_ref(score, r, voice, &mut ops)?;
        }
        let voice = ev_voice.ok_or("event without operator references")?;
        events.push(Event {
            wait_ms: ev.wait_ms,
            voice,
            ops,
        });
    }
    debug!(
        "built program '{}': {} events, {} ops, {} voices, {} mod lists",
        score.name,
        events.len(),
        b.op_count,
        b.voice_count,
        b.mod_lists.len()
    );
    Ok(Program {
        name: score.name.clone(),
        events,
        mod_lists: b.mod_lists,
        voice_count: b.voice_count,
        op_count: b.op_count,
        mode,
        duration_ms: score.duration_ms,
    })
}

impl Build {
    /// Voice for a top-level reference: carriers get a fresh voice on
    /// first appearance, updates reuse the one recorded at creation.
    fn voice_for(&mut self, score: &Score, r: &OpRef) -> Result<u16, String> {
        if let Some(&v) = self.voice_of_obj.get(&r.obj) {
            return Ok(v);
        }
        if !r.first {
            return Err(format!(
                "update of never-created operator{}",
                label_note(score, r.obj)
            ));
        }
        let v = self.voice_count;
        self.voice_count = self
            .voice_count
            .checked_add(1)
            .ok_or("too many voices in score")?;
        self.voice_of_obj.insert(r.obj, v);
        Ok(v)
    }

    fn visit_ref(
        &mut self,
        score: &Score,
        r: &OpRef,
        voice: u16,
        out: &mut Vec<OpData>,
    ) -> Result<(), String> {
        let kind = kind_of(score, r.obj);

        // Assign the ID up front so list members may refer back to the
        // operator under construction (cyclic graphs are data-legal).
        let op = if r.first {
            if self.op_ids.contains_key(&r.obj) {
                return Err(format!("operator created twice{}", label_note(score, r.obj)));
            }
            let op = self.op_count;
            self.op_count = self
                .op_count
                .checked_add(1)
                .ok_or("too many operators in score")?;
            self.op_ids.insert(r.obj, op);
            op
        } else {
            *self.op_ids.get(&r.obj).ok_or_else(|| {
                format!("update of never-created operator{}", label_note(score, r.obj))
            })?
        };

        let mut fmods = None;
        let mut pmods = None;
        let mut amods = None;
        for list in &r.mods {
            let mut ids = Vec::with_capacity(list.refs.len());
            for c in &list.refs {
                self.voice_of_obj.entry(c.obj).or_insert(voice);
                self.visit_ref(score, c, voice, out)?;
                ids.push(self.op_ids[&c.obj]);
            }
            let lid = self.intern(ids);
            match list.use_type {
                UseType::Fmod => fmods = Some(lid),
                UseType::Pmod => pmods = Some(lid),
                UseType::Amod => amods = Some(lid),
                UseType::Carr => {
                    return Err("carrier use inside a modulator list".to_string());
                }
            }
        }
        if kind != SoundKind::Wave && (fmods.is_some() || pmods.is_some()) {
            return Err(format!(
                "frequency/phase modulators on a non-oscillator operator{}",
                label_note(score, r.obj)
            ));
        }

        let carrier = !r.nested && r.use_type == UseType::Carr;
        if r.first {
            let params = self.create_params(score, r, kind, carrier, fmods, pmods, amods)?;
            out.push(OpData::Create {
                op,
                kind,
                carrier,
                params,
            });
        } else {
            let params = self.update_params(score, r, kind, carrier, fmods, pmods, amods)?;
            if !params_empty(&params) {
                out.push(OpData::Update { op, params });
            }
        }
        Ok(())
    }

    /// Full parameter set for a create event, defaults filled in.
    fn create_params(
        &mut self,
        score: &Score,
        r: &OpRef,
        kind: SoundKind,
        carrier: bool,
        fmods: Option<u32>,
        pmods: Option<u32>,
        amods: Option<u32>,
    ) -> Result<OpParams, String> {
        let sp = &r.params;
        let mut p = OpParams::default();
        p.time_ms = Some(sp.time.map(|t| t.ms).unwrap_or(score.default_time_ms));
        p.silence_ms = Some(sp.silence_ms.unwrap_or(0));
        p.amp = Some(sp.amp.unwrap_or_else(|| Ramp::with_value(score.default_amp)));
        p.amp2 = Some(sp.amp2.unwrap_or_else(|| Ramp::with_value(0.0)));
        p.amods = Some(amods.unwrap_or(EMPTY_MODS));
        if carrier {
            let pan = sp.pan.unwrap_or_else(|| Ramp::with_value(0.0));
            check_carrier_pan(&pan)?;
            p.pan = Some(pan);
        } else if sp.pan.is_some() {
            return Err(format!(
                "pan on a modulator operator{}",
                label_note(score, r.obj)
            ));
        }
        match kind {
            SoundKind::Wave => {
                let freq = sp.freq.unwrap_or_else(|| {
                    if r.nested {
                        Ramp::with_ratio(1.0)
                    } else {
                        Ramp::with_value(score.default_freq)
                    }
                });
                if carrier && (freq.state_ratio || freq.goal_ratio) {
                    return Err(format!(
                        "ratio frequency on a carrier{}",
                        label_note(score, r.obj)
                    ));
                }
                let freq2 = sp.freq2.unwrap_or_else(|| {
                    if freq.state_ratio {
                        Ramp::with_ratio(freq.v0)
                    } else {
                        Ramp::with_value(freq.v0)
                    }
                });
                p.freq = Some(freq);
                p.freq2 = Some(freq2);
                p.wave = Some(sp.wave.unwrap_or(WaveType::Sin));
                p.phase = Some(sp.phase.unwrap_or(0.0));
                p.fmods = Some(fmods.unwrap_or(EMPTY_MODS));
                p.pmods = Some(pmods.unwrap_or(EMPTY_MODS));
            }
            SoundKind::Line => {
                p.freq = Some(sp.freq.unwrap_or_else(|| Ramp::with_value(1.0)));
            }
            SoundKind::Noise => {}
        }
        Ok(p)
    }

    /// Partial parameter set for an update event: only what the
    /// reference touched.
    fn update_params(
        &mut self,
        score: &Score,
        r: &OpRef,
        kind: SoundKind,
        carrier: bool,
        fmods: Option<u32>,
        pmods: Option<u32>,
        amods: Option<u32>,
    ) -> Result<OpParams, String> {
        let sp = &r.params;
        if sp.pan.is_some() && !carrier {
            return Err(format!(
                "pan on a modulator operator{}",
                label_note(score, r.obj)
            ));
        }
        if kind != SoundKind::Wave && (sp.wave.is_some() || sp.phase.is_some()) {
            return Err(format!(
                "oscillator parameter on a non-oscillator operator{}",
                label_note(score, r.obj)
            ));
        }
        if let Some(pan) = &sp.pan {
            check_carrier_pan(pan)?;
        }
        Ok(OpParams {
            time_ms: sp.time.map(|t| t.ms),
            silence_ms: sp.silence_ms,
            wave: sp.wave,
            phase: sp.phase,
            freq: sp.freq,
            freq2: sp.freq2,
            amp: sp.amp,
            amp2: sp.amp2,
            pan: sp.pan,
            fmods,
            pmods,
            amods,
        })
    }

    fn intern(&mut self, ids: Vec<OpId>) -> u32 {
        if ids.is_empty() {
            return EMPTY_MODS;
        }
        if let Some(&id) = self.interned.get(&ids) {
            return id;
        }
        let id = self.mod_lists.len() as u32;
        self.mod_lists.push(ids.clone());
        self.interned.insert(ids, id);
        id
    }
}

fn kind_of(score: &Score, obj: ObjId) -> SoundKind {
    match score.objs[obj].kind {
        OpKind::Wave => SoundKind::Wave,
        OpKind::Noise => SoundKind::Noise,
        OpKind::Line => SoundKind::Line,
    }
}

fn label_note(score: &Score, obj: ObjId) -> String {
    match &score.objs[obj].label {
        Some(l) => format!(" '{}'", l),
        None => String::new(),
    }
}

/// A bare back-reference contributes its ID to a list without carrying
/// an update of its own.
fn params_empty(p: &OpParams) -> bool {
    p.time_ms.is_none()
        && p.silence_ms.is_none()
        && p.wave.is_none()
        && p.phase.is_none()
        && p.freq.is_none()
        && p.freq2.is_none()
        && p.amp.is_none()
        && p.amp2.is_none()
        && p.pan.is_none()
        && p.fmods.is_none()
        && p.pmods.is_none()
        && p.amods.is_none()
}

fn check_carrier_pan(pan: &Ramp) -> Result<(), String> {
    if pan.state_ratio || pan.goal_ratio {
        return Err("ratio value for pan".to_string());
    }
    Ok(())
}
