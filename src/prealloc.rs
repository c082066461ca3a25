//! Pre-allocation: the program becomes runtime-ready node arrays, and
//! the scratch arena is sized to the worst-case traversal any voice's
//! modulator graph can require.
//!
//! The counting function here mirrors the block engine's buffer-slot
//! discipline exactly; the two must change together.

use crate::osc::Osc;
use crate::program::{OpData, OpId, Program, SoundKind, EMPTY_MODS};
use crate::ramp::{ms_to_samples, Ramp};
use tracing::debug;

/// Samples per processing block.
pub const BUF_LEN: usize = 256;
/// One scratch buffer.
pub type Buf = [f32; BUF_LEN];
/// Phase scratch, kept parallel to the float arena for wave levels.
pub type PhaseBuf = [u32; BUF_LEN];

/// Runtime operator state.
#[derive(Debug, Clone)]
pub struct OperatorNode {
    /// Sounding frames of the current activation.
    pub time: u32,
    /// Frames of silence before the sound within the activation.
    pub silence: u32,
    pub amp: Ramp,
    pub amp2: Ramp,
    pub pan: Ramp,
    pub amods: u32,
    pub carrier: bool,
    pub variant: OpVariant,
}

#[derive(Debug, Clone)]
pub enum OpVariant {
    Wave {
        osc: Osc,
        freq: Ramp,
        freq2: Ramp,
        fmods: u32,
        pmods: u32,
    },
    Noise {
        rng: u32,
    },
    Line {
        value: Ramp,
    },
}

impl OperatorNode {
    fn new(kind: SoundKind, carrier: bool, seed: u32) -> OperatorNode {
        let variant = match kind {
            SoundKind::Wave => OpVariant::Wave {
                osc: Osc::default(),
                freq: Ramp::default(),
                freq2: Ramp::default(),
                fmods: EMPTY_MODS,
                pmods: EMPTY_MODS,
            },
            SoundKind::Noise => OpVariant::Noise {
                // Seeded from the operator ID so re-renders are
                // bit-identical; xorshift needs a nonzero state.
                rng: seed.wrapping_mul(0x9e3779b9) | 1,
            },
            SoundKind::Line => OpVariant::Line {
                value: Ramp::default(),
            },
        };
        OperatorNode {
            time: 0,
            silence: 0,
            amp: Ramp::default(),
            amp2: Ramp::default(),
            pan: Ramp::default(),
            amods: EMPTY_MODS,
            carrier,
            variant,
        }
    }

    /// Full activation length in frames.
    pub fn total_frames(&self) -> u64 {
        self.silence as u64 + self.time as u64
    }

    pub fn kind(&self) -> SoundKind {
        match self.variant {
            OpVariant::Wave { .. } => SoundKind::Wave,
            OpVariant::Noise { .. } => SoundKind::Noise,
            OpVariant::Line { .. } => SoundKind::Line,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoiceNode {
    /// Root carrier operator.
    pub root: OpId,
    /// Event currently rendering this voice.
    pub current_ev: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct EventNode {
    pub prog_ev: usize,
    /// Negative while the event is pending; its magnitude is the
    /// remaining delay in frames. Non-negative once fired: frames
    /// rendered of the activation.
    pub pos: i64,
    pub prepared: bool,
    pub active: bool,
    pub voice: u16,
}

/// Everything the generator needs, built once per render.
pub struct PreAlloc {
    pub ops: Vec<Option<OperatorNode>>,
    pub voices: Vec<VoiceNode>,
    pub events: Vec<EventNode>,
    pub mod_lists: Vec<Vec<OpId>>,
    pub max_bufs: usize,
}

impl PreAlloc {
    pub fn build(prog: &Program, srate: u32) -> Result<PreAlloc, String> {
        let op_count = prog.op_count as usize;
        for (li, list) in prog.mod_lists.iter().enumerate() {
            for &m in list {
                if m as usize >= op_count {
                    return Err(format!(
                        "modulator list {} references non-existent operator {}",
                        li, m
                    ));
                }
            }
        }

        let mut ops: Vec<Option<OperatorNode>> = vec![None; op_count];
        let mut voices = vec![
            VoiceNode {
                root: 0,
                current_ev: None,
            };
            prog.voice_count as usize
        ];
        let mut voice_rooted = vec![false; prog.voice_count as usize];
        let mut events = Vec::with_capacity(prog.events.len());
        // Worst-case modulator lists ever assigned to each operator slot.
        let mut slot_lists: Vec<[Vec<u32>; 3]> = vec![Default::default(); op_count];

        for (i, ev) in prog.events.iter().enumerate() {
            if ev.voice >= prog.voice_count {
                return Err(format!("event {} references non-existent voice {}", i, ev.voice));
            }
            for od in &ev.ops {
                let op = od.op() as usize;
                if op >= op_count {
                    return Err(format!("event {} references non-existent operator {}", i, op));
                }
                if let OpData::Create { kind, carrier, .. } = od {
                    if ops[op].is_some() {
                        return Err(format!("operator {} created twice", op));
                    }
                    ops[op] = Some(OperatorNode::new(*kind, *carrier, od.op()));
                    if *carrier {
                        let v = ev.voice as usize;
                        voices[v].root = od.op();
                        voice_rooted[v] = true;
                    }
                } else if ops[op].is_none() {
                    return Err(format!("event {} updates operator {} before creation", i, op));
                }
                let p = od.params();
                for (slot, mods) in [p.fmods, p.pmods, p.amods].iter().enumerate() {
                    if let Some(m) = mods {
                        if *m as usize >= prog.mod_lists.len() {
                            return Err(format!("operator {} uses non-existent mod list {}", op, m));
                        }
                        slot_lists[op][slot].push(*m);
                    }
                }
            }
            events.push(EventNode {
                prog_ev: i,
                pos: -(ms_to_samples(ev.wait_ms, srate) as i64),
                prepared: false,
                active: false,
                voice: ev.voice,
            });
        }
        for (v, rooted) in voice_rooted.iter().enumerate() {
            if !rooted {
                return Err(format!("voice {} has no carrier operator", v));
            }
        }

        let kinds: Vec<SoundKind> = ops
            .iter()
            .map(|n| n.as_ref().map(|n| n.kind()).unwrap_or(SoundKind::Noise))
            .collect();
        let mut max_bufs = 0usize;
        let mut visited = vec![false; op_count];
        for v in &voices {
            let n = op_buf_count(
                v.root as usize,
                &kinds,
                &slot_lists,
                &prog.mod_lists,
                &mut visited,
            );
            max_bufs = max_bufs.max(n);
        }
        debug!(
            "prealloc: {} ops, {} voices, {} events, {} scratch buffers",
            op_count,
            voices.len(),
            events.len(),
            max_bufs
        );

        Ok(PreAlloc {
            ops,
            voices,
            events,
            mod_lists: prog.mod_lists.clone(),
            max_bufs,
        })
    }
}

/// Scratch buffers one traversal of `op`'s graph needs, mirroring the
/// block engine: a wave level holds mix/phase/freq/amp (4), a line
/// level mix/value/amp (3), a noise level mix/amp (2); any non-empty
/// modulator list adds a recursion area of at least two slots (envelope
/// accumulation plus the far-endpoint ramp), or the deepest child's
/// need if that is larger.
fn op_buf_count(
    op: usize,
    kinds: &[SoundKind],
    slot_lists: &[[Vec<u32>; 3]],
    mod_lists: &[Vec<OpId>],
    visited: &mut Vec<bool>,
) -> usize {
    if visited[op] {
        return 0;
    }
    visited[op] = true;
    let fixed = match kinds[op] {
        SoundKind::Wave => 4,
        SoundKind::Line => 3,
        SoundKind::Noise => 2,
    };
    let mut sub = 0usize;
    let mut any = false;
    for slot in &slot_lists[op] {
        for &lid in slot {
            let list = &mod_lists[lid as usize];
            if list.is_empty() {
                continue;
            }
            any = true;
            for &m in list {
                sub = sub.max(op_buf_count(m as usize, kinds, slot_lists, mod_lists, visited));
            }
        }
    }
    visited[op] = false;
    fixed + if any { sub.max(2) } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Event, OpParams, RunMode};

    fn create(op: OpId, kind: SoundKind, carrier: bool, params: OpParams) -> OpData {
        OpData::Create {
            op,
            kind,
            carrier,
            params,
        }
    }

    fn full_params(fmods: u32, pmods: u32, amods: u32) -> OpParams {
        OpParams {
            time_ms: Some(1000),
            silence_ms: Some(0),
            wave: Some(crate::wave::WaveType::Sin),
            phase: Some(0.0),
            freq: Some(Ramp::with_value(440.0)),
            freq2: Some(Ramp::with_value(440.0)),
            amp: Some(Ramp::with_value(1.0)),
            amp2: Some(Ramp::with_value(0.0)),
            pan: Some(Ramp::with_value(0.0)),
            fmods: Some(fmods),
            pmods: Some(pmods),
            amods: Some(amods),
        }
    }

    fn program(events: Vec<Event>, mod_lists: Vec<Vec<OpId>>, ops: u32, voices: u16) -> Program {
        Program {
            name: "test".to_string(),
            events,
            mod_lists,
            voice_count: voices,
            op_count: ops,
            mode: RunMode::default(),
            duration_ms: 1000,
        }
    }

    #[test]
    fn leaf_wave_needs_four_buffers() {
        let prog = program(
            vec![Event {
                wait_ms: 0,
                voice: 0,
                ops: vec![create(0, SoundKind::Wave, true, full_params(0, 0, 0))],
            }],
            vec![vec![]],
            1,
            1,
        );
        let pre = PreAlloc::build(&prog, 44100).expect("build");
        assert_eq!(pre.max_bufs, 4);
    }

    #[test]
    fn one_level_of_modulation_adds_child_area() {
        // op1 modulates op0's amplitude.
        let mut mp = full_params(0, 0, 0);
        mp.pan = None;
        let prog = program(
            vec![Event {
                wait_ms: 0,
                voice: 0,
                ops: vec![
                    create(1, SoundKind::Wave, false, mp),
                    create(0, SoundKind::Wave, true, full_params(0, 0, 1)),
                ],
            }],
            vec![vec![], vec![1]],
            2,
            1,
        );
        let pre = PreAlloc::build(&prog, 44100).expect("build");
        // Carrier level (4) + child wave level (4).
        assert_eq!(pre.max_bufs, 8);
    }

    #[test]
    fn cyclic_graph_counts_finitely() {
        let prog = program(
            vec![Event {
                wait_ms: 0,
                voice: 0,
                ops: vec![create(0, SoundKind::Wave, true, full_params(0, 0, 1))],
            }],
            vec![vec![], vec![0]],
            1,
            1,
        );
        let pre = PreAlloc::build(&prog, 44100).expect("build");
        // Self-modulation: recursion area floor of two slots.
        assert_eq!(pre.max_bufs, 6);
    }

    #[test]
    fn dangling_modulator_is_rejected() {
        let prog = program(
            vec![Event {
                wait_ms: 0,
                voice: 0,
                ops: vec![create(0, SoundKind::Wave, true, full_params(0, 0, 1))],
            }],
            vec![vec![], vec![7]],
            1,
            1,
        );
        assert!(PreAlloc::build(&prog, 44100).is_err());
    }
}
