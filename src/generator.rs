//! The generator: an event-driven audio engine that walks the program
//! timeline sample-accurately, evaluates modulator graphs per block,
//! and mixes panned stereo output into interleaved 16-bit PCM.
//!
//! Each `run` call fills one output buffer and returns. State carries
//! over exactly between calls, so rendering is resumable at any block
//! boundary. The engine is strictly single-threaded.

use crate::mixer::Mixer;
use crate::osc::{srate_coeff, Osc};
use crate::prealloc::{
    Buf, EventNode, OpVariant, OperatorNode, PhaseBuf, PreAlloc, VoiceNode, BUF_LEN,
};
use crate::program::{Event, OpData, OpId, OpParams, Program, SoundKind};
use crate::ramp::ms_to_samples;
use tracing::debug;

/// How a block's result is consumed by its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockMode {
    /// Signed audio, summed across a list.
    Audio,
    /// Envelope in 0..|amp|, multiplied across a list.
    WaveEnv,
}

pub struct Generator {
    srate: u32,
    channels: u16,
    coeff: f64,
    prog_events: Vec<Event>,
    events: Vec<EventNode>,
    ops: Vec<Option<OperatorNode>>,
    voices: Vec<VoiceNode>,
    mod_lists: Vec<Vec<OpId>>,
    bufs: Vec<Buf>,
    phase_bufs: Vec<PhaseBuf>,
    mixer: Mixer,
    ev_i: usize,
    /// Single-slot timeline shift from click-reduction, consumed when
    /// applied to the next pending delay.
    delay_offs: Option<i64>,
}

impl Generator {
    /// Pre-allocate all runtime state for a program. `channels` is 1 or 2.
    pub fn new(prog: &Program, srate: u32, channels: u16) -> Result<Generator, String> {
        if srate == 0 {
            return Err("sample rate must be non-zero".to_string());
        }
        if channels != 1 && channels != 2 {
            return Err(format!("unsupported channel count {}", channels));
        }
        let pre = PreAlloc::build(prog, srate)?;
        let scale = if prog.mode.amp_div_voices && prog.voice_count > 0 {
            1.0 / prog.voice_count as f32
        } else {
            1.0
        };
        debug!(
            "generator for '{}': {} Hz, {} ch, scale {}",
            prog.name, srate, channels, scale
        );
        Ok(Generator {
            srate,
            channels,
            coeff: srate_coeff(srate),
            prog_events: prog.events.clone(),
            events: pre.events,
            ops: pre.ops,
            voices: pre.voices,
            mod_lists: pre.mod_lists,
            bufs: vec![[0.0; BUF_LEN]; pre.max_bufs],
            phase_bufs: vec![[0; BUF_LEN]; pre.max_bufs],
            mixer: Mixer::new(scale),
            ev_i: 0,
            delay_offs: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.srate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Render one buffer of interleaved frames. Returns the number of
    /// frames that carry the render (the rest is trailing silence) and
    /// whether any events remain.
    pub fn run(&mut self, out: &mut [i16]) -> (usize, bool) {
        let ch = self.channels as usize;
        let total = out.len() / ch;
        out.fill(0);
        let mut from = 0usize;
        let mut len = total;
        let mut last_filled = 0usize;

        loop {
            let mut skip = 0usize;
            // First pass: make sure every event due in this window is
            // prepared before any operator writes another block, so
            // updates that disable a playing note take effect first.
            // The window is truncated at the first pending delay.
            for i in self.ev_i..self.events.len() {
                if self.events[i].pos < 0 {
                    let mut delay = -self.events[i].pos;
                    if let Some(offs) = self.delay_offs {
                        delay -= offs;
                    }
                    let delay = delay.max(0) as usize;
                    if delay <= len {
                        skip = len - delay;
                        len = delay;
                    }
                    break;
                }
                if !self.events[i].prepared {
                    self.prepare_event(i);
                }
            }
            // Second pass: honor delays and generate sound.
            for i in self.ev_i..self.events.len() {
                if self.events[i].pos < 0 {
                    if let Some(offs) = self.delay_offs.take() {
                        self.events[i].pos = (self.events[i].pos + offs).min(0);
                    }
                    if self.events[i].pos < 0 {
                        let delay = (-self.events[i].pos) as usize;
                        if delay >= len {
                            self.events[i].pos += len as i64;
                            break;
                        }
                        from += delay;
                        len -= delay;
                        self.events[i].pos = 0;
                    }
                }
                if !self.events[i].prepared {
                    self.prepare_event(i);
                }
                if self.events[i].active {
                    let pos = self.events[i].pos as u64;
                    let root = self.voices[self.events[i].voice as usize].root;
                    let n = self.run_sound(root, out, from, len, pos);
                    self.events[i].pos += n as i64;
                    let done = match self.ops[root as usize].as_ref() {
                        Some(node) => self.events[i].pos as u64 >= node.total_frames(),
                        None => true,
                    };
                    if done {
                        self.events[i].active = false;
                    }
                    last_filled = last_filled.max(from + n);
                }
            }
            if skip > 0 {
                from += len;
                len = skip;
                continue;
            }
            break;
        }

        while self.ev_i < self.events.len() {
            let e = &self.events[self.ev_i];
            if e.prepared && !e.active {
                self.ev_i += 1;
            } else {
                break;
            }
        }
        let more = self.ev_i < self.events.len();
        (if more { total } else { last_filled }, more)
    }

    /// Apply an event's parameter payload and work out whether it arms,
    /// re-arms or cuts its voice.
    fn prepare_event(&mut self, i: usize) {
        let pe = self.prog_events[self.events[i].prog_ev].clone();
        let v = self.events[i].voice as usize;
        let root = self.voices[v].root;
        let mut arm: Option<bool> = None;
        for od in &pe.ops {
            match od {
                OpData::Create {
                    op, carrier, params, ..
                } => {
                    self.apply_params(*op, params);
                    if *op == root {
                        if *carrier {
                            self.adjust_wave_time(*op);
                        }
                        let t = self.ops[*op as usize]
                            .as_ref()
                            .map(|n| n.total_frames())
                            .unwrap_or(0);
                        arm = Some(t > 0);
                    }
                }
                OpData::Update { op, params } => {
                    self.apply_params(*op, params);
                    if *op == root {
                        if let Some(t) = params.time_ms {
                            arm = Some(t > 0);
                        }
                    }
                }
            }
        }
        self.events[i].prepared = true;
        debug!(
            "event {} prepared (voice {}, arm {:?})",
            self.events[i].prog_ev, v, arm
        );
        match arm {
            Some(true) => {
                if let Some(prev) = self.voices[v].current_ev {
                    if prev != i {
                        self.events[prev].active = false;
                    }
                }
                self.events[i].pos = 0;
                self.events[i].active = true;
                self.voices[v].current_ev = Some(i);
            }
            Some(false) => {
                // A zero-length (re)arm cuts the note.
                if let Some(prev) = self.voices[v].current_ev.take() {
                    self.events[prev].active = false;
                }
            }
            None => {}
        }
    }

    /// Apply the set fields of a parameter payload to an operator node.
    /// Ramp copies restart their position when they carry a goal.
    fn apply_params(&mut self, op: OpId, p: &OpParams) {
        let srate = self.srate;
        let Some(node) = self.ops[op as usize].as_mut() else {
            return;
        };
        if let Some(ms) = p.time_ms {
            node.time = ms_to_samples(ms, srate);
        }
        if let Some(ms) = p.silence_ms {
            node.silence = ms_to_samples(ms, srate);
        }
        if let Some(r) = &p.amp {
            node.amp.copy_from(r);
        }
        if let Some(r) = &p.amp2 {
            node.amp2.copy_from(r);
        }
        if let Some(r) = &p.pan {
            node.pan.copy_from(r);
        }
        if let Some(m) = p.amods {
            node.amods = m;
        }
        match &mut node.variant {
            OpVariant::Wave {
                osc,
                freq,
                freq2,
                fmods,
                pmods,
            } => {
                if let Some(w) = p.wave {
                    osc.set_wave(w);
                }
                if let Some(cycles) = p.phase {
                    osc.set_phase(cycles);
                }
                if let Some(r) = &p.freq {
                    freq.copy_from(r);
                }
                if let Some(r) = &p.freq2 {
                    freq2.copy_from(r);
                }
                if let Some(m) = p.fmods {
                    *fmods = m;
                }
                if let Some(m) = p.pmods {
                    *pmods = m;
                }
            }
            OpVariant::Line { value } => {
                if let Some(r) = &p.freq {
                    value.copy_from(r);
                }
            }
            OpVariant::Noise { .. } => {}
        }
    }

    /// Click-reduction: trim a carrier wave's duration to the nearest
    /// whole number of cycles at its starting frequency, and shift the
    /// rest of the timeline by the same amount.
    fn adjust_wave_time(&mut self, op: OpId) {
        let srate = self.srate;
        let Some(node) = self.ops[op as usize].as_mut() else {
            return;
        };
        let OpVariant::Wave { freq, .. } = &node.variant else {
            return;
        };
        let offs = Osc::cycle_offs(freq.value(), node.time, srate);
        if offs == 0 {
            return;
        }
        node.time = (node.time as i64 - offs as i64).max(0) as u32;
        let offs = offs as i64;
        if self.delay_offs.map_or(true, |cur| offs < cur) {
            self.delay_offs = Some(offs);
        }
        debug!("click-reduction trims operator {} by {} frames", op, offs);
    }

    /// Render a voice's sound into `out` starting at frame `from`, for
    /// at most `len` frames, beginning `pos` frames into the
    /// activation. Returns the frames consumed.
    fn run_sound(&mut self, op: OpId, out: &mut [i16], from: usize, len: usize, pos: u64) -> usize {
        let (silence, total) = match self.ops[op as usize].as_ref() {
            Some(n) => (n.silence as u64, n.total_frames()),
            None => return len,
        };
        let mut i = 0usize;
        let mut pos = pos;
        if pos < silence {
            let skip = ((silence - pos) as usize).min(len);
            i += skip;
            pos += skip as u64;
        }
        while i < len && pos < total {
            let n = BUF_LEN.min(len - i).min((total - pos) as usize);
            let mut bufs = std::mem::take(&mut self.bufs);
            let mut phases = std::mem::take(&mut self.phase_bufs);
            self.run_block(&mut bufs, &mut phases, n, op, None, 0, BlockMode::Audio);

            let srate = self.srate;
            let ch = self.channels;
            let mut node = match self.ops[op as usize].take() {
                Some(n) => n,
                None => break,
            };
            self.mixer.clear(n);
            self.mixer.add(&bufs[0][..n], &mut node.pan, srate);
            self.ops[op as usize] = Some(node);
            let out_slice = &mut out[(from + i) * ch as usize..(from + i + n) * ch as usize];
            self.mixer.write(out_slice, n, ch);

            self.bufs = bufs;
            self.phase_bufs = phases;
            i += n;
            pos += n as u64;
        }
        i
    }

    /// Render one block of an operator into `bufs[0]`. An operator
    /// already under evaluation higher up the recursion has been taken
    /// out of its slot; hitting it again writes zeros instead of
    /// recursing, which bounds cyclic modulator graphs.
    fn run_block(
        &mut self,
        bufs: &mut [Buf],
        phases: &mut [PhaseBuf],
        len: usize,
        op: OpId,
        parent_freq: Option<&[f32]>,
        layer: u32,
        mode: BlockMode,
    ) {
        let mut node = match self.ops[op as usize].take() {
            Some(n) => n,
            None => {
                if layer == 0 {
                    bufs[0][..len].fill(0.0);
                }
                return;
            }
        };
        match node.kind() {
            SoundKind::Wave => {
                self.run_block_wave(bufs, phases, len, &mut node, parent_freq, layer, mode)
            }
            SoundKind::Noise => self.run_block_noise(bufs, phases, len, &mut node, layer, mode),
            SoundKind::Line => self.run_block_line(bufs, phases, len, &mut node, layer, mode),
        }
        self.ops[op as usize] = Some(node);
    }

    /// Wave block. Slot discipline from the base of `bufs`: 0 mix,
    /// 1 phase (in the parallel phase arena), 2 frequency, 3 amplitude;
    /// modulator recursion renders from slot 4, with slot 4 holding a
    /// list's accumulated result and slot 5 the far-endpoint ramp.
    fn run_block_wave(
        &mut self,
        bufs: &mut [Buf],
        phases: &mut [PhaseBuf],
        len: usize,
        node: &mut OperatorNode,
        parent_freq: Option<&[f32]>,
        layer: u32,
        mode: BlockMode,
    ) {
        let srate = self.srate;
        let coeff = self.coeff;
        let (head, tail) = bufs.split_at_mut(4);
        let (phead, ptail) = phases.split_at_mut(4);
        let OpVariant::Wave {
            osc,
            freq,
            freq2,
            fmods,
            pmods,
        } = &mut node.variant
        else {
            return;
        };
        let (fmods, pmods, amods) = (*fmods, *pmods, node.amods);

        // Frequency, then frequency modulation: the FM sub-graph renders
        // as a wave-envelope interpolating toward the far endpoint.
        freq.fill(&mut head[2][..len], srate, parent_freq);
        if fmods > 0 {
            let list = self.mod_lists[fmods as usize].clone();
            for (k, &m) in list.iter().enumerate() {
                self.run_block(
                    tail,
                    ptail,
                    len,
                    m,
                    Some(&head[2][..len]),
                    k as u32,
                    BlockMode::WaveEnv,
                );
            }
            if !list.is_empty() {
                freq2.fill(&mut tail[1][..len], srate, parent_freq);
                for i in 0..len {
                    head[2][i] += tail[0][i] * (tail[1][i] - head[2][i]);
                }
            }
        }

        // Phase modulation renders as plain audio layered into one buffer.
        let mut have_pm = false;
        if pmods > 0 {
            let list = self.mod_lists[pmods as usize].clone();
            for (k, &m) in list.iter().enumerate() {
                self.run_block(
                    tail,
                    ptail,
                    len,
                    m,
                    Some(&head[2][..len]),
                    k as u32,
                    BlockMode::Audio,
                );
            }
            have_pm = !list.is_empty();
        }
        // Build per-sample phases into this level's phase slot.
        {
            let pm = if have_pm { Some(&tail[0][..len]) } else { None };
            osc.fill(&mut phead[1][..len], &head[2][..len], pm, coeff);
        }

        // Amplitude, then amplitude modulation toward the far endpoint.
        node.amp.fill(&mut head[3][..len], srate, None);
        if amods > 0 {
            let list = self.mod_lists[amods as usize].clone();
            for (k, &m) in list.iter().enumerate() {
                self.run_block(
                    tail,
                    ptail,
                    len,
                    m,
                    Some(&head[2][..len]),
                    k as u32,
                    BlockMode::WaveEnv,
                );
            }
            if !list.is_empty() {
                node.amp2.fill(&mut tail[1][..len], srate, None);
                for i in 0..len {
                    head[3][i] += tail[0][i] * (tail[1][i] - head[3][i]);
                }
            }
        }

        for i in 0..len {
            let s = osc.next(phead[1][i]);
            let a = head[3][i];
            combine(&mut head[0][i], s, a, layer, mode);
        }
    }

    fn run_block_noise(
        &mut self,
        bufs: &mut [Buf],
        phases: &mut [PhaseBuf],
        len: usize,
        node: &mut OperatorNode,
        layer: u32,
        mode: BlockMode,
    ) {
        let srate = self.srate;
        let (head, tail) = bufs.split_at_mut(2);
        let (_, ptail) = phases.split_at_mut(2);
        node.amp.fill(&mut head[1][..len], srate, None);
        let amods = node.amods;
        if amods > 0 {
            let list = self.mod_lists[amods as usize].clone();
            for (k, &m) in list.iter().enumerate() {
                self.run_block(tail, ptail, len, m, None, k as u32, BlockMode::WaveEnv);
            }
            if !list.is_empty() {
                node.amp2.fill(&mut tail[1][..len], srate, None);
                for i in 0..len {
                    head[1][i] += tail[0][i] * (tail[1][i] - head[1][i]);
                }
            }
        }
        let OpVariant::Noise { rng } = &mut node.variant else {
            return;
        };
        for i in 0..len {
            let s = noise_sample(rng);
            let a = head[1][i];
            combine(&mut head[0][i], s, a, layer, mode);
        }
    }

    fn run_block_line(
        &mut self,
        bufs: &mut [Buf],
        phases: &mut [PhaseBuf],
        len: usize,
        node: &mut OperatorNode,
        layer: u32,
        mode: BlockMode,
    ) {
        let srate = self.srate;
        let (head, tail) = bufs.split_at_mut(3);
        let (_, ptail) = phases.split_at_mut(3);
        {
            let OpVariant::Line { value } = &mut node.variant else {
                return;
            };
            value.fill(&mut head[1][..len], srate, None);
        }
        node.amp.fill(&mut head[2][..len], srate, None);
        let amods = node.amods;
        if amods > 0 {
            let list = self.mod_lists[amods as usize].clone();
            for (k, &m) in list.iter().enumerate() {
                self.run_block(tail, ptail, len, m, None, k as u32, BlockMode::WaveEnv);
            }
            if !list.is_empty() {
                node.amp2.fill(&mut tail[1][..len], srate, None);
                for i in 0..len {
                    head[2][i] += tail[0][i] * (tail[1][i] - head[2][i]);
                }
            }
        }
        for i in 0..len {
            let (v, a) = (head[1][i], head[2][i]);
            combine(&mut head[0][i], v, a, layer, mode);
        }
    }
}

/// Layer a sample into the mix target. Audio layers sum; wave-envelope
/// layers rescale to 0..|amp| and multiply.
fn combine(mix: &mut f32, s: f32, amp: f32, layer: u32, mode: BlockMode) {
    match mode {
        BlockMode::Audio => {
            if layer == 0 {
                *mix = s * amp;
            } else {
                *mix += s * amp;
            }
        }
        BlockMode::WaveEnv => {
            let h = 0.5 * amp.abs();
            let e = s * h + h;
            if layer == 0 {
                *mix = e;
            } else {
                *mix *= e;
            }
        }
    }
}

/// xorshift32 white noise in [-1, 1).
fn noise_sample(state: &mut u32) -> f32 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    *state = x;
    (x as f64 / 2147483648.0 - 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_seed_deterministic_and_bounded() {
        let mut a = 0x1234_5679u32;
        let mut b = 0x1234_5679u32;
        for _ in 0..1000 {
            let sa = noise_sample(&mut a);
            let sb = noise_sample(&mut b);
            assert_eq!(sa, sb);
            assert!((-1.0..1.0).contains(&sa));
        }
        assert_ne!(a, 0, "xorshift state must never collapse to zero");
    }

    #[test]
    fn wave_envelope_combine_rescales_to_amp_range() {
        let mut mix = 0.0;
        combine(&mut mix, 1.0, 0.5, 0, BlockMode::WaveEnv);
        assert!((mix - 0.5).abs() < 1e-6, "peak maps to |amp|");
        combine(&mut mix, -1.0, 0.5, 0, BlockMode::WaveEnv);
        assert!(mix.abs() < 1e-6, "trough maps to zero");
        // Later layers multiply.
        let mut mix = 0.5;
        combine(&mut mix, 0.0, 1.0, 1, BlockMode::WaveEnv);
        assert!((mix - 0.25).abs() < 1e-6);
    }

    #[test]
    fn audio_combine_sums_layers() {
        let mut mix = 0.0;
        combine(&mut mix, 0.5, 1.0, 0, BlockMode::Audio);
        combine(&mut mix, 0.25, 1.0, 1, BlockMode::Audio);
        assert!((mix - 0.75).abs() < 1e-6);
    }
}
