//! Post-parse timing.
//!
//! Three passes turn the partially-specified score tree into a flat
//! event list where every operator has a concrete duration and every
//! event a concrete wait:
//!
//! 1. depth-first operator/event timing (defaults, implicit and linked
//!    times, ramp fallback durations, fork sibling chains),
//! 2. fork flattening into one linear list ordered by absolute time,
//! 3. duration groups (`|`), whose slack the following event absorbs.
//!
//! Timing is closed-form and cannot fail; the front-end only produces
//! well-formed trees.

use crate::score::{OpObj, OpRef, Score, ScoreEvent};
use tracing::debug;

/// Run all passes in order and compute the score duration.
pub fn time_score(score: &mut Score) {
    let default_ms = score.default_time_ms;
    let mut events = std::mem::take(&mut score.events);
    for ev in events.iter_mut() {
        time_event(ev, &mut score.objs, default_ms, None);
    }
    score.events = events;

    flatten_forks(score);
    time_durgroups(score);

    let mut abs = 0u64;
    let mut end = 0u64;
    for ev in &score.events {
        abs += ev.wait_ms as u64;
        end = end.max(abs + ev.dur_ms as u64);
    }
    score.duration_ms = end as u32;
    debug!(
        "timed score '{}': {} events, {} ms",
        score.name,
        score.events.len(),
        score.duration_ms
    );
}

/// Time one event's operators, then walk its forks as sibling chains.
/// `fallback_ms` is the previous sibling's duration when this event is
/// itself a fork member.
fn time_event(
    ev: &mut ScoreEvent,
    objs: &mut Vec<OpObj>,
    default_ms: u32,
    fallback_ms: Option<u32>,
) {
    for r in ev.refs.iter_mut() {
        time_op(r, objs, default_ms, fallback_ms);
    }
    compute_event_dur(ev);

    let mut forks = std::mem::take(&mut ev.forks);
    for fork in forks.iter_mut() {
        for i in 0..fork.events.len() {
            if fork.events[i].from_gapshift {
                // A gap-shift after a defaulted note turns that note into
                // the gap itself.
                let prev_defaulted = if i == 0 {
                    !ev.voice_set_dur && event_has_defaulted_time(ev)
                } else {
                    !fork.events[i - 1].voice_set_dur
                        && event_has_defaulted_time(&fork.events[i - 1])
                };
                if prev_defaulted {
                    if i == 0 {
                        collapse_event_time(ev, objs);
                    } else {
                        collapse_event_time(&mut fork.events[i - 1], objs);
                    }
                }
            }
            let prev_dur = if i == 0 {
                ev.dur_ms
            } else {
                fork.events[i - 1].dur_ms
            };
            let cur = &mut fork.events[i];
            time_event(cur, objs, default_ms, Some(prev_dur));
            if cur.wait_prev_dur {
                cur.wait_ms += prev_dur;
            }
        }
    }
    ev.forks = forks;
}

/// Depth-first operator timing. Children resolve first so an implicit
/// or defaulted time can take the longest modulator subtree.
fn time_op(r: &mut OpRef, objs: &mut Vec<OpObj>, default_ms: u32, fallback_ms: Option<u32>) {
    let mut sub_max = 0u32;
    for list in r.mods.iter_mut() {
        for c in list.refs.iter_mut() {
            time_op(c, objs, default_ms, None);
            if let Some(t) = c.params.time {
                sub_max = sub_max.max(t.ms + c.params.silence_ms.unwrap_or(0));
            }
        }
    }

    // A zero-duration sibling (a collapsed gap) is no fallback.
    let fallback = fallback_ms.filter(|&f| f > 0);
    let resolved = match r.params.time {
        Some(t) if t.set => Some(t.ms),
        Some(mut t) if t.implicit && !t.defaulted => {
            t.ms = if sub_max > 0 {
                sub_max
            } else {
                fallback.unwrap_or(default_ms)
            };
            t.defaulted = true;
            r.params.time = Some(t);
            Some(t.ms)
        }
        Some(t) if t.linked && !r.nested => {
            // At top level there is no enclosing operator; treat like an
            // unset time and let the duration group have it.
            let ms = fallback.unwrap_or(default_ms);
            r.params.time = Some(crate::score::Time {
                ms,
                set: false,
                defaulted: true,
                implicit: false,
                linked: true,
            });
            Some(ms)
        }
        Some(t) if t.linked => None, // patched by the parent below
        Some(t) => Some(t.ms),
        None => {
            if r.first || fallback_ms.is_some() {
                let ms = if sub_max > 0 {
                    sub_max
                } else {
                    fallback.unwrap_or(default_ms)
                };
                r.params.time = Some(crate::score::Time {
                    ms,
                    set: false,
                    defaulted: true,
                    implicit: r.nested || fallback_ms.is_some(),
                    linked: false,
                });
                Some(ms)
            } else {
                // Update that leaves the running time alone.
                None
            }
        }
    };

    let ramp_ms = resolved.unwrap_or_else(|| {
        let prev = objs[r.obj].timed_ms;
        if prev > 0 {
            prev
        } else {
            default_ms
        }
    });

    if let Some(ms) = resolved {
        objs[r.obj].timed_ms = ms;
        // Children linked to the enclosing scope run as long as we do.
        for list in r.mods.iter_mut() {
            for c in list.refs.iter_mut() {
                if let Some(t) = &mut c.params.time {
                    if t.linked && c.nested {
                        t.ms = ms;
                        t.defaulted = true;
                        objs[c.obj].timed_ms = ms;
                        default_ramp_times(c, ms);
                    }
                }
            }
        }
    }
    default_ramp_times(r, ramp_ms);
}

/// Ramps without an explicit duration run over the operator's duration.
fn default_ramp_times(r: &mut OpRef, ms: u32) {
    let p = &mut r.params;
    for ramp in [&mut p.freq, &mut p.freq2, &mut p.amp, &mut p.amp2, &mut p.pan] {
        if let Some(ramp) = ramp {
            ramp.default_time(ms);
        }
    }
}

fn compute_event_dur(ev: &mut ScoreEvent) {
    let mut dur = 0u32;
    let mut set = false;
    for r in &ev.refs {
        if r.nested {
            continue;
        }
        if let Some(t) = r.params.time {
            dur = dur.max(t.ms + r.params.silence_ms.unwrap_or(0));
            set |= t.set;
        }
    }
    ev.dur_ms = dur;
    ev.voice_set_dur = set;
}

fn event_has_defaulted_time(ev: &ScoreEvent) -> bool {
    ev.refs.iter().any(|r| {
        !r.nested
            && r.params
                .time
                .map(|t| t.defaulted && !t.set)
                .unwrap_or(false)
    })
}

fn collapse_event_time(ev: &mut ScoreEvent, objs: &mut Vec<OpObj>) {
    for r in ev.refs.iter_mut() {
        if r.nested {
            continue;
        }
        if let Some(t) = &mut r.params.time {
            if t.defaulted && !t.set {
                t.ms = 0;
                // Shield the collapsed time from group defaulting.
                t.implicit = true;
                objs[r.obj].timed_ms = 0;
            }
        }
    }
    compute_event_dur(ev);
}

/// Merge every fork's sub-chain into the main list, ordered by absolute
/// time with the original emission order breaking ties. Afterwards each
/// wait is relative to the preceding flat event.
fn flatten_forks(score: &mut Score) {
    let events = std::mem::take(&mut score.events);
    let mut flat: Vec<(u64, usize, ScoreEvent)> = Vec::new();
    let mut seq = 0usize;
    let mut abs = 0u64;
    for ev in events {
        abs += ev.wait_ms as u64;
        collect_event(abs, ev, &mut flat, &mut seq);
    }
    flat.sort_by_key(|&(abs, seq, _)| (abs, seq));
    let mut prev = 0u64;
    score.events = flat
        .into_iter()
        .map(|(abs, _, mut ev)| {
            ev.wait_ms = (abs - prev) as u32;
            prev = abs;
            ev
        })
        .collect();
}

fn collect_event(
    abs: u64,
    mut ev: ScoreEvent,
    flat: &mut Vec<(u64, usize, ScoreEvent)>,
    seq: &mut usize,
) {
    let forks = std::mem::take(&mut ev.forks);
    let my_seq = *seq;
    *seq += 1;
    flat.push((abs, my_seq, ev));
    for fork in forks {
        let mut fabs = abs;
        for fev in fork.events {
            fabs += fev.wait_ms as u64;
            collect_event(fabs, fev, flat, seq);
        }
    }
}

/// Resolve `|` duration groups: members with a still-unset time take the
/// group's longest duration, and the event following the group starts
/// after the group has played out.
fn time_durgroups(score: &mut Score) {
    if score.events.is_empty() {
        return;
    }
    let mut abs: Vec<u64> = Vec::with_capacity(score.events.len());
    let mut acc = 0u64;
    for ev in &score.events {
        acc += ev.wait_ms as u64;
        abs.push(acc);
    }
    let max_group = score.events.iter().map(|e| e.group).max().unwrap_or(0);
    for g in 0..=max_group {
        let members: Vec<usize> = (0..score.events.len())
            .filter(|&i| score.events[i].group == g)
            .collect();
        if members.is_empty() {
            continue;
        }
        // Events with an explicitly set time anchor the group duration.
        let group_dur = members
            .iter()
            .filter(|&&i| score.events[i].voice_set_dur)
            .map(|&i| score.events[i].dur_ms)
            .max()
            .or_else(|| members.iter().map(|&i| score.events[i].dur_ms).max())
            .unwrap_or(0);
        for &i in &members {
            let ev = &mut score.events[i];
            if ev.lock_dur_scope || ev.voice_set_dur {
                continue;
            }
            let mut changed = false;
            for r in ev.refs.iter_mut() {
                if r.nested {
                    continue;
                }
                if let Some(t) = &mut r.params.time {
                    // Sibling-inherited (implicit) times are not "still
                    // unset" and keep their value.
                    if t.defaulted && !t.set && !t.implicit {
                        t.ms = group_dur;
                        changed = true;
                        default_ramp_times(r, group_dur);
                    }
                }
            }
            if changed {
                compute_event_dur(ev);
            }
        }
        let group_end = members
            .iter()
            .map(|&i| abs[i] + score.events[i].dur_ms as u64)
            .max()
            .unwrap_or(0);
        let last = *members.last().unwrap();
        let next = last + 1;
        if next < score.events.len() {
            let slack = group_end.saturating_sub(abs[last]);
            if slack > 0 {
                score.events[next].wait_ms = (score.events[next].wait_ms as u64 + slack) as u32;
                for a in abs.iter_mut().skip(next) {
                    *a += slack;
                }
            }
        }
    }
}
