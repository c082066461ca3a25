//! Timing-pass and program-builder behavior over parsed scores.

use cantus::program::{build_program, OpData, RunMode};
use cantus::score_parser::parse_score;
use cantus::timing::time_score;

fn timed(text: &str) -> cantus::score::Score {
    let mut score = parse_score(text, "test").expect("parse");
    time_score(&mut score);
    score
}

#[test]
fn unset_time_takes_script_default() {
    let score = timed("Wsin f220");
    let t = score.events[0].refs[0].params.time.unwrap();
    assert!(!t.set);
    assert!(t.defaulted);
    assert_eq!(t.ms, 1000);
    assert_eq!(score.duration_ms, 1000);
}

#[test]
fn implicit_time_takes_longest_modulator() {
    let score = timed("Wsin ti f220 a1[Wsin f4 a1 t2]");
    let t = score.events[0].refs[0].params.time.unwrap();
    assert_eq!(t.ms, 2000);
    assert!(t.defaulted);
    assert_eq!(score.duration_ms, 2000);
}

#[test]
fn linked_modulator_runs_as_long_as_carrier() {
    let score = timed("Wsin f220 t1.5 a1[Wsqr tl f4 a1]");
    let m = &score.events[0].refs[0].mods[0].refs[0];
    let t = m.params.time.unwrap();
    assert!(t.linked);
    assert_eq!(t.ms, 1500);
}

#[test]
fn ramps_default_to_operator_duration() {
    let score = timed("Wsin f220 a0>1/0.5 t2");
    let amp = score.events[0].refs[0].params.amp.unwrap();
    assert_eq!(amp.time_ms, 500, "explicit ramp time is kept");

    // A goal without its own time runs over the operator duration (the
    // parser always supplies one, so drive the fallback directly).
    let mut score = parse_score("Wsin f220 t2", "test").expect("parse");
    let mut goal = cantus::ramp::Ramp::default();
    goal.set_goal(440.0, None, cantus::ramp::RampCurve::Lin, false);
    score.events[0].refs[0]
        .params
        .freq
        .as_mut()
        .unwrap()
        .copy_from(&goal);
    time_score(&mut score);
    let freq = score.events[0].refs[0].params.freq.unwrap();
    assert_eq!(freq.time_ms, 2000);
}

#[test]
fn composite_steps_inherit_sibling_time_and_accumulate_waits() {
    let mut score = parse_score("Wsin f220 t0.5 ;f330 ;f440 t1", "test").expect("parse");
    time_score(&mut score);
    assert_eq!(score.events.len(), 3, "steps flatten into the main list");
    // Step one inherits the 0.5 s duration and starts when the intro ends.
    assert_eq!(score.events[1].wait_ms, 500);
    let t1 = score.events[1].refs[0].params.time.unwrap();
    assert_eq!(t1.ms, 500);
    assert!(t1.implicit);
    // Step two starts after step one and keeps its own time.
    assert_eq!(score.events[2].wait_ms, 500);
    assert_eq!(score.events[2].refs[0].params.time.unwrap().ms, 1000);
    assert_eq!(score.duration_ms, 2000);
}

#[test]
fn gapshift_collapses_defaulted_predecessor() {
    let score = timed("Wsin f220 ;/0.5 f440 t1");
    assert_eq!(score.events.len(), 2);
    // The intro's defaulted time collapsed to zero: it is only a gap.
    assert_eq!(score.events[0].refs[0].params.time.unwrap().ms, 0);
    assert_eq!(score.events[1].wait_ms, 500);
    assert_eq!(score.duration_ms, 1500);
}

#[test]
fn gapshift_keeps_explicit_predecessor() {
    let score = timed("Wsin f220 t0.4 ;/0.5 f440 t1");
    assert_eq!(score.events[0].refs[0].params.time.unwrap().ms, 400);
}

#[test]
fn duration_group_defaults_to_longest_set_member() {
    let score = timed("Wsin f220 Wsin f330 t2 | /0.1 Wsin f550 t0.3");
    // The unset member takes the group's longest explicitly-set time.
    assert_eq!(score.events[0].refs[0].params.time.unwrap().ms, 2000);
    // The event after the group waits out the group plus its own wait.
    assert_eq!(score.events[2].wait_ms, 2100);
    assert_eq!(score.duration_ms, 2400);
}

#[test]
fn flattening_preserves_absolute_times() {
    let score = timed("/0.25 Wsin t0.5 /0.25 Wsqr t0.5");
    let mut abs = 0u64;
    let mut ends = Vec::new();
    for ev in &score.events {
        abs += ev.wait_ms as u64;
        ends.push(abs + ev.dur_ms as u64);
    }
    assert_eq!(abs, 500);
    assert_eq!(score.duration_ms as u64, *ends.iter().max().unwrap());
}

#[test]
fn builder_assigns_dense_ids_in_creation_order() {
    let mut score = parse_score("Wsin f100[Wsin r2 a1] t1 Wsqr f200 t1", "test").expect("parse");
    time_score(&mut score);
    let prog = build_program(&score, RunMode::default()).expect("build");
    assert_eq!(prog.op_count, 3);
    assert_eq!(prog.voice_count, 2);
    assert_eq!(prog.events.len(), 2);
    // The carrier's ID is assigned before its modulator is created, but
    // the modulator's create event entry precedes the carrier's.
    let ops = &prog.events[0].ops;
    assert_eq!(ops.len(), 2);
    match (&ops[0], &ops[1]) {
        (OpData::Create { op: m, carrier: false, .. }, OpData::Create { op: c, carrier: true, .. }) => {
            assert_eq!(*c, 0);
            assert_eq!(*m, 1);
        }
        other => panic!("unexpected event ops: {:?}", other),
    }
    assert_eq!(prog.events[0].voice, 0);
    assert_eq!(prog.events[1].voice, 1);
}

#[test]
fn modulator_lists_are_interned_with_empty_as_zero() {
    let mut score =
        parse_score("Wsin f100[Wsin r2 a1] t1 Wsqr f200[Wsin r2 a1] t1", "test").expect("parse");
    time_score(&mut score);
    let prog = build_program(&score, RunMode::default()).expect("build");
    assert!(prog.mod_lists[0].is_empty(), "list 0 is the empty list");
    // Each carrier has a distinct single-member list (distinct members),
    // so the table holds the empty list plus two interned lists.
    assert_eq!(prog.mod_lists.len(), 3);
    for ev in &prog.events {
        for od in &ev.ops {
            if let OpData::Create { carrier: true, params, .. } = od {
                assert!(params.fmods.unwrap() > 0);
                assert_eq!(params.pmods.unwrap(), 0);
                assert_eq!(params.amods.unwrap(), 0);
            }
        }
    }
}

#[test]
fn update_events_carry_only_touched_params() {
    let mut score = parse_score("Wsin 'x f220 t1 /0.5 @x f440", "test").expect("parse");
    time_score(&mut score);
    let prog = build_program(&score, RunMode::default()).expect("build");
    assert_eq!(prog.events.len(), 2);
    match &prog.events[1].ops[0] {
        OpData::Update { op, params } => {
            assert_eq!(*op, 0);
            assert!(params.freq.is_some());
            assert!(params.time_ms.is_none());
            assert!(params.amp.is_none());
            assert!(params.fmods.is_none());
        }
        other => panic!("expected update, got {:?}", other),
    }
}

#[test]
fn carrier_with_ratio_frequency_is_rejected() {
    let mut score = parse_score("Wsin r2 t1", "test").expect("parse");
    time_score(&mut score);
    assert!(build_program(&score, RunMode::default()).is_err());
}

#[test]
fn pan_on_modulator_is_rejected() {
    let mut score = parse_score("Wsin f220 t1 a1[Wsin f4 a1 b0.5]", "test").expect("parse");
    time_score(&mut score);
    assert!(build_program(&score, RunMode::default()).is_err());
}
