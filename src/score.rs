//! Score tree: the shape the front-end hands to the timing passes.
//!
//! Events are kept in script order, each with a wait relative to the
//! previous one, a chain of operator references, and optional forks
//! (composite follow-on steps). Operator identity is an index into the
//! object arena, so several references across events can address the
//! same operator.

use crate::ramp::Ramp;
use crate::wave::WaveType;

/// Script-level default duration for operators given no time.
pub const DEFAULT_TIME_MS: u32 = 1000;
/// Script-level default frequency for top-level wave operators.
pub const DEFAULT_FREQ: f32 = 440.0;
/// Script-level default amplitude.
pub const DEFAULT_AMP: f32 = 1.0;

/// Operator duration as written, before the timing passes resolve it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Time {
    pub ms: u32,
    /// Given explicitly in the score.
    pub set: bool,
    /// Filled in by a timing pass.
    pub defaulted: bool,
    /// Inherit from the longest modulator subtree / previous sibling.
    pub implicit: bool,
    /// As long as the enclosing scope.
    pub linked: bool,
}

impl Time {
    pub fn with_ms(ms: u32) -> Time {
        Time {
            ms,
            set: true,
            ..Time::default()
        }
    }

    pub fn implicit() -> Time {
        Time {
            implicit: true,
            ..Time::default()
        }
    }

    pub fn linked() -> Time {
        Time {
            linked: true,
            ..Time::default()
        }
    }
}

/// How an operator reference is used at its position in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseType {
    Carr,
    Amod,
    Fmod,
    Pmod,
}

/// What kind of sound an operator object makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Wave,
    Noise,
    Line,
}

/// Identity of an operator object across references.
pub type ObjId = usize;

/// A distinct operator. References in events share one of these.
#[derive(Debug, Clone)]
pub struct OpObj {
    pub kind: OpKind,
    pub label: Option<String>,
    pub use_type: UseType,
    pub nested: bool,
    /// Most recently resolved duration, tracked by the timing pass so
    /// later updates can fall back to it.
    pub timed_ms: u32,
}

/// Parameters set by one reference. `None` fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct OpParams {
    pub time: Option<Time>,
    pub silence_ms: Option<u32>,
    pub wave: Option<WaveType>,
    /// Phase in cycles.
    pub phase: Option<f64>,
    pub freq: Option<Ramp>,
    pub freq2: Option<Ramp>,
    pub amp: Option<Ramp>,
    pub amp2: Option<Ramp>,
    pub pan: Option<Ramp>,
}

/// One modulator list set by a reference, replacing the operator's
/// previous list of that use type.
#[derive(Debug, Clone)]
pub struct ModList {
    pub use_type: UseType,
    pub refs: Vec<OpRef>,
}

/// A reference to an operator within an event: the first reference
/// creates the object, later ones update it.
#[derive(Debug, Clone)]
pub struct OpRef {
    pub obj: ObjId,
    pub use_type: UseType,
    pub nested: bool,
    pub first: bool,
    pub params: OpParams,
    pub mods: Vec<ModList>,
}

/// A fork: a sub-chain of events attached to a parent event, expressing
/// composite follow-on steps or gap-shifted sequences.
#[derive(Debug, Clone)]
pub struct Fork {
    pub events: Vec<ScoreEvent>,
}

#[derive(Debug, Clone)]
pub struct ScoreEvent {
    /// Wait relative to the previous event in the same chain.
    pub wait_ms: u32,
    pub refs: Vec<OpRef>,
    pub forks: Vec<Fork>,
    /// Duration-group serial; `|` in the score closes a group.
    pub group: u32,
    /// Add the previous sibling's duration to this event's wait.
    pub wait_prev_dur: bool,
    /// Gap-shift follow-on: a defaulted previous sibling collapses to
    /// zero duration.
    pub from_gapshift: bool,
    /// Keep this event's duration out of group defaulting.
    pub lock_dur_scope: bool,
    /// Computed by the timing pass: the longest of this event's
    /// non-nested operator durations, silence included.
    pub dur_ms: u32,
    /// Computed by the timing pass: any non-nested operator had an
    /// explicitly set time.
    pub voice_set_dur: bool,
}

impl ScoreEvent {
    pub fn new(wait_ms: u32, group: u32) -> ScoreEvent {
        ScoreEvent {
            wait_ms,
            refs: Vec::new(),
            forks: Vec::new(),
            group,
            wait_prev_dur: false,
            from_gapshift: false,
            lock_dur_scope: false,
            dur_ms: 0,
            voice_set_dur: false,
        }
    }
}

/// A parsed score: the object arena plus the top-level event chain.
#[derive(Debug, Clone)]
pub struct Score {
    pub name: String,
    pub objs: Vec<OpObj>,
    pub events: Vec<ScoreEvent>,
    /// Script defaults, adjustable with the `S` statement.
    pub default_time_ms: u32,
    pub default_freq: f32,
    pub default_amp: f32,
    /// Computed by the timing pass.
    pub duration_ms: u32,
}

impl Score {
    pub fn new(name: &str) -> Score {
        Score {
            name: name.to_string(),
            objs: Vec::new(),
            events: Vec::new(),
            default_time_ms: DEFAULT_TIME_MS,
            default_freq: DEFAULT_FREQ,
            default_amp: DEFAULT_AMP,
            duration_ms: 0,
        }
    }

    pub fn add_obj(
        &mut self,
        kind: OpKind,
        label: Option<String>,
        use_type: UseType,
        nested: bool,
    ) -> ObjId {
        let id = self.objs.len();
        self.objs.push(OpObj {
            kind,
            label,
            use_type,
            nested,
            timed_ms: 0,
        });
        id
    }
}
