//! # cantus - SAU musical score synthesizer
//!
//! cantus reads a textual score language (SAU), compiles it to a flat
//! event program, and renders 16-bit PCM audio - streamed to the system
//! audio device or written to a sound file.
//!
//! ## Pipeline
//!
//! 1. [`score_parser`] turns score text into a [`score::Score`] tree
//! 2. [`timing`] gives every operator a concrete duration and flattens
//!    forked sub-sequences into one linear event list
//! 3. [`program`] linearizes the tree into a [`program::Program`] with
//!    dense voice/operator identifiers and interned modulator lists
//! 4. [`generator`] walks the event timeline sample-accurately,
//!    evaluating modulator graphs (AM/FM/PM) per block over
//!    pre-integrated wavetables, and mixes panned stereo s16 output
//! 5. [`output`] sinks receive the interleaved frames (WAV/AU/raw
//!    files, or the audio device via [`audio`])
//!
//! ## Quick start
//!
//! ```rust
//! use cantus::generator::Generator;
//! use cantus::program::{build_program, RunMode};
//! use cantus::score_parser::parse_score;
//! use cantus::timing::time_score;
//!
//! // A 440 Hz sine at half amplitude for 100 ms.
//! let mut score = parse_score("Wsin f440 a0.5 t0.1", "example").unwrap();
//! time_score(&mut score);
//! let prog = build_program(&score, RunMode::default()).unwrap();
//!
//! let mut gen = Generator::new(&prog, 44100, 2).unwrap();
//! let mut buf = vec![0i16; 1024 * 2];
//! let mut frames = 0;
//! loop {
//!     let (n, more) = gen.run(&mut buf);
//!     frames += n;
//!     if !more {
//!         break;
//!     }
//! }
//! assert!(frames > 0);
//! ```
//!
//! ## Score language
//!
//! An event is an operator introduction (`Wsin`, `N`, `L`) or an update
//! of a labeled one (`@name`), followed by parameters: `f`requency,
//! `a`mplitude, `t`ime, `p`hase, `b`alance, `s`ilence. Values ramp with
//! `>goal/seconds` and a curve name; `[...]` after `f`, `p` or `a`
//! nests that parameter's modulator list; `/N` waits N seconds; `|`
//! groups durations; `;` chains composite follow-on steps. See
//! [`score_parser`] for the full grammar.

pub mod analysis;
pub mod audio;
pub mod generator;
pub mod mixer;
pub mod osc;
pub mod output;
pub mod prealloc;
pub mod program;
pub mod ramp;
pub mod score;
pub mod score_parser;
pub mod timing;
pub mod wave;
