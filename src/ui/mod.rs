//! Injected output and prompt capabilities.
//!
//! The engine never talks to a terminal directly. Progress and warnings go
//! through [`Reporter`]; the interactive conflict protocol goes through
//! [`Prompt`]. Front-ends provide real implementations, tests provide
//! scripted ones.

pub mod reporter;

pub use reporter::{LogReporter, Prompt, Reporter};
