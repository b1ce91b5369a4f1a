//! The deobfuscation pipeline and the coordinators that drive it.

pub mod deobfuscate;
pub mod flow;
pub mod guard;
pub mod junk;
pub mod literals;
pub mod pipeline;
pub mod project;
pub mod scheduler;

pub use deobfuscate::{DeobfuscateOptions, Deobfuscator, RunReport};
pub use pipeline::{survey_unit, transform_unit, UnitContext, UnitOutput, UnitStats};
pub use project::{ProjectRunner, RunOverrides};
pub use scheduler::{Batch, Scheduler};
