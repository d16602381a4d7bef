// src/engine/mod.rs

//! Task chain execution.
//!
//! - [`interpolate`] turns a task's raw arguments into flat [`TaskArgs`]
//!   by resolving `#TOKEN#` placeholders against the transfer context.
//! - [`runner`] walks a rule's PRE / POST / ERROR chain step by step,
//!   persisting progress after each one.
//!
//! [`TaskArgs`]: crate::tasks::TaskArgs

pub mod interpolate;
pub mod runner;

pub use interpolate::{ContextResolver, InterpolationError};
pub use runner::{ChainError, ChainOutcome, ChainRunner, StepTrace};
