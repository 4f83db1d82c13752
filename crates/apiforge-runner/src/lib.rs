//! apiforge-runner: spec resolution, case generation and HTTP execution
//!
//! The pipeline is [`source`] → [`spec`] → [`generator`] (driven by
//! [`analyzer`]) → [`executor`] → [`batch`]. [`engine::Engine`] exposes it
//! as a set of operations over a [`apiforge_core::Store`].

pub mod analyzer;
pub mod batch;
pub mod curl;
pub mod engine;
pub mod executor;
pub mod generator;
pub mod source;
pub mod spec;

pub use batch::{CaseRunner, ExecutionHandle};
pub use engine::{Engine, EngineError, GenerateOutcome, ImportOutcome};
pub use executor::{CaseOverrides, ConnectionCheck, Executor, ExecutorFatalError};
pub use generator::{CaseContributor, ContributorError, GenerateOptions, Generator};
pub use source::SpecSource;
pub use spec::{SpecDocument, SpecParseError, SpecVersion};
