//! apiforge-core: Data model, assertion evaluation and reporting for API test suites
//!
//! This crate holds everything that does not touch the network: the test
//! case model, pure assertion evaluation, project configuration with sealed
//! secrets, trace redaction, exports, reports and the persistence seam.

pub mod assertion;
pub mod config;
pub mod export;
pub mod model;
pub mod project;
pub mod redact;
pub mod report;
pub mod schema;
pub mod secret;
pub mod store;

pub use assertion::{ResponseView, evaluate, evaluate_all, judge};
pub use config::{ConfigError, Settings};
pub use export::{ExportError, ExportFormat, IssueDraft, export_suite, issue_draft};
pub use model::{
    ActivityAction, ActivityEntry, Assertion, AssertionResult, AssertionType, BodyEncoding, CaseEdit, Condition, Endpoint,
    EndpointRef, ExecutionStatus, ExecutionStep, HttpMethod, MultipartField, ParamLocation,
    Parameter, Payload, RequestSchema, RequestTrace, ResponseSpec, ResponseTrace, ResultStatus,
    Summary, SuiteError, TestCase, TestCategory, TestExecution, TestResult, TestSuite,
};
pub use project::{
    ApiKeyLocation, AuthConfig, ConfigUpdate, ConfigView, LlmConfig, LlmProvider, Project,
    ProjectConfig, ResolvedConfig, StoredConfig,
};
pub use redact::Redactor;
pub use report::{Report, build_report, last_run_report};
pub use secret::{ConfigDecryptionError, KeyedCipher, SealError, SealedSecret, SecretCipher};
pub use store::{MemoryStore, Store, StoreError};
