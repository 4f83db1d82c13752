//! Shared data model: endpoints, test cases, suites, executions and activity

pub mod activity;
pub mod case;
pub mod endpoint;
pub mod execution;
pub mod suite;

pub use activity::{ActivityAction, ActivityEntry, SYSTEM_ACTOR};
pub use case::{
    Assertion, AssertionType, Condition, MultipartField, Payload, TestCase, TestCategory, param_text,
};
pub use endpoint::{
    BodyEncoding, Endpoint, EndpointRef, HttpMethod, MergeOutcome, ParamLocation, Parameter,
    RequestSchema, ResponseSpec, default_operation_id, merge_endpoints,
};
pub use execution::{
    AssertionResult, ExecutionStatus, ExecutionStep, RequestTrace, ResponseTrace, ResultStatus,
    Summary, TestExecution, TestResult, pass_rate,
};
pub use suite::{CaseEdit, SuiteError, TestSuite};
