//! Test suite: ordered, index-addressable collection of test cases

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::case::{Assertion, Payload, TestCase, TestCategory};
use super::endpoint::EndpointRef;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SuiteError {
    #[error("test case #{0} does not exist in this suite")]
    UnknownIndex(u64),
    #[error("test case index {index} is below the suite's next index {next}")]
    IndexReused { index: u64, next: u64 },
    #[error("expected_status must not be empty")]
    EmptyExpectedStatus,
}

/// Explicit edit of a stored test case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseEdit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertions: Option<Vec<Assertion>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<Vec<u16>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestSuite {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    /// Next index to hand out. Only ever grows.
    #[serde(default)]
    pub next_index: u64,
}

impl TestSuite {
    pub fn new(id: impl Into<String>, project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            name: name.into(),
            test_cases: Vec::new(),
            next_index: 0,
        }
    }

    /// Endpoints that already have at least one case.
    ///
    /// Derived on demand from the stored cases, so it can never drift from them.
    #[must_use]
    pub fn generated_endpoints(&self) -> BTreeSet<EndpointRef> {
        self.test_cases.iter().map(|c| c.endpoint.clone()).collect()
    }

    /// Append cases that were numbered from [`Self::next_index`] onwards.
    ///
    /// # Errors
    ///
    /// Rejects any case whose index would collide with an index already handed out,
    /// or whose `expected_status` is empty.
    pub fn append(&mut self, cases: Vec<TestCase>) -> Result<(), SuiteError> {
        let mut next = self.next_index;
        for case in &cases {
            if case.index < next {
                return Err(SuiteError::IndexReused {
                    index: case.index,
                    next,
                });
            }
            if case.expected_status.is_empty() {
                return Err(SuiteError::EmptyExpectedStatus);
            }
            next = case.index + 1;
        }
        self.next_index = next;
        self.test_cases.extend(cases);
        Ok(())
    }

    #[must_use]
    pub fn case(&self, index: u64) -> Option<&TestCase> {
        self.test_cases.iter().find(|c| c.index == index)
    }

    /// Resolve a selection of indices; `None` selects every case in index order.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteError::UnknownIndex`] for the first index not in the suite.
    pub fn select(&self, indices: Option<&[u64]>) -> Result<Vec<TestCase>, SuiteError> {
        match indices {
            None => {
                let mut all = self.test_cases.clone();
                all.sort_by_key(|c| c.index);
                Ok(all)
            }
            Some(indices) => indices
                .iter()
                .map(|&i| self.case(i).cloned().ok_or(SuiteError::UnknownIndex(i)))
                .collect(),
        }
    }

    /// Remove every case for the given endpoints, or all cases when `None`.
    ///
    /// Survivors keep their indices. Returns the number of removed cases.
    pub fn delete_endpoints(&mut self, endpoints: Option<&[EndpointRef]>) -> usize {
        let before = self.test_cases.len();
        match endpoints {
            None => self.test_cases.clear(),
            Some(targets) => {
                let targets: BTreeSet<&EndpointRef> = targets.iter().collect();
                self.test_cases.retain(|c| !targets.contains(&c.endpoint));
            }
        }
        before - self.test_cases.len()
    }

    /// Apply an explicit edit to one case.
    ///
    /// # Errors
    ///
    /// Fails for unknown indices or an empty `expected_status`.
    pub fn update_case(&mut self, index: u64, edit: CaseEdit) -> Result<&TestCase, SuiteError> {
        if edit.expected_status.as_ref().is_some_and(Vec::is_empty) {
            return Err(SuiteError::EmptyExpectedStatus);
        }
        let case = self
            .test_cases
            .iter_mut()
            .find(|c| c.index == index)
            .ok_or(SuiteError::UnknownIndex(index))?;
        if let Some(payload) = edit.payload {
            case.payload = Some(payload);
        }
        if let Some(query) = edit.query {
            case.query = query;
        }
        if let Some(headers) = edit.headers {
            case.headers = headers;
        }
        if let Some(assertions) = edit.assertions {
            case.assertions = assertions;
        }
        if let Some(expected) = edit.expected_status {
            case.expected_status = expected;
        }
        Ok(case)
    }

    /// Display view: cases grouped by endpoint, each group in index order.
    #[must_use]
    pub fn grouped_by_endpoint(&self) -> BTreeMap<EndpointRef, Vec<&TestCase>> {
        let mut groups: BTreeMap<EndpointRef, Vec<&TestCase>> = BTreeMap::new();
        for case in &self.test_cases {
            groups.entry(case.endpoint.clone()).or_default().push(case);
        }
        for cases in groups.values_mut() {
            cases.sort_by_key(|c| c.index);
        }
        groups
    }

    #[must_use]
    pub fn count_by_category(&self) -> BTreeMap<TestCategory, usize> {
        let mut counts = BTreeMap::new();
        for case in &self.test_cases {
            *counts.entry(case.category).or_default() += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HttpMethod;
    use proptest::prelude::*;

    fn case(index: u64, method: HttpMethod, path: &str) -> TestCase {
        let mut c = TestCase::new(
            TestCategory::HappyPath,
            format!("case {index}"),
            EndpointRef::new(method, path),
            vec![200],
        );
        c.index = index;
        c
    }

    fn two_endpoint_suite() -> TestSuite {
        let mut suite = TestSuite::new("s1", "p1", "Suite");
        let mut cases = Vec::new();
        for i in 0..10 {
            let path = if i % 5 < 3 { "/a" } else { "/b" };
            cases.push(case(i, HttpMethod::Get, path));
        }
        suite.append(cases).unwrap();
        suite
    }

    #[test]
    fn delete_endpoint_preserves_survivor_indices() {
        let mut suite = two_endpoint_suite();
        let a = EndpointRef::new(HttpMethod::Get, "/a");
        assert_eq!(suite.test_cases.iter().filter(|c| c.endpoint == a).count(), 6);

        let deleted = suite.delete_endpoints(Some(&[a][..]));
        assert_eq!(deleted, 6);
        let indices: Vec<u64> = suite.test_cases.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![3, 4, 8, 9]);
        assert_eq!(suite.next_index, 10, "next index must not shrink");
    }

    #[test]
    fn delete_all_keeps_index_counter() {
        let mut suite = two_endpoint_suite();
        assert_eq!(suite.delete_endpoints(None), 10);
        assert!(suite.test_cases.is_empty());
        assert!(suite.append(vec![case(3, HttpMethod::Get, "/a")]).is_err());
        assert!(suite.append(vec![case(10, HttpMethod::Get, "/a")]).is_ok());
    }

    #[test]
    fn generated_endpoints_derived_from_cases() {
        let mut suite = two_endpoint_suite();
        assert_eq!(suite.generated_endpoints().len(), 2);
        suite.delete_endpoints(Some(&[EndpointRef::new(HttpMethod::Get, "/b")][..]));
        let remaining = suite.generated_endpoints();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains(&EndpointRef::new(HttpMethod::Get, "/a")));
    }

    #[test]
    fn append_rejects_empty_expected_status() {
        let mut suite = TestSuite::new("s1", "p1", "Suite");
        let mut c = case(0, HttpMethod::Get, "/a");
        c.expected_status.clear();
        assert_eq!(suite.append(vec![c]), Err(SuiteError::EmptyExpectedStatus));
    }

    #[test]
    fn select_reports_unknown_index() {
        let suite = two_endpoint_suite();
        assert_eq!(suite.select(Some(&[1, 42][..])), Err(SuiteError::UnknownIndex(42)));
        let picked = suite.select(Some(&[7, 2][..])).unwrap();
        assert_eq!(picked.iter().map(|c| c.index).collect::<Vec<_>>(), vec![7, 2]);
        assert_eq!(suite.select(None).unwrap().len(), 10);
    }

    #[test]
    fn update_case_replaces_only_given_fields() {
        let mut suite = two_endpoint_suite();
        let edit = CaseEdit {
            assertions: Some(vec![Assertion::status_in(&[201])]),
            ..CaseEdit::default()
        };
        let updated = suite.update_case(4, edit).unwrap();
        assert_eq!(updated.assertions.len(), 1);
        assert_eq!(updated.expected_status, vec![200]);

        let bad = CaseEdit {
            expected_status: Some(vec![]),
            ..CaseEdit::default()
        };
        assert_eq!(suite.update_case(4, bad), Err(SuiteError::EmptyExpectedStatus));
        assert!(matches!(
            suite.update_case(99, CaseEdit::default()),
            Err(SuiteError::UnknownIndex(99))
        ));
    }

    proptest! {
        #[test]
        fn deleting_never_renumbers(deletions in proptest::collection::vec(0usize..4, 0..4)) {
            let paths = ["/a", "/b", "/c", "/d"];
            let mut suite = TestSuite::new("s", "p", "n");
            let cases: Vec<TestCase> = (0..20u64)
                .map(|i| case(i, HttpMethod::Post, paths[(i % 4) as usize]))
                .collect();
            suite.append(cases).unwrap();
            for d in deletions {
                suite.delete_endpoints(Some(&[EndpointRef::new(HttpMethod::Post, paths[d])][..]));
            }
            for c in &suite.test_cases {
                let expected_path = paths[(c.index % 4) as usize];
                prop_assert_eq!(c.endpoint.path.as_str(), expected_path);
            }
            prop_assert_eq!(suite.next_index, 20);
        }
    }
}
