//! Resource data model: resources, their spec and state, revisions and filters.
//!
//! `spec.configs`, `state.output` and `state.module_data` are opaque JSON at
//! this layer. Only drivers look inside them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Organisation segment of every URN.
pub const URN_ORG: &str = "goto";
/// Service segment of every URN.
pub const URN_SERVICE: &str = "entropy";

#[allow(clippy::expect_used)]
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_-]+$").expect("hardcoded regex pattern is valid")
});

/// Derive the URN for a `(kind, project, name)` triple.
#[must_use]
pub fn generate_urn(kind: &str, project: &str, name: &str) -> String {
    format!("urn:{URN_ORG}:{URN_SERVICE}:{kind}:{project}:{name}")
}

/// Check an identifier segment (kind, name or project).
pub fn validate_name(field: &str, value: &str) -> Result<()> {
    if NAME_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(Error::invalid(format!(
            "{field} must match pattern '{}', got '{value}'",
            NAME_PATTERN.as_str()
        )))
    }
}

/// Reconciliation status of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    #[serde(rename = "STATUS_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "STATUS_PENDING")]
    Pending,
    #[serde(rename = "STATUS_ERROR")]
    Error,
    #[serde(rename = "STATUS_DELETED")]
    Deleted,
    #[serde(rename = "STATUS_COMPLETED")]
    Completed,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "STATUS_UNSPECIFIED",
            Self::Pending => "STATUS_PENDING",
            Self::Error => "STATUS_ERROR",
            Self::Deleted => "STATUS_DELETED",
            Self::Completed => "STATUS_COMPLETED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "STATUS_UNSPECIFIED" => Ok(Self::Unspecified),
            "STATUS_PENDING" => Ok(Self::Pending),
            "STATUS_ERROR" => Ok(Self::Error),
            "STATUS_DELETED" => Ok(Self::Deleted),
            "STATUS_COMPLETED" => Ok(Self::Completed),
            other => Err(Error::invalid(format!("unknown status '{other}'"))),
        }
    }
}

/// Outcome bookkeeping of the last sync attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncResult {
    /// Consecutive failed attempts since the last success.
    #[serde(default)]
    pub retries: u32,
    /// Message of the last failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Desired state declared by the user.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Spec {
    #[serde(default)]
    pub configs: Value,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

/// Observed state and reconciliation progress.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub output: Value,
    /// Driver-private data carried between sync steps.
    #[serde(default)]
    pub module_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_result: SyncResult,
}

impl State {
    /// `COMPLETED` or `ERROR`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.status, Status::Completed | Status::Error)
    }

    /// `DELETED`: deletion has been planned and is being reconciled.
    #[must_use]
    pub const fn in_deletion(&self) -> bool {
        matches!(self.status, Status::Deleted)
    }

    /// True when `module_data` carries something other than null, `{}` or `[]`.
    #[must_use]
    pub fn has_module_data(&self) -> bool {
        match &self.module_data {
            Value::Null => false,
            Value::Object(map) => !map.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Nothing left to reconcile and nothing scheduled.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.is_terminal() && !self.has_module_data() && self.next_sync_at.is_none()
    }

    /// Whether a sync pass may run at `now`.
    ///
    /// Non-terminal states are due once `next_sync_at` has passed (or is
    /// unset). Terminal states are due only when a refresh was scheduled.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.next_sync_at {
            Some(at) => at <= now,
            None => !self.is_terminal(),
        }
    }

    /// Deep copy used before handing state to a driver.
    #[must_use]
    pub fn clone_state(&self) -> Self {
        self.clone()
    }
}

/// The central entity: a desired piece of external state keyed by URN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub urn: String,
    pub kind: String,
    pub name: String,
    pub project: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default = "epoch")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "epoch")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub updated_by: String,
    #[serde(default)]
    pub spec: Spec,
    #[serde(default)]
    pub state: State,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Resource {
    /// Create an unvalidated resource with the given identity.
    pub fn new(
        kind: impl Into<String>,
        project: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let mut res = Self {
            urn: String::new(),
            kind: kind.into(),
            name: name.into(),
            project: project.into(),
            labels: BTreeMap::new(),
            created_at: epoch(),
            updated_at: epoch(),
            created_by: String::new(),
            updated_by: String::new(),
            spec: Spec::default(),
            state: State::default(),
        };
        res.urn = generate_urn(&res.kind, &res.project, &res.name);
        res
    }

    #[must_use]
    pub fn with_configs(mut self, configs: Value) -> Self {
        self.spec.configs = configs;
        self
    }

    #[must_use]
    pub fn with_dependency(mut self, key: impl Into<String>, urn: impl Into<String>) -> Self {
        self.spec.dependencies.insert(key.into(), urn.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.state.status = status;
        self
    }

    /// Normalise identifiers, check naming rules and derive the URN.
    pub fn validate(&mut self) -> Result<()> {
        self.kind = self.kind.trim().to_string();
        self.name = self.name.trim().to_string();
        self.project = self.project.trim().to_string();

        validate_name("kind", &self.kind)?;
        validate_name("name", &self.name)?;
        validate_name("project", &self.project)?;

        if self.labels.keys().any(|k| k.trim().is_empty()) {
            return Err(Error::invalid("label keys must not be empty"));
        }
        if let Some(key) = self.labels.keys().find(|k| k.contains('=')) {
            return Err(Error::invalid(format!("label key '{key}' must not contain '='")));
        }

        self.urn = generate_urn(&self.kind, &self.project, &self.name);
        Ok(())
    }

    /// Flat `key=value` tag strings, sorted by key.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        labels_to_tags(&self.labels)
    }
}

/// Render labels as flat `key=value` tags.
#[must_use]
pub fn labels_to_tags(labels: &BTreeMap<String, String>) -> Vec<String> {
    labels.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// Parse flat `key=value` tags back into labels. Tags without `=` map to an
/// empty value; the first `=` separates key from value.
#[must_use]
pub fn tags_to_labels<I, S>(tags: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| {
            let tag = tag.as_ref();
            match tag.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (tag.to_string(), String::new()),
            }
        })
        .collect()
}

/// Immutable record appended on every successful plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub id: i64,
    pub urn: String,
    pub reason: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
    pub spec: Spec,
}

/// Selects the revisions to return.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RevisionsSelector {
    pub urn: String,
}

/// Query selector for listing resources. Unset fields match everything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Filter {
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// AND over every set field; labels match by equality per key.
    #[must_use]
    pub fn matches(&self, res: &Resource) -> bool {
        let kind_ok = self.kind.as_deref().is_none_or(|k| k == res.kind);
        let project_ok = self.project.as_deref().is_none_or(|p| p == res.project);
        let labels_ok = self
            .labels
            .iter()
            .all(|(k, v)| res.labels.get(k).is_some_and(|actual| actual == v));
        kind_ok && project_ok && labels_ok
    }
}

/// User-issued update of an existing resource.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub spec: Spec,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_generate_urn() {
        assert_eq!(
            generate_urn("firehose", "foo", "bar"),
            "urn:goto:entropy:firehose:foo:bar"
        );
    }

    #[test]
    fn test_validate_trims_and_derives_urn() {
        let mut res = Resource::new("  mock ", " project", "child  ");
        assert!(res.validate().is_ok());
        assert_eq!(res.kind, "mock");
        assert_eq!(res.urn, "urn:goto:entropy:mock:project:child");
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        for (kind, project, name) in [
            ("1mock", "project", "child"),
            ("mock", "p", "child"),
            ("mock", "project", "child.name"),
            ("mock", "project", ""),
        ] {
            let mut res = Resource::new(kind, project, name);
            let err = res.validate().err().unwrap();
            assert!(err.is_kind(crate::ErrorKind::Invalid), "{kind}/{project}/{name}");
        }
    }

    #[test]
    fn test_terminal_and_deletion() {
        let mut state = State::default();
        for (status, terminal, deletion) in [
            (Status::Unspecified, false, false),
            (Status::Pending, false, false),
            (Status::Completed, true, false),
            (Status::Error, true, false),
            (Status::Deleted, false, true),
        ] {
            state.status = status;
            assert_eq!(state.is_terminal(), terminal, "{status}");
            assert_eq!(state.in_deletion(), deletion, "{status}");
        }
    }

    #[test]
    fn test_clone_state_is_deep() {
        let original = State {
            status: Status::Pending,
            module_data: json!({"pending_steps": ["a", "b"]}),
            output: json!({"pods": []}),
            ..State::default()
        };
        let mut copy = original.clone_state();
        copy.module_data["pending_steps"] = json!(["b"]);
        copy.output["pods"] = json!(["p-1"]);

        assert_eq!(original.module_data, json!({"pending_steps": ["a", "b"]}));
        assert_eq!(original.output, json!({"pods": []}));
    }

    #[test]
    fn test_is_due() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();

        let pending = State {
            status: Status::Pending,
            ..State::default()
        };
        assert!(pending.is_due(now));

        let scheduled = State {
            next_sync_at: Some(later),
            ..pending.clone()
        };
        assert!(!scheduled.is_due(now));
        assert!(scheduled.is_due(later));

        let completed = State {
            status: Status::Completed,
            ..State::default()
        };
        assert!(!completed.is_due(now));
        assert!(completed.is_quiescent());
    }

    #[test]
    fn test_module_data_emptiness() {
        let mut state = State::default();
        assert!(!state.has_module_data());
        state.module_data = json!({});
        assert!(!state.has_module_data());
        state.module_data = json!({"pending_steps": ["x"]});
        assert!(state.has_module_data());
    }

    #[test]
    fn test_tags_round_trip_first_equals() {
        let res = Resource::new("mock", "project", "child")
            .with_label("team", "data")
            .with_label("expr", "a=b");
        let tags = res.tags();
        assert_eq!(tags, vec!["expr=a=b".to_string(), "team=data".to_string()]);
        assert_eq!(tags_to_labels(&tags), res.labels);
    }

    #[test]
    fn test_label_key_with_equals_rejected() {
        let mut res = Resource::new("mock", "project", "child").with_label("a=b", "c");
        let err = res.validate().unwrap_err();
        assert!(err.is_kind(ErrorKind::Invalid));
        assert!(err.message().contains("a=b"));
    }

    #[test]
    fn test_filter_matches() {
        let res = Resource::new("firehose", "foo", "bar").with_label("team", "data");

        assert!(Filter::default().matches(&res));
        assert!(Filter::default().with_kind("firehose").matches(&res));
        assert!(!Filter::default().with_kind("job").matches(&res));
        assert!(
            Filter::default()
                .with_project("foo")
                .with_label("team", "data")
                .matches(&res)
        );
        assert!(!Filter::default().with_label("team", "infra").matches(&res));
        assert!(!Filter::default().with_label("owner", "x").matches(&res));
    }

    #[test]
    fn test_status_serde_names() {
        let encoded = serde_json::to_string(&Status::Completed).unwrap();
        assert_eq!(encoded, "\"STATUS_COMPLETED\"");
        let decoded: Status = "STATUS_DELETED".parse().unwrap();
        assert_eq!(decoded, Status::Deleted);
    }
}
