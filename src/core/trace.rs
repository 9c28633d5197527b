//! Facade-agnostic diagnostic traces.
//!
//! Every service result can be projected into one [VerboseTrace] shape. The
//! projection only reads the result; it carries identifiers, hashes and
//! verdicts, never tokens or key material.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerboseTrace {
    pub operation: String,
    pub metadata: BTreeMap<String, Json>,
    pub steps: Vec<TraceStep>,
}

impl VerboseTrace {
    pub fn builder(operation: impl Into<String>) -> VerboseTraceBuilder {
        VerboseTraceBuilder::new(operation)
    }

    pub fn step(&self, id: &str) -> Option<&TraceStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub id: String,
    pub summary: String,
    pub attributes: BTreeMap<String, Json>,
}

impl TraceStep {
    pub fn new(id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            summary: summary.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute(mut self, key: &str, value: impl Into<Json>) -> Self {
        self.attributes.insert(key.to_owned(), value.into());
        self
    }

    /// Adds the attribute only when `value` is present.
    pub fn attribute_opt<T: Into<Json>>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.attribute(key, value),
            None => self,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerboseTraceBuilder {
    trace: VerboseTrace,
}

impl VerboseTraceBuilder {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            trace: VerboseTrace {
                operation: operation.into(),
                metadata: BTreeMap::new(),
                steps: Vec::new(),
            },
        }
    }

    pub fn metadata(mut self, key: &str, value: impl Into<Json>) -> Self {
        self.trace.metadata.insert(key.to_owned(), value.into());
        self
    }

    pub fn step(mut self, step: TraceStep) -> Self {
        self.trace.steps.push(step);
        self
    }

    pub fn build(self) -> VerboseTrace {
        self.trace
    }
}

/// Read-only projection of a service result into a [VerboseTrace].
pub trait ToVerboseTrace {
    fn verbose_trace(&self) -> VerboseTrace;
}
