use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::problem::ValidationError;

const UNKNOWN_TYPE: &str = "unknown";

/// One trust anchor known to the simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedAuthority {
    /// Trust framework, e.g. `aki`, `etsi_tl` or `openid_federation`.
    #[serde(rename = "type")]
    pub authority_type: String,
    pub value: String,
    pub label: String,
}

/// Point-in-time list of trust anchors, as loaded from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustSnapshot {
    #[serde(default)]
    pub authorities: Vec<TrustedAuthority>,
}

/// Outcome of matching a requested trusted-authority policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedAuthorityVerdict {
    #[serde(rename = "type")]
    pub authority_type: String,
    pub value: String,
    pub label: String,
    pub policy: String,
}

impl TrustedAuthorityVerdict {
    /// Verdict built from the policy string alone, labelled with its value.
    pub fn from_policy(policy: &str) -> Self {
        let (authority_type, value) = split_policy(policy);
        Self {
            label: value.clone(),
            authority_type,
            value,
            policy: policy.to_owned(),
        }
    }
}

/// Splits `type:value` on the first colon.
///
/// A policy without a colon reports type `unknown`; an empty value after the
/// colon keeps the whole policy as value.
fn split_policy(policy: &str) -> (String, String) {
    match policy.split_once(':') {
        Some((authority_type, value)) if !value.is_empty() => {
            (authority_type.to_owned(), value.to_owned())
        }
        Some((authority_type, _)) => (authority_type.to_owned(), policy.to_owned()),
        None => (UNKNOWN_TYPE.to_owned(), policy.to_owned()),
    }
}

/// Matches requested trusted-authority policies against the ones a credential carries.
#[derive(Debug, Clone, Default)]
pub struct TrustedAuthorityEvaluator {
    labels: BTreeMap<String, BTreeMap<String, String>>,
}

impl TrustedAuthorityEvaluator {
    pub fn new(snapshot: &TrustSnapshot) -> Self {
        let mut labels: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for authority in &snapshot.authorities {
            labels
                .entry(authority.authority_type.clone())
                .or_default()
                .entry(authority.value.clone())
                .or_insert_with(|| authority.label.clone());
        }
        Self { labels }
    }

    /// Evaluates `requested` against `carried`.
    ///
    /// Returns `Ok(None)` when no policy was requested (blank counts as
    /// absent), and an `invalid_scope` error when the policy is not carried.
    pub fn evaluate(
        &self,
        requested: Option<&str>,
        carried: &[String],
    ) -> Result<Option<TrustedAuthorityVerdict>, ValidationError> {
        let Some(policy) = requested.filter(|p| !p.trim().is_empty()) else {
            return Ok(None);
        };

        if !carried.iter().any(|c| c == policy) {
            warn!(policy, "trusted authority policy not satisfied");
            return Err(ValidationError::invalid_scope(format!(
                "Trusted Authority policy {policy} not satisfied by wallet"
            ))
            .with_violation("trustedAuthorityPolicy", policy));
        }

        let mut verdict = TrustedAuthorityVerdict::from_policy(policy);
        if let Some(label) = self
            .labels
            .get(&verdict.authority_type)
            .and_then(|values| values.get(&verdict.value))
        {
            verdict.label = label.clone();
        }
        debug!(
            authority_type = %verdict.authority_type,
            label = %verdict.label,
            "trusted authority policy satisfied"
        );
        Ok(Some(verdict))
    }
}
