use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::core::{profile::Profile, trust::TrustSnapshot};

const DEFAULT_RESPONSE_BASE: &str = "https://verifier.example.com/oid4vp/";
const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "openid4vp://authorize";
const DEFAULT_DCQL_PREVIEW_LIMIT: usize = 256;

/// Simulator configuration.
#[derive(Deserialize, Debug, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Base of the per-request `response_uri`.
    pub response_base: BaseUrl,
    /// Endpoint request URIs (and QR codes) point wallets at.
    pub authorization_endpoint: Url,
    pub haip_client_id: String,
    pub baseline_client_id: String,
    pub dcql_preview_limit: usize,
    pub trust_snapshot: TrustSnapshot,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid simulator configuration")
    }

    /// `client_id` used when no preset supplies one.
    pub fn default_client_id(&self, profile: Profile) -> &str {
        match profile {
            Profile::Haip => &self.haip_client_id,
            Profile::Baseline => &self.baseline_client_id,
        }
    }

    pub fn response_uri(&self, request_id: &str) -> Result<Url> {
        self.response_base
            .join(&format!("response/{request_id}"))
            .context("unable to build response_uri")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            response_base: BaseUrl::default(),
            authorization_endpoint: Url::parse(DEFAULT_AUTHORIZATION_ENDPOINT)
                .expect("default authorization endpoint is a valid URL"),
            haip_client_id: "haip-simulator".to_owned(),
            baseline_client_id: "baseline-simulator".to_owned(),
            dcql_preview_limit: DEFAULT_DCQL_PREVIEW_LIMIT,
            trust_snapshot: TrustSnapshot::default(),
        }
    }
}

/// A url that is always a base (can be safely join()'ed with further path elements without
/// mangling).
#[derive(Deserialize, Debug, Clone, Hash, PartialEq, Eq)]
#[serde(try_from = "String")]
pub struct BaseUrl(Url);

impl std::ops::Deref for BaseUrl {
    type Target = Url;

    fn deref(&self) -> &Url {
        &self.0
    }
}

impl TryFrom<String> for BaseUrl {
    type Error = url::ParseError;

    fn try_from(mut url: String) -> Result<Self, Self::Error> {
        // Make URL a base.
        if !url.ends_with('/') {
            url += "/"
        }
        url.parse().map(Self)
    }
}

impl Default for BaseUrl {
    fn default() -> Self {
        Self(Url::parse(DEFAULT_RESPONSE_BASE).expect("default response base is a valid URL"))
    }
}
