use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::trust::TrustedAuthorityVerdict;

/// SD-JWT VC credential format identifier.
pub const FORMAT_SD_JWT: &str = "dc+sd-jwt";

/// ISO/IEC 18013-5 mdoc credential format identifier.
pub const FORMAT_MSO_MDOC: &str = "mso_mdoc";

/// A presentation as produced by a wallet or accepted by the verifier.
///
/// For SD-JWT every disclosure is hashed individually; for mdoc a single
/// digest covers the whole device response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    pub credential_id: String,
    pub format: String,
    /// `true` iff a key-binding JWT accompanies the credential.
    pub holder_binding: bool,
    pub trusted_authority_match: Option<TrustedAuthorityVerdict>,
    pub vp_token: Json,
    pub disclosure_hashes: Vec<String>,
}
