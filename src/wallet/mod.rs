//! Simulated wallets answering authorization requests.

use serde_json::{json, Map, Value as Json};

use crate::core::problem::ValidationError;

pub mod mdoc;
pub mod sd_jwt;

pub use mdoc::{
    DeviceResponsePreset, DeviceResponsePresetRepository, MdocCredential,
    MdocSimulationResult, MdocWalletSimulationService, SimulateMdocRequest,
};
pub use sd_jwt::{
    SdJwtCredential, SimulateSdJwtRequest, WalletPreset, WalletPresetRepository,
    WalletSimulationResult, WalletSimulationService,
};

/// Where a wallet takes its credential from.
#[derive(Debug)]
pub(crate) enum Source<'a, T> {
    Preset(&'a str),
    Inline(&'a T),
}

/// Exactly one of `preset_id` and `inline` must be supplied.
pub(crate) fn select_source<'a, T>(
    preset_id: Option<&'a str>,
    inline: Option<&'a T>,
) -> Result<Source<'a, T>, ValidationError> {
    match (preset_id, inline) {
        (Some(preset_id), None) => Ok(Source::Preset(preset_id)),
        (None, Some(inline)) => Ok(Source::Inline(inline)),
        (Some(_), Some(_)) => Err(ValidationError::invalid_request(
            "presetId and an inline credential are mutually exclusive",
        )
        .with_violation("presetId", "supply either presetId or an inline credential")),
        (None, None) => Err(ValidationError::invalid_request(
            "either presetId or an inline credential is required",
        )
        .with_violation("presetId", "missing")),
    }
}

/// Presentation submission describing a single credential at the token root.
pub(crate) fn presentation_submission(request_id: &str, credential_id: &str, format: &str) -> Json {
    json!({
        "id": format!("submission-{request_id}"),
        "definition_id": request_id,
        "descriptor_map": [{
            "id": credential_id,
            "format": format,
            "path": "$",
        }],
    })
}

/// `{vp_token, presentation_submission}`, the object a wallet posts or encrypts.
pub(crate) fn response_payload(vp_token: impl Into<Json>, submission: Json) -> Map<String, Json> {
    let mut payload = Map::new();
    payload.insert("vp_token".to_owned(), vp_token.into());
    payload.insert("presentation_submission".to_owned(), submission);
    payload
}
