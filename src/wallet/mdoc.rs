use std::{fmt::Debug, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::{
    core::{
        direct_post_jwt::EncryptionEnforcement,
        presentation::{Presentation, FORMAT_MSO_MDOC},
        problem::{ProblemCode, ProblemContext, ValidationError},
        profile::{Profile, ResponseMode},
        telemetry::{TelemetryEvent, TelemetryPublisher, WALLET_RESPONDED},
        trace::{ToVerboseTrace, TraceStep, VerboseTrace},
        trust::TrustedAuthorityEvaluator,
    },
    utils,
};

use super::{presentation_submission, response_payload, select_source, Source};

/// Claims pointers with this suffix name the document type, which travels
/// outside the disclosed claims.
const DOCTYPE_SUFFIX: &str = ".doctype";

fn default_format() -> String {
    FORMAT_MSO_MDOC.to_owned()
}

/// An ISO mdoc device response held by the simulated wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MdocCredential {
    pub credential_id: String,
    #[serde(default = "default_format")]
    pub format: String,
    pub doc_type: String,
    /// Base64url encoded `DeviceResponse`.
    pub device_response: String,
    /// Disclosed elements, keyed by namespace.
    #[serde(default)]
    pub claims: Map<String, Json>,
    #[serde(default)]
    pub trusted_authority_policies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponsePreset {
    pub preset_id: String,
    #[serde(flatten)]
    pub credential: MdocCredential,
}

pub trait DeviceResponsePresetRepository: Debug {
    fn load(&self, preset_id: &str) -> anyhow::Result<Option<DeviceResponsePreset>>;
}

/// Input of [MdocWalletSimulationService::simulate].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulateMdocRequest {
    pub request_id: String,
    pub profile: Profile,
    pub response_mode: ResponseMode,
    pub preset_id: Option<String>,
    pub inline: Option<MdocCredential>,
    /// Claims the verifier asked for, e.g. `org.iso.18013.5.1.family_name`.
    pub claims_paths: Vec<String>,
    pub trusted_authority_policy: Option<String>,
    pub verbose: bool,
}

impl SimulateMdocRequest {
    pub fn from_preset(
        request_id: impl Into<String>,
        profile: Profile,
        response_mode: ResponseMode,
        preset_id: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            profile,
            response_mode,
            preset_id: Some(preset_id.into()),
            inline: None,
            claims_paths: Vec::new(),
            trusted_authority_policy: None,
            verbose: false,
        }
    }

    pub fn from_credential(
        request_id: impl Into<String>,
        profile: Profile,
        response_mode: ResponseMode,
        credential: MdocCredential,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            profile,
            response_mode,
            preset_id: None,
            inline: Some(credential),
            claims_paths: Vec::new(),
            trusted_authority_policy: None,
            verbose: false,
        }
    }

    pub fn with_claims<I, S>(mut self, claims_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.claims_paths = claims_paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.trusted_authority_policy = Some(policy.into());
        self
    }

    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Satisfied,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimEvaluation {
    pub pointer: String,
    pub status: ClaimStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MdocSimulationResult {
    pub request_id: String,
    pub profile: Profile,
    pub response_mode: ResponseMode,
    pub preset_id: Option<String>,
    pub doc_type: String,
    pub presentation: Presentation,
    /// `{vp_token, presentation_submission}`, ready to post or encrypt.
    pub payload: Map<String, Json>,
    /// Hex SHA-256 of the decoded device response.
    pub device_response_digest: String,
    pub claims: Vec<ClaimEvaluation>,
    pub encryption_required: bool,
    pub trace: Option<VerboseTrace>,
}

/// Simulates an mdoc wallet answering an authorization request.
#[derive(Debug, Clone)]
pub struct MdocWalletSimulationService {
    presets: Arc<dyn DeviceResponsePresetRepository + Send + Sync>,
    evaluator: Arc<TrustedAuthorityEvaluator>,
    encryption: Arc<dyn EncryptionEnforcement + Send + Sync>,
    telemetry: Arc<dyn TelemetryPublisher + Send + Sync>,
}

impl MdocWalletSimulationService {
    pub fn new(
        presets: Arc<dyn DeviceResponsePresetRepository + Send + Sync>,
        evaluator: Arc<TrustedAuthorityEvaluator>,
        encryption: Arc<dyn EncryptionEnforcement + Send + Sync>,
        telemetry: Arc<dyn TelemetryPublisher + Send + Sync>,
    ) -> Self {
        Self {
            presets,
            evaluator,
            encryption,
            telemetry,
        }
    }

    pub fn simulate(
        &self,
        request: &SimulateMdocRequest,
    ) -> Result<MdocSimulationResult, ValidationError> {
        match self.run(request) {
            Ok(result) => {
                self.telemetry.publish(
                    TelemetryEvent::success(WALLET_RESPONDED)
                        .field("requestId", request.request_id.as_str())
                        .field("profile", request.profile.as_str())
                        .field("responseMode", request.response_mode.as_str())
                        .field("format", result.presentation.format.as_str())
                        .field("docType", result.doc_type.as_str())
                        .field("claims", result.claims.len() as u64),
                );
                Ok(result)
            }
            Err(e) => {
                self.telemetry.publish(
                    TelemetryEvent::failure(
                        WALLET_RESPONDED,
                        &e,
                        request.profile,
                        Some(request.response_mode),
                    )
                    .field("requestId", request.request_id.as_str())
                    .field("format", FORMAT_MSO_MDOC),
                );
                Err(e)
            }
        }
    }

    fn run(&self, request: &SimulateMdocRequest) -> Result<MdocSimulationResult, ValidationError> {
        let encryption_required = request.profile.requires_encryption(request.response_mode);
        if encryption_required {
            self.encryption.ensure_encryption(
                &request.request_id,
                request.profile,
                request.response_mode,
            )?;
        }

        let source = select_source(request.preset_id.as_deref(), request.inline.as_ref())?;
        let credential = match source {
            Source::Preset(preset_id) => self.load_preset(preset_id)?.credential,
            Source::Inline(credential) => credential.clone(),
        };

        let claims = evaluate_claims(&credential.claims, &request.claims_paths)?;

        let device_response = utils::base64_decode_lenient(&credential.device_response)
            .or_problem(ProblemCode::InvalidRequest, "device response is not valid base64")?;
        let device_response_digest = utils::sha256_hex(&device_response);
        debug!(
            request_id = %request.request_id,
            doc_type = %credential.doc_type,
            bytes = device_response.len(),
            "decoded device response"
        );

        let trusted_authority_match = self.evaluator.evaluate(
            request.trusted_authority_policy.as_deref(),
            &credential.trusted_authority_policies,
        )?;

        let payload = response_payload(
            credential.device_response,
            presentation_submission(
                &request.request_id,
                &credential.credential_id,
                &credential.format,
            ),
        );

        let presentation = Presentation {
            credential_id: credential.credential_id,
            format: credential.format,
            holder_binding: false,
            trusted_authority_match,
            vp_token: Json::Object(payload.clone()),
            disclosure_hashes: vec![device_response_digest.clone()],
        };

        let mut result = MdocSimulationResult {
            request_id: request.request_id.clone(),
            profile: request.profile,
            response_mode: request.response_mode,
            preset_id: request.preset_id.clone(),
            doc_type: credential.doc_type,
            presentation,
            payload,
            device_response_digest,
            claims,
            encryption_required,
            trace: None,
        };
        if request.verbose {
            result.trace = Some(result.verbose_trace());
        }
        Ok(result)
    }

    fn load_preset(&self, preset_id: &str) -> Result<DeviceResponsePreset, ValidationError> {
        self.presets
            .load(preset_id)
            .or_problem(
                ProblemCode::WalletUnavailable,
                "device response preset store unavailable",
            )?
            .ok_or_else(|| {
                ValidationError::invalid_request(format!(
                    "unknown device response preset {preset_id}"
                ))
                .with_violation("presetId", preset_id)
            })
    }
}

/// Checks every requested pointer resolves to a present, non-blank claim.
fn evaluate_claims(
    claims: &Map<String, Json>,
    pointers: &[String],
) -> Result<Vec<ClaimEvaluation>, ValidationError> {
    let mut evaluations = Vec::with_capacity(pointers.len());
    let mut unsatisfied = Vec::new();

    for pointer in pointers {
        if pointer.ends_with(DOCTYPE_SUFFIX) {
            evaluations.push(ClaimEvaluation {
                pointer: pointer.clone(),
                status: ClaimStatus::Skipped,
            });
            continue;
        }
        match resolve_claim(claims, pointer) {
            Some(value) if is_present(value) => evaluations.push(ClaimEvaluation {
                pointer: pointer.clone(),
                status: ClaimStatus::Satisfied,
            }),
            _ => unsatisfied.push(pointer.as_str()),
        }
    }

    if unsatisfied.is_empty() {
        return Ok(evaluations);
    }

    warn!(?unsatisfied, "device response lacks requested claims");
    Err(unsatisfied.into_iter().fold(
        ValidationError::invalid_presentation("device response lacks requested claims"),
        |err, pointer| err.with_violation(pointer, "claim is absent or blank"),
    ))
}

/// Looks `pointer` up as a flat key first, then as `<namespace>.<element>`.
fn resolve_claim<'a>(claims: &'a Map<String, Json>, pointer: &str) -> Option<&'a Json> {
    if let Some(value) = claims.get(pointer) {
        return Some(value);
    }
    claims.iter().find_map(|(namespace, elements)| {
        let element = pointer
            .strip_prefix(namespace.as_str())?
            .strip_prefix('.')?;
        elements.as_object()?.get(element)
    })
}

fn is_present(value: &Json) -> bool {
    match value {
        Json::Null => false,
        Json::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

impl ToVerboseTrace for MdocSimulationResult {
    fn verbose_trace(&self) -> VerboseTrace {
        let presentation = &self.presentation;
        VerboseTrace::builder("oid4vp.wallet.simulate.mdoc")
            .metadata("requestId", self.request_id.as_str())
            .metadata("profile", self.profile.as_str())
            .metadata("responseMode", self.response_mode.as_str())
            .step(
                TraceStep::new("document", "device response selected")
                    .attribute("credentialId", presentation.credential_id.as_str())
                    .attribute("docType", self.doc_type.as_str())
                    .attribute("digest", self.device_response_digest.as_str())
                    .attribute_opt("presetId", self.preset_id.clone()),
            )
            .step(
                TraceStep::new("claims", "requested claims evaluated").attribute(
                    "claims",
                    serde_json::to_value(&self.claims).unwrap_or_default(),
                ),
            )
            .step(
                TraceStep::new("trust", "trusted authority evaluated")
                    .attribute_opt(
                        "policy",
                        presentation
                            .trusted_authority_match
                            .as_ref()
                            .map(|v| v.policy.clone()),
                    )
                    .attribute_opt(
                        "label",
                        presentation
                            .trusted_authority_match
                            .as_ref()
                            .map(|v| v.label.clone()),
                    ),
            )
            .step(
                TraceStep::new("encryption", "response protection decided")
                    .attribute("encryptionRequired", self.encryption_required),
            )
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::core::{
        telemetry::RecordingTelemetry,
        trust::{TrustSnapshot, TrustedAuthority},
    };

    const DEVICE_RESPONSE: &str = "o2d2ZXJzaW9uYzEuMGlkb2N1bWVudHOBomdkb2NUeXBldW9yZy5pc28uMTgwMTMuNS4xLm1ETGZzdGF0dXMA";

    #[derive(Debug)]
    struct Presets;

    impl DeviceResponsePresetRepository for Presets {
        fn load(&self, preset_id: &str) -> anyhow::Result<Option<DeviceResponsePreset>> {
            match preset_id {
                "mdl-haip" => Ok(Some(DeviceResponsePreset {
                    preset_id: preset_id.into(),
                    credential: credential(),
                })),
                "offline" => anyhow::bail!("connection refused"),
                _ => Ok(None),
            }
        }
    }

    #[derive(Debug)]
    struct AlwaysEncrypts;

    impl EncryptionEnforcement for AlwaysEncrypts {
        fn ensure_encryption(&self, _: &str, _: Profile, _: ResponseMode) -> Result<(), ValidationError> {
            Ok(())
        }
    }

    fn credential() -> MdocCredential {
        MdocCredential {
            credential_id: "mdl".into(),
            format: FORMAT_MSO_MDOC.into(),
            doc_type: "org.iso.18013.5.1.mDL".into(),
            device_response: DEVICE_RESPONSE.into(),
            claims: json!({
                "org.iso.18013.5.1": {
                    "family_name": "Mustermann",
                    "given_name": "Erika",
                    "portrait": " ",
                    "age_over_18": true
                }
            })
            .as_object()
            .cloned()
            .unwrap(),
            trusted_authority_policies: vec!["aki:s9tIpP7qrS9=".into()],
        }
    }

    fn service() -> (MdocWalletSimulationService, Arc<RecordingTelemetry>) {
        let evaluator = TrustedAuthorityEvaluator::new(&TrustSnapshot {
            authorities: vec![TrustedAuthority {
                authority_type: "aki".into(),
                value: "s9tIpP7qrS9=".into(),
                label: "EU mDL Issuer".into(),
            }],
        });
        let telemetry = Arc::new(RecordingTelemetry::default());
        let service = MdocWalletSimulationService::new(
            Arc::new(Presets),
            Arc::new(evaluator),
            Arc::new(AlwaysEncrypts),
            telemetry.clone(),
        );
        (service, telemetry)
    }

    #[test]
    fn simulates_device_response() {
        let (service, telemetry) = service();
        let result = service
            .simulate(
                &SimulateMdocRequest::from_preset(
                    "req-0001",
                    Profile::Haip,
                    ResponseMode::DirectPostJwt,
                    "mdl-haip",
                )
                .with_claims([
                    "org.iso.18013.5.1.family_name",
                    "org.iso.18013.5.1.age_over_18",
                    "org.iso.18013.5.1.doctype",
                ])
                .with_policy("aki:s9tIpP7qrS9=")
                .verbose(),
            )
            .unwrap();

        let decoded = utils::base64_decode_lenient(DEVICE_RESPONSE).unwrap();
        assert_eq!(result.device_response_digest, utils::sha256_hex(decoded));
        assert_eq!(
            result.presentation.disclosure_hashes,
            [result.device_response_digest.clone()]
        );
        assert_eq!(result.claims[2].status, ClaimStatus::Skipped);
        assert_eq!(
            result.presentation.trusted_authority_match.as_ref().unwrap().label,
            "EU mDL Issuer"
        );
        assert_eq!(result.payload["vp_token"], json!(DEVICE_RESPONSE));
        assert_eq!(result.trace.unwrap().operation, "oid4vp.wallet.simulate.mdoc");
        assert_eq!(telemetry.events().len(), 1);
    }

    #[test]
    fn missing_or_blank_claims_are_listed() {
        let (service, _) = service();
        let err = service
            .simulate(
                &SimulateMdocRequest::from_credential(
                    "req-0001",
                    Profile::Baseline,
                    ResponseMode::DirectPost,
                    credential(),
                )
                .with_claims([
                    "org.iso.18013.5.1.portrait",
                    "org.iso.18013.5.1.given_name",
                    "org.iso.18013.5.1.birth_date",
                ]),
            )
            .unwrap_err();

        assert_eq!(err.code(), ProblemCode::InvalidPresentation);
        let fields: Vec<&str> = err
            .problem()
            .violations
            .iter()
            .map(|v| v.field.as_str())
            .collect();
        assert_eq!(
            fields,
            ["org.iso.18013.5.1.portrait", "org.iso.18013.5.1.birth_date"]
        );
    }

    #[test]
    fn undecodable_device_response_is_invalid_request() {
        let (service, _) = service();
        let mut inline = credential();
        inline.device_response = "not base64 at all!".into();
        let err = service
            .simulate(&SimulateMdocRequest::from_credential(
                "req-0001",
                Profile::Baseline,
                ResponseMode::DirectPost,
                inline,
            ))
            .unwrap_err();
        assert_eq!(err.code(), ProblemCode::InvalidRequest);
    }

    #[test]
    fn standard_alphabet_is_accepted() {
        let (service, _) = service();
        let mut inline = credential();
        inline.device_response = "+/+/".into();
        let result = service
            .simulate(&SimulateMdocRequest::from_credential(
                "req-0001",
                Profile::Baseline,
                ResponseMode::DirectPost,
                inline,
            ))
            .unwrap();
        assert_eq!(result.device_response_digest, utils::sha256_hex([0xfb, 0xff, 0xbf]));
    }

    #[test]
    fn unknown_policy_propagates_invalid_scope() {
        let (service, telemetry) = service();
        let err = service
            .simulate(
                &SimulateMdocRequest::from_preset(
                    "req-0001",
                    Profile::Haip,
                    ResponseMode::DirectPostJwt,
                    "mdl-haip",
                )
                .with_policy("aki:unknown"),
            )
            .unwrap_err();
        assert_eq!(err.code(), ProblemCode::InvalidScope);
        assert_eq!(telemetry.events()[0].fields["reason"], json!("invalid_scope"));
    }

    #[test]
    fn source_is_exclusive_and_store_failures_are_wallet_unavailable() {
        let (service, _) = service();
        let mut request = SimulateMdocRequest::from_preset(
            "req-0001",
            Profile::Baseline,
            ResponseMode::DirectPost,
            "mdl-haip",
        );
        request.inline = Some(credential());
        assert_eq!(
            service.simulate(&request).unwrap_err().code(),
            ProblemCode::InvalidRequest
        );

        let err = service
            .simulate(&SimulateMdocRequest::from_preset(
                "req-0001",
                Profile::Baseline,
                ResponseMode::DirectPost,
                "offline",
            ))
            .unwrap_err();
        assert_eq!(err.code(), ProblemCode::WalletUnavailable);
    }
}
