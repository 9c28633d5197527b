use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::{
    config::Config,
    core::{
        direct_post_jwt::DirectPostJwtEncryptionService,
        presentation::Presentation,
        problem::{ProblemCode, ProblemContext, ValidationError},
        profile::{Profile, ResponseMode},
        telemetry::{TelemetryEvent, TelemetryPublisher, RESPONSE_VALIDATED},
        trace::{ToVerboseTrace, TraceStep, VerboseTrace},
        trust::{TrustedAuthorityEvaluator, TrustedAuthorityVerdict},
    },
    utils,
};

/// A presentation fixture held by the verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPresentation {
    pub presentation_id: String,
    pub credential_id: String,
    pub format: String,
    /// Plaintext vp-token payload.
    pub vp_token: Map<String, Json>,
    #[serde(default)]
    pub disclosures: Vec<String>,
    #[serde(default)]
    pub key_binding_jwt: Option<String>,
    #[serde(default)]
    pub trusted_authority_policies: Vec<String>,
}

/// Storage interface for verifier-held presentations.
pub trait StoredPresentationRepository: Debug {
    fn load(&self, presentation_id: &str) -> anyhow::Result<Option<StoredPresentation>>;
}

/// A vp-token payload as posted by a wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VpTokenPayload {
    Plain(Map<String, Json>),
    /// `direct_post.jwt` compact JWE.
    DirectPostJwt(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlinePresentation {
    pub credential_id: String,
    pub format: String,
    pub vp_token: VpTokenPayload,
    #[serde(default)]
    pub disclosures: Vec<String>,
    #[serde(default)]
    pub key_binding_jwt: Option<String>,
    #[serde(default)]
    pub trusted_authority_policies: Vec<String>,
}

/// Input of [ValidationService::validate].
///
/// Exactly one of `stored_presentation_id` and `inline_vp_token` must be set.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateRequest {
    pub request_id: String,
    pub profile: Profile,
    pub response_mode_override: Option<ResponseMode>,
    pub stored_presentation_id: Option<String>,
    pub inline_vp_token: Option<InlinePresentation>,
    pub trusted_authority_policy: Option<String>,
    pub dcql_json: Option<String>,
    pub verbose: bool,
}

impl ValidateRequest {
    pub fn stored(
        request_id: impl Into<String>,
        profile: Profile,
        presentation_id: impl Into<String>,
    ) -> Self {
        Self::new(request_id.into(), profile, Some(presentation_id.into()), None)
    }

    pub fn inline(
        request_id: impl Into<String>,
        profile: Profile,
        presentation: InlinePresentation,
    ) -> Self {
        Self::new(request_id.into(), profile, None, Some(presentation))
    }

    fn new(
        request_id: String,
        profile: Profile,
        stored_presentation_id: Option<String>,
        inline_vp_token: Option<InlinePresentation>,
    ) -> Self {
        Self {
            request_id,
            profile,
            response_mode_override: None,
            stored_presentation_id,
            inline_vp_token,
            trusted_authority_policy: None,
            dcql_json: None,
            verbose: false,
        }
    }

    pub fn with_response_mode(mut self, response_mode: ResponseMode) -> Self {
        self.response_mode_override = Some(response_mode);
        self
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.trusted_authority_policy = Some(policy.into());
        self
    }

    pub fn with_dcql_json(mut self, dcql_json: impl Into<String>) -> Self {
        self.dcql_json = Some(dcql_json.into());
        self
    }

    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// The override if given, else the profile's default.
    pub fn effective_response_mode(&self) -> ResponseMode {
        self.response_mode_override
            .unwrap_or_else(|| self.profile.default_response_mode())
    }
}

/// Hashes and verdicts collected while validating a presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationTrace {
    pub vp_token_hash: String,
    pub key_binding_jwt_hash: Option<String>,
    pub disclosure_hashes: Vec<String>,
    pub trusted_authority: Option<TrustedAuthorityVerdict>,
    /// Id of the stored presentation, when one was used.
    pub preset_id: Option<String>,
    pub dcql_preview: Option<String>,
    pub presentation_submission: BTreeMap<String, Json>,
    pub decrypted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub request_id: String,
    pub profile: Profile,
    pub response_mode: ResponseMode,
    pub presentation: Presentation,
    pub trace: ValidationTrace,
    pub verbose_trace: Option<VerboseTrace>,
}

/// The uniform view of a presentation, whichever source it came from.
#[derive(Debug)]
struct Submission {
    preset_id: Option<String>,
    credential_id: String,
    format: String,
    payload: Map<String, Json>,
    disclosures: Vec<String>,
    key_binding_jwt: Option<String>,
    trusted_authority_policies: Vec<String>,
    decrypted: bool,
}

impl From<StoredPresentation> for Submission {
    fn from(stored: StoredPresentation) -> Self {
        Self {
            preset_id: Some(stored.presentation_id),
            credential_id: stored.credential_id,
            format: stored.format,
            payload: stored.vp_token,
            disclosures: stored.disclosures,
            key_binding_jwt: stored.key_binding_jwt,
            trusted_authority_policies: stored.trusted_authority_policies,
            decrypted: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationService {
    config: Arc<Config>,
    presentations: Arc<dyn StoredPresentationRepository + Send + Sync>,
    evaluator: Arc<TrustedAuthorityEvaluator>,
    encryption: DirectPostJwtEncryptionService,
    telemetry: Arc<dyn TelemetryPublisher + Send + Sync>,
}

impl ValidationService {
    pub fn new(
        config: Arc<Config>,
        presentations: Arc<dyn StoredPresentationRepository + Send + Sync>,
        encryption: DirectPostJwtEncryptionService,
        telemetry: Arc<dyn TelemetryPublisher + Send + Sync>,
    ) -> Self {
        let evaluator = Arc::new(TrustedAuthorityEvaluator::new(&config.trust_snapshot));
        Self {
            config,
            presentations,
            evaluator,
            encryption,
            telemetry,
        }
    }

    /// Validates a wallet response against the requested trust policy.
    ///
    /// Every outcome publishes exactly one telemetry event; errors are
    /// returned unchanged.
    pub fn validate(&self, request: &ValidateRequest) -> Result<ValidationResult, ValidationError> {
        let response_mode = request.effective_response_mode();
        match self.run(request, response_mode) {
            Ok(result) => {
                self.telemetry.publish(
                    TelemetryEvent::success(RESPONSE_VALIDATED)
                        .field("requestId", request.request_id.as_str())
                        .field("profile", request.profile.as_str())
                        .field("responseMode", response_mode.as_str())
                        .field("credentialId", result.presentation.credential_id.as_str())
                        .field("format", result.presentation.format.as_str())
                        .field("holderBinding", result.presentation.holder_binding)
                        .field("decrypted", result.trace.decrypted)
                        .field(
                            "trustedAuthority",
                            result.trace.trusted_authority.as_ref().map(|v| v.policy.clone()),
                        ),
                );
                Ok(result)
            }
            Err(e) => {
                self.telemetry.publish(
                    TelemetryEvent::failure(
                        RESPONSE_VALIDATED,
                        &e,
                        request.profile,
                        Some(response_mode),
                    )
                    .field("requestId", request.request_id.as_str()),
                );
                Err(e)
            }
        }
    }

    fn run(
        &self,
        request: &ValidateRequest,
        response_mode: ResponseMode,
    ) -> Result<ValidationResult, ValidationError> {
        let submission = self.resolve_submission(request, response_mode)?;

        let verdict = self.evaluator.evaluate(
            request.trusted_authority_policy.as_deref(),
            &submission.trusted_authority_policies,
        )?;

        let mut result = self.verify(request, response_mode, submission, verdict)?;
        if request.verbose {
            result.verbose_trace = Some(result.verbose_trace());
        }
        Ok(result)
    }

    fn resolve_submission(
        &self,
        request: &ValidateRequest,
        response_mode: ResponseMode,
    ) -> Result<Submission, ValidationError> {
        match (&request.stored_presentation_id, &request.inline_vp_token) {
            (Some(id), None) => self.load_stored(id),
            (None, Some(inline)) => self.resolve_inline(request, response_mode, inline),
            _ => Err(ValidationError::invalid_request(
                "exactly one of storedPresentationId and inlineVpToken must be provided",
            )
            .with_violation("storedPresentationId", "mutually exclusive with inlineVpToken")),
        }
    }

    fn load_stored(&self, presentation_id: &str) -> Result<Submission, ValidationError> {
        let stored = self
            .presentations
            .load(presentation_id)
            .or_problem(ProblemCode::InvalidRequest, "unable to load stored presentation")?
            .ok_or_else(|| {
                ValidationError::invalid_request(format!(
                    "unknown stored presentation {presentation_id}"
                ))
                .with_violation("storedPresentationId", presentation_id)
            })?;
        Ok(stored.into())
    }

    fn resolve_inline(
        &self,
        request: &ValidateRequest,
        response_mode: ResponseMode,
        inline: &InlinePresentation,
    ) -> Result<Submission, ValidationError> {
        let encryption_required = request.profile.requires_encryption(response_mode);
        let (payload, decrypted) = match &inline.vp_token {
            VpTokenPayload::Plain(_) if encryption_required => {
                return Err(ValidationError::invalid_request(
                    "HAIP direct_post.jwt responses must be encrypted",
                )
                .with_violation("vpToken", "expected a direct_post.jwt response"))
            }
            VpTokenPayload::Plain(payload) => (payload.clone(), false),
            VpTokenPayload::DirectPostJwt(_) if !encryption_required => {
                return Err(ValidationError::invalid_request(format!(
                    "encrypted responses are not accepted for {} with {response_mode}",
                    request.profile
                ))
                .with_violation("vpToken", "expected a plain vp_token payload"))
            }
            VpTokenPayload::DirectPostJwt(jwe) => {
                let decrypted =
                    self.encryption
                        .decrypt(&request.request_id, request.profile, jwe)?;
                debug!(
                    request_id = %request.request_id,
                    key_id = ?decrypted.key_id,
                    "decrypted direct_post.jwt response"
                );
                (decrypted.payload, true)
            }
        };

        Ok(Submission {
            preset_id: None,
            credential_id: inline.credential_id.clone(),
            format: inline.format.clone(),
            payload,
            disclosures: inline.disclosures.clone(),
            key_binding_jwt: inline.key_binding_jwt.clone(),
            trusted_authority_policies: inline.trusted_authority_policies.clone(),
            decrypted,
        })
    }

    fn verify(
        &self,
        request: &ValidateRequest,
        response_mode: ResponseMode,
        submission: Submission,
        verdict: Option<TrustedAuthorityVerdict>,
    ) -> Result<ValidationResult, ValidationError> {
        let vp_token = match submission.payload.get("vp_token") {
            Some(Json::String(token)) if !token.trim().is_empty() => token,
            _ => {
                warn!(request_id = %request.request_id, "vp_token missing or blank");
                return Err(ValidationError::invalid_presentation(
                    "vp_token must be a non-blank string",
                )
                .with_violation("vp_token", "missing or blank"));
            }
        };
        let vp_token_hash = utils::prefixed_sha256(vp_token);

        let presentation_submission = match submission.payload.get("presentation_submission") {
            Some(Json::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => BTreeMap::new(),
        };

        let disclosure_hashes = utils::disclosure_hashes(&submission.disclosures, None);
        let key_binding_jwt_hash = submission
            .key_binding_jwt
            .as_deref()
            .map(utils::prefixed_sha256);

        let dcql_preview = request
            .dcql_json
            .as_deref()
            .map(|raw| utils::preview(&compact_json(raw), self.config.dcql_preview_limit));

        let presentation = Presentation {
            credential_id: submission.credential_id,
            format: submission.format,
            holder_binding: submission.key_binding_jwt.is_some(),
            trusted_authority_match: verdict.clone(),
            vp_token: Json::Object(submission.payload),
            disclosure_hashes: disclosure_hashes.clone(),
        };

        Ok(ValidationResult {
            request_id: request.request_id.clone(),
            profile: request.profile,
            response_mode,
            presentation,
            trace: ValidationTrace {
                vp_token_hash,
                key_binding_jwt_hash,
                disclosure_hashes,
                trusted_authority: verdict,
                preset_id: submission.preset_id,
                dcql_preview,
                presentation_submission,
                decrypted: submission.decrypted,
            },
            verbose_trace: None,
        })
    }
}

/// Compact JSON when `raw` parses, `raw` itself otherwise.
fn compact_json(raw: &str) -> String {
    serde_json::from_str::<Json>(raw)
        .ok()
        .and_then(|json| serde_json::to_string(&json).ok())
        .unwrap_or_else(|| raw.to_owned())
}

impl ToVerboseTrace for ValidationResult {
    fn verbose_trace(&self) -> VerboseTrace {
        let trace = &self.trace;
        VerboseTrace::builder("oid4vp.response.validate")
            .metadata("requestId", self.request_id.as_str())
            .metadata("profile", self.profile.as_str())
            .metadata("responseMode", self.response_mode.as_str())
            .step(
                TraceStep::new("submission", "submission resolved")
                    .attribute("credentialId", self.presentation.credential_id.as_str())
                    .attribute("format", self.presentation.format.as_str())
                    .attribute("decrypted", trace.decrypted)
                    .attribute_opt("presetId", trace.preset_id.clone()),
            )
            .step(
                TraceStep::new("trust", "trusted authority evaluated")
                    .attribute_opt(
                        "policy",
                        trace.trusted_authority.as_ref().map(|v| v.policy.clone()),
                    )
                    .attribute_opt(
                        "label",
                        trace.trusted_authority.as_ref().map(|v| v.label.clone()),
                    ),
            )
            .step(
                TraceStep::new("hashes", "presentation hashed")
                    .attribute("vpTokenHash", trace.vp_token_hash.as_str())
                    .attribute_opt("keyBindingJwtHash", trace.key_binding_jwt_hash.clone())
                    .attribute("disclosureHashes", trace.disclosure_hashes.clone())
                    .attribute("holderBinding", self.presentation.holder_binding),
            )
            .step(
                TraceStep::new("dcql", "DCQL query previewed")
                    .attribute_opt("preview", trace.dcql_preview.clone()),
            )
            .build()
    }
}
