use std::{fmt::Debug, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::{
    core::{
        direct_post_jwt::EncryptionEnforcement,
        presentation::{Presentation, FORMAT_SD_JWT},
        problem::{ProblemCode, ProblemContext, ValidationError},
        profile::{Profile, ResponseMode},
        telemetry::{TelemetryEvent, TelemetryPublisher, WALLET_RESPONDED},
        trace::{ToVerboseTrace, TraceStep, VerboseTrace},
        trust::TrustedAuthorityVerdict,
    },
    utils,
};

use super::{presentation_submission, response_payload, select_source, Source};

fn default_format() -> String {
    FORMAT_SD_JWT.to_owned()
}

/// An SD-JWT VC held by the simulated wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdJwtCredential {
    pub credential_id: String,
    #[serde(default = "default_format")]
    pub format: String,
    pub issuer_signed_jwt: String,
    #[serde(default)]
    pub disclosures: Vec<String>,
    /// Reused verbatim when it pairs up one-to-one with `disclosures`.
    #[serde(default)]
    pub disclosure_hashes: Option<Vec<String>>,
    #[serde(default)]
    pub key_binding_jwt: Option<String>,
    #[serde(default)]
    pub trusted_authority_policies: Vec<String>,
}

impl SdJwtCredential {
    /// `<issuer-jwt>~<disclosure>~...~<kb-jwt>`; ends in `~` without key binding.
    pub fn compact(&self) -> String {
        let mut compact = self.issuer_signed_jwt.clone();
        for disclosure in &self.disclosures {
            compact.push('~');
            compact.push_str(disclosure);
        }
        compact.push('~');
        if let Some(kb) = &self.key_binding_jwt {
            compact.push_str(kb);
        }
        compact
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPreset {
    pub preset_id: String,
    #[serde(flatten)]
    pub credential: SdJwtCredential,
}

pub trait WalletPresetRepository: Debug {
    fn load(&self, preset_id: &str) -> anyhow::Result<Option<WalletPreset>>;
}

/// Input of [WalletSimulationService::simulate].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulateSdJwtRequest {
    pub request_id: String,
    pub profile: Profile,
    pub response_mode: ResponseMode,
    pub preset_id: Option<String>,
    pub inline: Option<SdJwtCredential>,
    pub trusted_authority_policy: Option<String>,
    pub verbose: bool,
}

impl SimulateSdJwtRequest {
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
            trusted_authority_policy: None,
            verbose: false,
        }
    }

    pub fn from_credential(
        request_id: impl Into<String>,
        profile: Profile,
        response_mode: ResponseMode,
        credential: SdJwtCredential,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            profile,
            response_mode,
            preset_id: None,
            inline: Some(credential),
            trusted_authority_policy: None,
            verbose: false,
        }
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

#[derive(Debug, Clone, PartialEq)]
pub struct WalletSimulationResult {
    pub request_id: String,
    pub profile: Profile,
    pub response_mode: ResponseMode,
    pub preset_id: Option<String>,
    pub presentation: Presentation,
    /// `{vp_token, presentation_submission}`, ready to post or encrypt.
    pub payload: Map<String, Json>,
    pub encryption_required: bool,
    pub trace: Option<VerboseTrace>,
}

/// Simulates an SD-JWT wallet answering an authorization request.
#[derive(Debug, Clone)]
pub struct WalletSimulationService {
    presets: Arc<dyn WalletPresetRepository + Send + Sync>,
    encryption: Arc<dyn EncryptionEnforcement + Send + Sync>,
    telemetry: Arc<dyn TelemetryPublisher + Send + Sync>,
}

impl WalletSimulationService {
    pub fn new(
        presets: Arc<dyn WalletPresetRepository + Send + Sync>,
        encryption: Arc<dyn EncryptionEnforcement + Send + Sync>,
        telemetry: Arc<dyn TelemetryPublisher + Send + Sync>,
    ) -> Self {
        Self {
            presets,
            encryption,
            telemetry,
        }
    }

    pub fn simulate(
        &self,
        request: &SimulateSdJwtRequest,
    ) -> Result<WalletSimulationResult, ValidationError> {
        match self.run(request) {
            Ok(result) => {
                self.telemetry.publish(
                    TelemetryEvent::success(WALLET_RESPONDED)
                        .field("requestId", request.request_id.as_str())
                        .field("profile", request.profile.as_str())
                        .field("responseMode", request.response_mode.as_str())
                        .field("format", result.presentation.format.as_str())
                        .field("credentialId", result.presentation.credential_id.as_str())
                        .field("holderBinding", result.presentation.holder_binding)
                        .field(
                            "disclosures",
                            result.presentation.disclosure_hashes.len() as u64,
                        ),
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
                    .field("format", FORMAT_SD_JWT),
                );
                Err(e)
            }
        }
    }

    fn run(
        &self,
        request: &SimulateSdJwtRequest,
    ) -> Result<WalletSimulationResult, ValidationError> {
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

        let disclosure_hashes = utils::disclosure_hashes(
            &credential.disclosures,
            credential.disclosure_hashes.as_deref(),
        );

        let trusted_authority_match = match request
            .trusted_authority_policy
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        {
            Some(policy) if credential.trusted_authority_policies.iter().any(|c| c == policy) => {
                Some(TrustedAuthorityVerdict::from_policy(policy))
            }
            Some(policy) => {
                warn!(policy, "wallet credential does not carry requested policy");
                return Err(ValidationError::invalid_scope(format!(
                    "Trusted Authority policy {policy} not satisfied by wallet"
                ))
                .with_violation("trustedAuthorityPolicy", policy));
            }
            None => None,
        };

        let payload = response_payload(
            credential.compact(),
            presentation_submission(
                &request.request_id,
                &credential.credential_id,
                &credential.format,
            ),
        );
        debug!(
            request_id = %request.request_id,
            disclosures = disclosure_hashes.len(),
            "assembled SD-JWT presentation"
        );

        let presentation = Presentation {
            credential_id: credential.credential_id,
            format: credential.format,
            holder_binding: credential.key_binding_jwt.is_some(),
            trusted_authority_match,
            vp_token: Json::Object(payload.clone()),
            disclosure_hashes,
        };

        let mut result = WalletSimulationResult {
            request_id: request.request_id.clone(),
            profile: request.profile,
            response_mode: request.response_mode,
            preset_id: request.preset_id.clone(),
            presentation,
            payload,
            encryption_required,
            trace: None,
        };
        if request.verbose {
            result.trace = Some(result.verbose_trace());
        }
        Ok(result)
    }

    fn load_preset(&self, preset_id: &str) -> Result<WalletPreset, ValidationError> {
        self.presets
            .load(preset_id)
            .or_problem(ProblemCode::WalletUnavailable, "wallet preset store unavailable")?
            .ok_or_else(|| {
                ValidationError::invalid_request(format!("unknown wallet preset {preset_id}"))
                    .with_violation("presetId", preset_id)
            })
    }
}

impl ToVerboseTrace for WalletSimulationResult {
    fn verbose_trace(&self) -> VerboseTrace {
        let presentation = &self.presentation;
        VerboseTrace::builder("oid4vp.wallet.simulate.sd-jwt")
            .metadata("requestId", self.request_id.as_str())
            .metadata("profile", self.profile.as_str())
            .metadata("responseMode", self.response_mode.as_str())
            .step(
                TraceStep::new("credential", "credential selected")
                    .attribute("credentialId", presentation.credential_id.as_str())
                    .attribute("format", presentation.format.as_str())
                    .attribute_opt("presetId", self.preset_id.clone()),
            )
            .step(
                TraceStep::new("disclosures", "disclosures hashed")
                    .attribute("disclosureHashes", presentation.disclosure_hashes.clone())
                    .attribute("holderBinding", presentation.holder_binding),
            )
            .step(
                TraceStep::new("trust", "trusted authority matched").attribute_opt(
                    "policy",
                    presentation
                        .trusted_authority_match
                        .as_ref()
                        .map(|v| v.policy.clone()),
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
    use crate::core::telemetry::{Outcome, RecordingTelemetry};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Presets;

    impl WalletPresetRepository for Presets {
        fn load(&self, preset_id: &str) -> anyhow::Result<Option<WalletPreset>> {
            match preset_id {
                "pid-haip-baseline" => Ok(Some(WalletPreset {
                    preset_id: preset_id.into(),
                    credential: credential(),
                })),
                "offline" => anyhow::bail!("connection refused"),
                _ => Ok(None),
            }
        }
    }

    #[derive(Debug, Default)]
    struct Enforcement {
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    impl EncryptionEnforcement for Enforcement {
        fn ensure_encryption(
            &self,
            request_id: &str,
            _: Profile,
            _: ResponseMode,
        ) -> Result<(), ValidationError> {
            self.calls.lock().unwrap().push(request_id.to_owned());
            if self.fail {
                Err(ValidationError::invalid_request("no encryption key"))
            } else {
                Ok(())
            }
        }
    }

    fn credential() -> SdJwtCredential {
        SdJwtCredential {
            credential_id: "pid".into(),
            format: FORMAT_SD_JWT.into(),
            issuer_signed_jwt: "eyJhbGciOiJFUzI1NiJ9.eyJ2Y3QiOiJwaWQifQ.sig".into(),
            disclosures: vec!["WyJzMSIsImdpdmVuX25hbWUiLCJFcmlrYSJd".into(), "WyJzMiIsImZhbWlseV9uYW1lIiwiTXVzdGVybWFubiJd".into()],
            disclosure_hashes: None,
            key_binding_jwt: Some("eyJ0eXAiOiJrYitqd3QifQ.e30.kb".into()),
            trusted_authority_policies: vec!["aki:s9tIpP7qrS9=".into()],
        }
    }

    fn service(fail: bool) -> (WalletSimulationService, Arc<Enforcement>, Arc<RecordingTelemetry>) {
        let enforcement = Arc::new(Enforcement {
            fail,
            ..Default::default()
        });
        let telemetry = Arc::new(RecordingTelemetry::default());
        let service = WalletSimulationService::new(
            Arc::new(Presets),
            enforcement.clone(),
            telemetry.clone(),
        );
        (service, enforcement, telemetry)
    }

    #[test]
    fn simulates_preset_with_policy() {
        let (service, enforcement, telemetry) = service(false);
        let result = service
            .simulate(
                &SimulateSdJwtRequest::from_preset(
                    "req-0001",
                    Profile::Haip,
                    ResponseMode::DirectPostJwt,
                    "pid-haip-baseline",
                )
                .with_policy("aki:s9tIpP7qrS9=")
                .verbose(),
            )
            .unwrap();

        let presentation = &result.presentation;
        assert!(presentation.holder_binding);
        assert_eq!(
            presentation.trusted_authority_match.as_ref().unwrap().policy,
            "aki:s9tIpP7qrS9="
        );
        assert_eq!(
            presentation.disclosure_hashes[0],
            utils::prefixed_sha256("WyJzMSIsImdpdmVuX25hbWUiLCJFcmlrYSJd")
        );
        assert!(result.encryption_required);
        assert_eq!(enforcement.calls.lock().unwrap().as_slice(), ["req-0001"]);
        assert!(result.payload["vp_token"]
            .as_str()
            .unwrap()
            .ends_with("~eyJ0eXAiOiJrYitqd3QifQ.e30.kb"));
        assert_eq!(
            result.trace.unwrap().operation,
            "oid4vp.wallet.simulate.sd-jwt"
        );
        assert_eq!(telemetry.events().len(), 1);
    }

    #[test]
    fn enforcement_runs_before_source_resolution() {
        let (service, _, telemetry) = service(true);
        let err = service
            .simulate(&SimulateSdJwtRequest::from_preset(
                "req-0001",
                Profile::Haip,
                ResponseMode::DirectPostJwt,
                "does-not-exist",
            ))
            .unwrap_err();
        assert_eq!(err.problem().detail, "no encryption key");
        assert_eq!(telemetry.events()[0].outcome, Outcome::Failure);
    }

    #[test]
    fn enforcement_skipped_outside_haip_direct_post_jwt() {
        let (service, enforcement, _) = service(true);
        let mut inline = credential();
        inline.key_binding_jwt = None;
        inline.disclosure_hashes = Some(vec!["sha-256:a".into(), "sha-256:b".into()]);
        let result = service
            .simulate(&SimulateSdJwtRequest::from_credential(
                "req-0002",
                Profile::Baseline,
                ResponseMode::DirectPost,
                inline,
            ))
            .unwrap();

        assert!(enforcement.calls.lock().unwrap().is_empty());
        assert!(!result.presentation.holder_binding);
        assert_eq!(result.presentation.disclosure_hashes, ["sha-256:a", "sha-256:b"]);
        assert!(result.payload["vp_token"].as_str().unwrap().ends_with('~'));
        assert!(result.presentation.trusted_authority_match.is_none());
    }

    #[test]
    fn missing_policy_is_invalid_scope() {
        let (service, _, _) = service(false);
        let err = service
            .simulate(
                &SimulateSdJwtRequest::from_preset(
                    "req-0001",
                    Profile::Baseline,
                    ResponseMode::DirectPost,
                    "pid-haip-baseline",
                )
                .with_policy("aki:unknown"),
            )
            .unwrap_err();
        assert_eq!(err.code(), ProblemCode::InvalidScope);
    }

    #[test]
    fn source_must_be_exactly_one_of_preset_and_inline() {
        let (service, _, _) = service(false);
        let mut request = SimulateSdJwtRequest::from_preset(
            "req-0001",
            Profile::Baseline,
            ResponseMode::DirectPost,
            "pid-haip-baseline",
        );
        request.inline = Some(credential());
        assert_eq!(
            service.simulate(&request).unwrap_err().code(),
            ProblemCode::InvalidRequest
        );

        request.inline = None;
        request.preset_id = None;
        assert_eq!(
            service.simulate(&request).unwrap_err().code(),
            ProblemCode::InvalidRequest
        );
    }

    #[test]
    fn preset_store_failure_is_wallet_unavailable() {
        let (service, _, _) = service(false);
        let err = service
            .simulate(&SimulateSdJwtRequest::from_preset(
                "req-0001",
                Profile::Baseline,
                ResponseMode::Fragment,
                "offline",
            ))
            .unwrap_err();
        assert_eq!(err.code(), ProblemCode::WalletUnavailable);
        assert_eq!(err.problem().status, 503);
    }
}
