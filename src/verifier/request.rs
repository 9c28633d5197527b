use std::{fmt::Debug, sync::Arc};

use anyhow::{anyhow, Context};
use qrcode::{render::unicode, QrCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;
use url::Url;

use crate::{
    config::Config,
    core::{
        problem::{ProblemCode, ProblemContext, ValidationError},
        profile::{Profile, ResponseMode},
        seed::SeedSequence,
        telemetry::{TelemetryEvent, TelemetryPublisher, REQUEST_CREATED},
        trace::{ToVerboseTrace, TraceStep, VerboseTrace},
    },
};

/// A stored DCQL query together with the client it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DcqlPreset {
    pub preset_id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    pub dcql_query: Json,
    /// Needed to sign requests.
    #[serde(default)]
    pub client_metadata: Option<Json>,
}

/// Storage interface for DCQL presets.
pub trait DcqlPresetRepository: Debug {
    fn load(&self, preset_id: &str) -> anyhow::Result<Option<DcqlPreset>>;
}

/// Input of [AuthorizationRequestService::create].
#[derive(Debug, Clone, PartialEq)]
pub struct CreateAuthorizationRequest {
    pub profile: Profile,
    pub response_mode: ResponseMode,
    pub dcql_preset_id: Option<String>,
    pub dcql_override: Option<Json>,
    pub signed_request: bool,
    pub include_qr: bool,
    pub verbose: bool,
}

impl CreateAuthorizationRequest {
    pub fn new(profile: Profile, response_mode: ResponseMode) -> Self {
        Self {
            profile,
            response_mode,
            dcql_preset_id: None,
            dcql_override: None,
            signed_request: false,
            include_qr: false,
            verbose: false,
        }
    }

    pub fn with_dcql_preset(mut self, preset_id: impl Into<String>) -> Self {
        self.dcql_preset_id = Some(preset_id.into());
        self
    }

    pub fn with_dcql_override(mut self, dcql_query: Json) -> Self {
        self.dcql_override = Some(dcql_query);
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed_request = true;
        self
    }

    pub fn with_qr(mut self) -> Self {
        self.include_qr = true;
        self
    }

    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }
}

/// A verifier authorization request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    pub request_id: String,
    pub profile: Profile,
    pub client_id: String,
    pub nonce: String,
    pub state: String,
    pub response_mode: ResponseMode,
    pub presentation_definition: Json,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_uri: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_metadata: Option<Json>,
    pub signed: bool,
}

/// The request rendered for cross-device hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestQr {
    pub uri: Url,
    /// Text rendering of the QR code.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationRequestResult {
    pub request: AuthorizationRequest,
    pub qr: Option<RequestQr>,
    pub trace: Option<VerboseTrace>,
}

#[derive(Debug, Clone)]
pub struct AuthorizationRequestService {
    config: Arc<Config>,
    presets: Arc<dyn DcqlPresetRepository + Send + Sync>,
    seeds: Arc<dyn SeedSequence + Send + Sync>,
    telemetry: Arc<dyn TelemetryPublisher + Send + Sync>,
}

impl AuthorizationRequestService {
    pub fn new(
        config: Arc<Config>,
        presets: Arc<dyn DcqlPresetRepository + Send + Sync>,
        seeds: Arc<dyn SeedSequence + Send + Sync>,
        telemetry: Arc<dyn TelemetryPublisher + Send + Sync>,
    ) -> Self {
        Self {
            config,
            presets,
            seeds,
            telemetry,
        }
    }

    /// Creates an authorization request.
    ///
    /// Signed requests need a preset carrying client metadata. The
    /// presentation definition comes from the override, else the preset.
    pub fn create(
        &self,
        command: &CreateAuthorizationRequest,
    ) -> Result<AuthorizationRequestResult, ValidationError> {
        match self.build(command) {
            Ok(result) => {
                self.telemetry.publish(
                    TelemetryEvent::success(REQUEST_CREATED)
                        .field("requestId", result.request.request_id.as_str())
                        .field("profile", command.profile.as_str())
                        .field("responseMode", command.response_mode.as_str())
                        .field("clientId", result.request.client_id.as_str())
                        .field("signed", command.signed_request)
                        .field("dcqlPresetId", command.dcql_preset_id.clone()),
                );
                Ok(result)
            }
            Err(e) => {
                self.telemetry.publish(
                    TelemetryEvent::failure(
                        REQUEST_CREATED,
                        &e,
                        command.profile,
                        Some(command.response_mode),
                    )
                    .field("dcqlPresetId", command.dcql_preset_id.clone()),
                );
                Err(e)
            }
        }
    }

    fn build(
        &self,
        command: &CreateAuthorizationRequest,
    ) -> Result<AuthorizationRequestResult, ValidationError> {
        let preset = command
            .dcql_preset_id
            .as_deref()
            .map(|id| self.load_preset(id))
            .transpose()?;

        if command.signed_request {
            let has_metadata = preset
                .as_ref()
                .is_some_and(|p| p.client_metadata.is_some());
            if !has_metadata {
                return Err(ValidationError::invalid_request(
                    "signed authorization requests require a DCQL preset carrying client metadata",
                )
                .with_violation("dcqlPresetId", "required when signedRequest is true"));
            }
        }

        let presentation_definition = command
            .dcql_override
            .clone()
            .or_else(|| preset.as_ref().map(|p| p.dcql_query.clone()))
            .ok_or_else(|| {
                ValidationError::invalid_request("a DCQL preset or DCQL override is required")
                    .with_violation("dcqlQuery", "missing")
            })?;

        let client_id = preset
            .as_ref()
            .and_then(|p| p.client_id.clone())
            .unwrap_or_else(|| self.config.default_client_id(command.profile).to_owned());

        let request_id = self.seeds.next_request_id();
        let nonce = self.seeds.next_nonce();
        let state = self.seeds.next_state();

        let response_uri = if command.response_mode.is_direct_post() {
            Some(
                self.config
                    .response_uri(&request_id)
                    .or_problem(ProblemCode::InvalidRequest, "unable to build response_uri")?,
            )
        } else {
            None
        };

        let request = AuthorizationRequest {
            request_id,
            profile: command.profile,
            client_id,
            nonce,
            state,
            response_mode: command.response_mode,
            presentation_definition,
            response_uri,
            client_metadata: preset.and_then(|p| p.client_metadata),
            signed: command.signed_request,
        };
        debug!(
            request_id = %request.request_id,
            response_mode = %request.response_mode,
            "created authorization request"
        );

        let qr = if command.include_qr {
            Some(
                render_qr(&self.config.authorization_endpoint, &request)
                    .or_problem(ProblemCode::InvalidRequest, "unable to render request QR code")?,
            )
        } else {
            None
        };

        let mut result = AuthorizationRequestResult {
            request,
            qr,
            trace: None,
        };
        if command.verbose {
            result.trace = Some(result.verbose_trace());
        }
        Ok(result)
    }

    fn load_preset(&self, preset_id: &str) -> Result<DcqlPreset, ValidationError> {
        self.presets
            .load(preset_id)
            .or_problem(ProblemCode::InvalidRequest, "unable to load DCQL preset")?
            .ok_or_else(|| {
                ValidationError::invalid_request(format!("unknown DCQL preset {preset_id}"))
                    .with_violation("dcqlPresetId", preset_id)
            })
    }
}

/// Builds the `openid4vp://` request URI and renders it as a QR code.
fn render_qr(endpoint: &Url, request: &AuthorizationRequest) -> anyhow::Result<RequestQr> {
    let dcql_query = serde_json::to_string(&request.presentation_definition)
        .context("unable to serialize DCQL query")?;

    let mut uri = endpoint.clone();
    {
        let mut query = uri.query_pairs_mut();
        query
            .append_pair("client_id", &request.client_id)
            .append_pair("response_type", "vp_token")
            .append_pair("response_mode", request.response_mode.as_str())
            .append_pair("nonce", &request.nonce)
            .append_pair("state", &request.state)
            .append_pair("dcql_query", &dcql_query);
        if let Some(response_uri) = &request.response_uri {
            query.append_pair("response_uri", response_uri.as_str());
        }
    }

    let code = QrCode::new(uri.as_str().as_bytes()).map_err(|e| anyhow!("{e}"))?;
    let text = code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build();

    Ok(RequestQr { uri, text })
}

impl ToVerboseTrace for AuthorizationRequestResult {
    fn verbose_trace(&self) -> VerboseTrace {
        let request = &self.request;
        VerboseTrace::builder("oid4vp.request.create")
            .metadata("requestId", request.request_id.as_str())
            .metadata("profile", request.profile.as_str())
            .metadata("responseMode", request.response_mode.as_str())
            .step(
                TraceStep::new("client", "client identifier resolved")
                    .attribute("clientId", request.client_id.as_str())
                    .attribute("signed", request.signed)
                    .attribute("clientMetadata", request.client_metadata.is_some()),
            )
            .step(
                TraceStep::new("seeds", "nonce and state generated")
                    .attribute("nonce", request.nonce.as_str())
                    .attribute("state", request.state.as_str()),
            )
            .step(
                TraceStep::new("response", "response delivery selected")
                    .attribute(
                        "encryptionRequired",
                        request.profile.requires_encryption(request.response_mode),
                    )
                    .attribute_opt(
                        "responseUri",
                        request.response_uri.as_ref().map(Url::to_string),
                    ),
            )
            .step(
                TraceStep::new("qr", "request URI rendered")
                    .attribute("included", self.qr.is_some())
                    .attribute_opt("uri", self.qr.as_ref().map(|qr| qr.uri.to_string())),
            )
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{seed::CountingSeedSequence, telemetry::RecordingTelemetry};
    use serde_json::json;

    #[derive(Debug)]
    struct Presets(Vec<DcqlPreset>);

    impl DcqlPresetRepository for Presets {
        fn load(&self, preset_id: &str) -> anyhow::Result<Option<DcqlPreset>> {
            Ok(self.0.iter().find(|p| p.preset_id == preset_id).cloned())
        }
    }

    fn pid_query() -> Json {
        json!({ "credentials": [{ "id": "pid", "format": "dc+sd-jwt", "meta": { "vct_values": ["urn:eudi:pid:1"] } }] })
    }

    fn service() -> (AuthorizationRequestService, Arc<RecordingTelemetry>) {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let presets = Presets(vec![
            DcqlPreset {
                preset_id: "pid-haip-baseline".into(),
                client_id: Some("x509_san_dns:verifier.example.com".into()),
                dcql_query: pid_query(),
                client_metadata: Some(json!({ "vp_formats": { "dc+sd-jwt": {} } })),
            },
            DcqlPreset {
                preset_id: "pid-no-metadata".into(),
                client_id: None,
                dcql_query: pid_query(),
                client_metadata: None,
            },
        ]);
        let service = AuthorizationRequestService::new(
            Arc::new(Config::default()),
            Arc::new(presets),
            Arc::new(CountingSeedSequence::default()),
            telemetry.clone(),
        );
        (service, telemetry)
    }

    #[test]
    fn builds_request_from_preset() {
        let (service, telemetry) = service();
        let result = service
            .create(
                &CreateAuthorizationRequest::new(Profile::Haip, ResponseMode::DirectPostJwt)
                    .with_dcql_preset("pid-haip-baseline")
                    .signed(),
            )
            .unwrap();

        let request = result.request;
        assert_eq!(request.request_id, "req-0001");
        assert_eq!(request.nonce, "nonce-0001");
        assert_eq!(request.state, "state-0001");
        assert_eq!(request.client_id, "x509_san_dns:verifier.example.com");
        assert_eq!(request.presentation_definition, pid_query());
        assert_eq!(
            request.response_uri.unwrap().as_str(),
            "https://verifier.example.com/oid4vp/response/req-0001"
        );
        assert!(request.signed);
        assert!(result.trace.is_none());
        assert_eq!(telemetry.events().len(), 1);
    }

    #[test]
    fn override_wins_and_client_id_is_synthesized() {
        let (service, _) = service();
        let dcql = json!({ "credentials": [{ "id": "mdl", "format": "mso_mdoc" }] });
        let result = service
            .create(
                &CreateAuthorizationRequest::new(Profile::Baseline, ResponseMode::Fragment)
                    .with_dcql_preset("pid-no-metadata")
                    .with_dcql_override(dcql.clone()),
            )
            .unwrap();

        assert_eq!(result.request.presentation_definition, dcql);
        assert_eq!(result.request.client_id, "baseline-simulator");
        assert!(result.request.response_uri.is_none());

        let wire = serde_json::to_value(&result.request).unwrap();
        assert_eq!(wire["responseMode"], "fragment");
    }

    #[test]
    fn signed_request_requires_preset_with_metadata() {
        let (service, telemetry) = service();
        let without_preset = CreateAuthorizationRequest::new(Profile::Haip, ResponseMode::DirectPost)
            .with_dcql_override(pid_query())
            .signed();
        let err = service.create(&without_preset).unwrap_err();
        assert_eq!(err.code(), ProblemCode::InvalidRequest);

        let without_metadata = without_preset.with_dcql_preset("pid-no-metadata");
        assert!(service.create(&without_metadata).is_err());

        let events = telemetry.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.fields["reason"] == json!("invalid_request")));
    }

    #[test]
    fn missing_definition_and_unknown_preset_fail() {
        let (service, _) = service();
        let err = service
            .create(&CreateAuthorizationRequest::new(Profile::Haip, ResponseMode::DirectPost))
            .unwrap_err();
        assert!(err.problem().detail.contains("DCQL"));

        let err = service
            .create(
                &CreateAuthorizationRequest::new(Profile::Haip, ResponseMode::DirectPost)
                    .with_dcql_preset("nope"),
            )
            .unwrap_err();
        assert_eq!(err.problem().detail, "unknown DCQL preset nope");
    }

    #[test]
    fn qr_and_verbose_trace_are_attached_on_demand() {
        let (service, _) = service();
        let result = service
            .create(
                &CreateAuthorizationRequest::new(Profile::Haip, ResponseMode::DirectPostJwt)
                    .with_dcql_preset("pid-haip-baseline")
                    .with_qr()
                    .verbose(),
            )
            .unwrap();

        let qr = result.qr.unwrap();
        assert_eq!(qr.uri.scheme(), "openid4vp");
        let pairs: Vec<(String, String)> = qr.uri.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("response_mode".into(), "direct_post.jwt".into())));
        assert!(pairs.contains(&("nonce".into(), "nonce-0001".into())));
        assert!(!qr.text.is_empty());

        let trace = result.trace.unwrap();
        assert_eq!(trace.operation, "oid4vp.request.create");
        assert_eq!(
            trace.step("response").unwrap().attributes["encryptionRequired"],
            json!(true)
        );
    }
}
