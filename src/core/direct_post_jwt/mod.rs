//! `direct_post.jwt` response encryption.
//!
//! Responses are encrypted to the verifier's static P-256 key using ECDH-ES
//! direct key agreement and A128GCM, and carried in JWE compact serialization:
//!
//! ```text
//! BASE64URL(header) . "" . BASE64URL(iv) . BASE64URL(ciphertext) . BASE64URL(tag)
//! ```
//!
//! The encrypted-key segment is always empty since direct agreement wraps no
//! key. The additional authenticated data is the header segment exactly as
//! transmitted.
//!
//! See: [RFC 7516](https://www.rfc-editor.org/rfc/rfc7516),
//! [RFC 7518 §4.6](https://www.rfc-editor.org/rfc/rfc7518#section-4.6)

use std::{fmt, sync::Arc, time::Duration};

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes128Gcm, Key, Nonce, Tag,
};
use anyhow::anyhow;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};
use url::Url;

use self::curve::{EcJwk, EcPoint, EcPrivateKey};
use super::{
    problem::{ProblemCode, ProblemContext, ValidationError},
    profile::{Profile, ResponseMode},
    telemetry::{Clock, TelemetryEvent, TelemetryPublisher, RESPONSE_ENCRYPTED},
    trace::{ToVerboseTrace, TraceStep, VerboseTrace},
};
use crate::utils::{base64url_decode, base64url_encode};

pub mod curve;
pub mod kdf;

pub const ALG_ECDH_ES: &str = "ECDH-ES";
pub const ENC_A128GCM: &str = "A128GCM";

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const SEGMENTS: usize = 5;

/// The verifier's static encryption key pair for one profile.
///
/// When `public_jwk` is absent it is re-derived from the private scalar.
#[derive(Clone, Serialize, Deserialize)]
pub struct EncryptionKeyMaterial {
    pub key_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_jwk: Option<EcJwk>,
    pub private_jwk: EcJwk,
}

impl EncryptionKeyMaterial {
    fn private_key(&self) -> anyhow::Result<EcPrivateKey> {
        EcPrivateKey::from_jwk(&self.private_jwk)
    }

    fn public_point(&self) -> anyhow::Result<EcPoint> {
        match &self.public_jwk {
            Some(jwk) => EcPoint::from_jwk(jwk),
            None => self.private_key()?.public_point(),
        }
    }
}

impl fmt::Debug for EncryptionKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKeyMaterial")
            .field("key_id", &self.key_id)
            .field("public_jwk", &self.public_jwk)
            .finish_non_exhaustive()
    }
}

/// Looks up the verifier's encryption key material.
pub trait EncryptionKeyRepository: fmt::Debug {
    fn load(&self, profile: Profile) -> anyhow::Result<EncryptionKeyMaterial>;
}

/// The narrow capability wallets use to fail fast when an encrypted
/// response cannot be produced.
pub trait EncryptionEnforcement: fmt::Debug {
    fn ensure_encryption(
        &self,
        request_id: &str,
        profile: Profile,
        response_mode: ResponseMode,
    ) -> Result<(), ValidationError>;
}

/// JOSE protected header of a `direct_post.jwt` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweHeader {
    pub alg: String,
    pub enc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    pub epk: EcJwk,
}

/// Result of [DirectPostJwtEncryptionService::encrypt].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionResult {
    pub request_id: String,
    pub profile: Profile,
    pub response_mode: ResponseMode,
    pub encryption_required: bool,
    pub response_uri: Option<Url>,
    pub key_id: Option<String>,
    /// The compact JWE; `None` when no encryption was required.
    pub direct_post_jwt: Option<String>,
    pub latency: Duration,
}

/// Result of [DirectPostJwtEncryptionService::decrypt].
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptionResult {
    pub request_id: String,
    pub profile: Profile,
    pub key_id: Option<String>,
    pub payload: Map<String, Json>,
}

#[derive(Debug, Clone)]
pub struct DirectPostJwtEncryptionService {
    keys: Arc<dyn EncryptionKeyRepository + Send + Sync>,
    clock: Arc<dyn Clock + Send + Sync>,
    telemetry: Arc<dyn TelemetryPublisher + Send + Sync>,
}

impl DirectPostJwtEncryptionService {
    pub fn new(
        keys: Arc<dyn EncryptionKeyRepository + Send + Sync>,
        clock: Arc<dyn Clock + Send + Sync>,
        telemetry: Arc<dyn TelemetryPublisher + Send + Sync>,
    ) -> Self {
        Self {
            keys,
            clock,
            telemetry,
        }
    }

    /// Encrypts `payload` when `profile` and `response_mode` demand it.
    ///
    /// Outside of HAIP + `direct_post.jwt` no cryptography runs and the
    /// result reports `encryption_required = false`. [Self::decrypt] returns
    /// the same object.
    pub fn encrypt(
        &self,
        request_id: &str,
        profile: Profile,
        response_mode: ResponseMode,
        response_uri: Option<&Url>,
        payload: &Map<String, Json>,
    ) -> Result<EncryptionResult, ValidationError> {
        let started = self.clock.now();

        if !profile.requires_encryption(response_mode) {
            self.telemetry.publish(
                TelemetryEvent::success(RESPONSE_ENCRYPTED)
                    .field("requestId", request_id)
                    .field("profile", profile.as_str())
                    .field("responseMode", response_mode.as_str())
                    .field("encryptionRequired", false)
                    .field("latencyMs", 0),
            );
            return Ok(EncryptionResult {
                request_id: request_id.to_owned(),
                profile,
                response_mode,
                encryption_required: false,
                response_uri: response_uri.cloned(),
                key_id: None,
                direct_post_jwt: None,
                latency: Duration::ZERO,
            });
        }

        let sealed = serde_json::to_vec(payload)
            .or_problem(ProblemCode::InvalidRequest, "unable to serialize response payload")
            .and_then(|plaintext| self.seal(profile, plaintext));
        match sealed {
            Ok((direct_post_jwt, key_id)) => {
                let latency = self.clock.elapsed_since(started);
                debug!(request_id, %key_id, "encrypted direct_post.jwt response");
                self.telemetry.publish(
                    TelemetryEvent::success(RESPONSE_ENCRYPTED)
                        .field("requestId", request_id)
                        .field("profile", profile.as_str())
                        .field("responseMode", response_mode.as_str())
                        .field("encryptionRequired", true)
                        .field("keyId", key_id.as_str())
                        .field("latencyMs", latency.as_millis() as u64),
                );
                Ok(EncryptionResult {
                    request_id: request_id.to_owned(),
                    profile,
                    response_mode,
                    encryption_required: true,
                    response_uri: response_uri.cloned(),
                    key_id: Some(key_id),
                    direct_post_jwt: Some(direct_post_jwt),
                    latency,
                })
            }
            Err(e) => {
                self.telemetry.publish(
                    TelemetryEvent::failure(RESPONSE_ENCRYPTED, &e, profile, Some(response_mode))
                        .field("requestId", request_id)
                        .field("encryptionRequired", true),
                );
                Err(e)
            }
        }
    }

    /// Decrypts a `direct_post.jwt` compact JWE back into its payload object.
    pub fn decrypt(
        &self,
        request_id: &str,
        profile: Profile,
        direct_post_jwt: &str,
    ) -> Result<DecryptionResult, ValidationError> {
        let segments: Vec<&str> = direct_post_jwt.trim().split('.').collect();
        if segments.len() != SEGMENTS {
            return Err(ValidationError::invalid_request(format!(
                "direct_post.jwt response must have {SEGMENTS} segments, found {}",
                segments.len()
            )));
        }
        let [header_segment, encrypted_key, iv, ciphertext, tag] = [
            segments[0],
            segments[1],
            segments[2],
            segments[3],
            segments[4],
        ];
        if !encrypted_key.is_empty() {
            return Err(ValidationError::invalid_request(
                "direct_post.jwt must use direct key agreement (empty encrypted key)",
            ));
        }

        let header: JweHeader = base64url_decode(header_segment)
            .and_then(|bytes| serde_json::from_slice::<JweHeader>(&bytes).map_err(Into::into))
            .or_problem(ProblemCode::InvalidRequest, "direct_post.jwt header is malformed")?;
        if header.alg != ALG_ECDH_ES || header.enc != ENC_A128GCM {
            return Err(ValidationError::invalid_request(format!(
                "unsupported direct_post.jwt algorithms alg={} enc={}",
                header.alg, header.enc
            ))
            .with_violation("alg", ALG_ECDH_ES)
            .with_violation("enc", ENC_A128GCM));
        }

        // Curve membership is checked before any key is loaded or any AEAD runs.
        let ephemeral = EcPoint::from_jwk(&header.epk).or_problem(
            ProblemCode::InvalidRequest,
            "direct_post.jwt ephemeral key is not a valid P-256 point",
        )?;

        let iv = decode_exact::<IV_LEN>(iv, "iv")?;
        let tag = decode_exact::<TAG_LEN>(tag, "tag")?;
        let mut buffer = base64url_decode(ciphertext).or_problem(
            ProblemCode::InvalidRequest,
            "direct_post.jwt ciphertext is malformed",
        )?;

        let material = self.load_key_material(profile)?;
        if let Some(kid) = header.kid.as_deref() {
            if kid != material.key_id {
                warn!(request_id, kid, "direct_post.jwt addressed to unknown key");
                return Err(ValidationError::invalid_request(format!(
                    "direct_post.jwt was encrypted to unknown key {kid}"
                )));
            }
        }
        let private_key = material
            .private_key()
            .or_problem(ProblemCode::InvalidRequest, "verifier encryption key is unusable")?;
        let shared_secret = private_key
            .diffie_hellman(&ephemeral)
            .or_problem(ProblemCode::InvalidRequest, "key agreement failed")?;
        let cek = kdf::derive_content_key(&shared_secret)
            .or_problem(ProblemCode::InvalidRequest, "key derivation failed")?;

        Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&cek))
            .decrypt_in_place_detached(
                Nonce::from_slice(&iv),
                header_segment.as_bytes(),
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| anyhow!("AES-GCM authentication failed"))
            .or_problem(
                ProblemCode::InvalidRequest,
                "direct_post.jwt could not be decrypted",
            )?;

        let payload = match serde_json::from_slice(&buffer) {
            Ok(Json::Object(map)) => map,
            Ok(_) => {
                return Err(ValidationError::invalid_request(
                    "direct_post.jwt payload must be a JSON object",
                ))
            }
            Err(e) => {
                return Err(ValidationError::invalid_request(
                    "direct_post.jwt payload is not valid JSON",
                )
                .with_cause(e))
            }
        };

        debug!(request_id, kid = ?header.kid, "decrypted direct_post.jwt response");
        Ok(DecryptionResult {
            request_id: request_id.to_owned(),
            profile,
            key_id: header.kid,
            payload,
        })
    }

    fn load_key_material(&self, profile: Profile) -> Result<EncryptionKeyMaterial, ValidationError> {
        self.keys.load(profile).or_problem(
            ProblemCode::InvalidRequest,
            "verifier encryption key is unavailable",
        )
    }

    /// Seals serialized plaintext, returning the compact JWE and the key id.
    fn seal(
        &self,
        profile: Profile,
        mut buffer: Vec<u8>,
    ) -> Result<(String, String), ValidationError> {
        let material = self.load_key_material(profile)?;
        let recipient = material
            .public_point()
            .or_problem(ProblemCode::InvalidRequest, "verifier encryption key is unusable")?;

        let ephemeral = EcPrivateKey::generate();
        let epk = ephemeral
            .public_point()
            .or_problem(ProblemCode::InvalidRequest, "ephemeral key generation failed")?;
        let shared_secret = ephemeral
            .diffie_hellman(&recipient)
            .or_problem(ProblemCode::InvalidRequest, "key agreement failed")?;
        let cek = kdf::derive_content_key(&shared_secret)
            .or_problem(ProblemCode::InvalidRequest, "key derivation failed")?;

        let header = JweHeader {
            alg: ALG_ECDH_ES.to_owned(),
            enc: ENC_A128GCM.to_owned(),
            kid: Some(material.key_id.clone()),
            epk: epk.to_jwk(),
        };
        let header_segment = serde_json::to_vec(&header)
            .map(base64url_encode)
            .or_problem(ProblemCode::InvalidRequest, "unable to encode JWE header")?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let tag = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&cek))
            .encrypt_in_place_detached(Nonce::from_slice(&iv), header_segment.as_bytes(), &mut buffer)
            .map_err(|_| anyhow!("AES-GCM encryption failed"))
            .or_problem(ProblemCode::InvalidRequest, "unable to encrypt response payload")?;

        let compact = format!(
            "{header_segment}..{}.{}.{}",
            base64url_encode(iv),
            base64url_encode(&buffer),
            base64url_encode(tag)
        );
        Ok((compact, material.key_id))
    }
}

impl EncryptionEnforcement for DirectPostJwtEncryptionService {
    /// Checks that an encrypted response could be produced, without encrypting anything.
    fn ensure_encryption(
        &self,
        request_id: &str,
        profile: Profile,
        response_mode: ResponseMode,
    ) -> Result<(), ValidationError> {
        if !profile.requires_encryption(response_mode) {
            return Ok(());
        }
        let material = self.load_key_material(profile)?;
        material
            .public_point()
            .or_problem(ProblemCode::InvalidRequest, "verifier encryption key is unusable")?;
        debug!(request_id, key_id = %material.key_id, "encryption enforced for response");
        Ok(())
    }
}

impl ToVerboseTrace for EncryptionResult {
    fn verbose_trace(&self) -> VerboseTrace {
        let jwe = match self.direct_post_jwt {
            Some(_) => TraceStep::new("jwe", "response sealed")
                .attribute("alg", ALG_ECDH_ES)
                .attribute("enc", ENC_A128GCM)
                .attribute_opt("keyId", self.key_id.clone()),
            None => TraceStep::new("jwe", "skipped, response travels unencrypted"),
        };
        VerboseTrace::builder("oid4vp.response.encrypt")
            .metadata("requestId", self.request_id.as_str())
            .metadata("profile", self.profile.as_str())
            .metadata("responseMode", self.response_mode.as_str())
            .step(
                TraceStep::new("enforcement", "encryption requirement evaluated")
                    .attribute("encryptionRequired", self.encryption_required),
            )
            .step(
                jwe.attribute_opt(
                    "responseUri",
                    self.response_uri.as_ref().map(Url::to_string),
                )
                .attribute("latencyMs", self.latency.as_millis() as u64),
            )
            .build()
    }
}

impl ToVerboseTrace for DecryptionResult {
    fn verbose_trace(&self) -> VerboseTrace {
        VerboseTrace::builder("oid4vp.response.decrypt")
            .metadata("requestId", self.request_id.as_str())
            .metadata("profile", self.profile.as_str())
            .step(
                TraceStep::new("jwe", "response opened")
                    .attribute_opt("keyId", self.key_id.clone())
                    .attribute(
                        "payloadMembers",
                        self.payload.keys().cloned().collect::<Vec<_>>(),
                    ),
            )
            .build()
    }
}

fn decode_exact<const N: usize>(segment: &str, name: &str) -> Result<[u8; N], ValidationError> {
    let bytes = base64url_decode(segment).or_problem(
        ProblemCode::InvalidRequest,
        &format!("direct_post.jwt {name} is malformed"),
    )?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        ValidationError::invalid_request(format!(
            "direct_post.jwt {name} must be {N} bytes, found {len}"
        ))
    })
}
