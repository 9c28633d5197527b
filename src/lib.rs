//! This library simulates both ends of an [OID4VP 1.0] exchange under the
//! [HAIP] and a baseline profile.
//!
//! [OID4VP 1.0]: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html>
//! [HAIP]: <https://openid.net/specs/openid4vc-high-assurance-interoperability-profile-1_0.html>
//!
//! # Usage
//!
//! ```ignore
//! use openid4vp_haip_sim::{
//!     core::profile::{Profile, ResponseMode},
//!     memory::MemoryStore,
//!     simulator::Simulator,
//!     verifier::{CreateAuthorizationRequest, ValidateRequest, VpTokenPayload},
//!     wallet::SimulateSdJwtRequest,
//! };
//!
//! let store = Arc::new(MemoryStore::new());
//! // Seed DCQL presets, wallet presets and the verifier's encryption key.
//! let simulator = Simulator::builder().with_memory_store(store).build()?;
//!
//! // Verifier: create an authorization request.
//! let request = simulator.requests().create(
//!     &CreateAuthorizationRequest::new(Profile::Haip, ResponseMode::DirectPostJwt)
//!         .with_dcql_preset("pid-haip-baseline"),
//! )?;
//!
//! // Wallet: answer it from a preset credential.
//! let response = simulator.sd_jwt_wallet().simulate(&SimulateSdJwtRequest::from_preset(
//!     &request.request.request_id,
//!     Profile::Haip,
//!     ResponseMode::DirectPostJwt,
//!     "pid-haip-baseline",
//! ))?;
//!
//! // Wallet: encrypt the response as direct_post.jwt.
//! let encrypted = simulator.encryption().encrypt(
//!     &request.request.request_id,
//!     Profile::Haip,
//!     ResponseMode::DirectPostJwt,
//!     request.request.response_uri.as_ref(),
//!     &response.payload,
//! )?;
//!
//! // Verifier: decrypt and validate it.
//! let validated = simulator.validation().validate(&ValidateRequest::inline(
//!     &request.request.request_id,
//!     Profile::Haip,
//!     inline_presentation(encrypted.direct_post_jwt),
//! ))?;
//! ```
//!
//! Every failure is a [`ValidationError`] carrying an RFC 7807 problem
//! document, and every terminal outcome is reported once through the
//! [`TelemetryPublisher`].
//!
//! [`ValidationError`]: crate::core::problem::ValidationError
//! [`TelemetryPublisher`]: crate::core::telemetry::TelemetryPublisher

pub mod config;
pub mod core;
pub mod memory;
pub mod simulator;
pub mod utils;
pub mod verifier;
pub mod wallet;
