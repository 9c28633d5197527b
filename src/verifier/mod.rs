//! Verifier side: authorization requests and response validation.

pub mod request;
pub mod validation;

pub use request::{
    AuthorizationRequest, AuthorizationRequestResult, AuthorizationRequestService,
    CreateAuthorizationRequest, DcqlPreset, DcqlPresetRepository, RequestQr,
};
pub use validation::{
    InlinePresentation, StoredPresentation, StoredPresentationRepository, ValidateRequest,
    ValidationResult, ValidationService, ValidationTrace, VpTokenPayload,
};
