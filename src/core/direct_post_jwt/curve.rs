//! P-256 points and scalars as they travel in JWKs.
//!
//! Coordinates are always fixed 32-byte big-endian values. Point decoding
//! checks `y² ≡ x³ + ax + b (mod p)` before anything else touches the point.

use std::fmt;

use anyhow::{bail, Context, Result};
use p256::{
    elliptic_curve::{
        group::Group,
        sec1::{FromEncodedPoint, ToEncodedPoint},
    },
    AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, SecretKey,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::utils::{base64url_decode, base64url_encode};

pub const KTY_EC: &str = "EC";
pub const CRV_P256: &str = "P-256";

const COORDINATE_LEN: usize = 32;

/// An EC JWK restricted to the members this crate reads.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    pub kty: String,
    pub crv: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
}

impl EcJwk {
    /// A private JWK holding only the scalar.
    pub fn private(d: impl Into<String>) -> Self {
        Self {
            kty: KTY_EC.to_owned(),
            crv: CRV_P256.to_owned(),
            x: None,
            y: None,
            d: Some(d.into()),
        }
    }

    fn ensure_p256(&self) -> Result<()> {
        if self.kty != KTY_EC {
            bail!("unsupported kty {}", self.kty)
        }
        if self.crv != CRV_P256 {
            bail!("unsupported crv {}", self.crv)
        }
        Ok(())
    }
}

impl fmt::Debug for EcJwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcJwk")
            .field("kty", &self.kty)
            .field("crv", &self.crv)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("d", &self.d.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn decode_coordinate(name: &str, value: Option<&String>) -> Result<[u8; COORDINATE_LEN]> {
    let value = value.with_context(|| format!("JWK member `{name}` is missing"))?;
    let bytes = base64url_decode(value).with_context(|| format!("JWK member `{name}`"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("JWK member `{name}` has {} bytes, expected 32", b.len()))
}

/// A validated, finite point on P-256.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EcPoint(AffinePoint);

impl EcPoint {
    /// Builds a point from affine coordinates, rejecting anything off the curve.
    pub fn from_coordinates(x: [u8; COORDINATE_LEN], y: [u8; COORDINATE_LEN]) -> Result<Self> {
        let encoded =
            EncodedPoint::from_affine_coordinates(&FieldBytes::from(x), &FieldBytes::from(y), false);
        Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
            .map(Self)
            .context("point is not on the P-256 curve")
    }

    /// Parses a public JWK (`kty=EC`, `crv=P-256`).
    pub fn from_jwk(jwk: &EcJwk) -> Result<Self> {
        jwk.ensure_p256()?;
        let x = decode_coordinate("x", jwk.x.as_ref())?;
        let y = decode_coordinate("y", jwk.y.as_ref())?;
        Self::from_coordinates(x, y)
    }

    fn from_projective(point: ProjectivePoint) -> Result<Self> {
        if bool::from(point.is_identity()) {
            bail!("point at infinity")
        }
        let (x, y) = Self(AffinePoint::from(point)).coordinates();
        // Re-validate the encoded result rather than trusting the arithmetic.
        Self::from_coordinates(x, y)
    }

    /// Fixed-width big-endian `(x, y)`.
    pub fn coordinates(&self) -> ([u8; COORDINATE_LEN], [u8; COORDINATE_LEN]) {
        let encoded = self.0.to_encoded_point(false);
        let mut x = [0u8; COORDINATE_LEN];
        let mut y = [0u8; COORDINATE_LEN];
        if let (Some(ex), Some(ey)) = (encoded.x(), encoded.y()) {
            x.copy_from_slice(ex);
            y.copy_from_slice(ey);
        }
        (x, y)
    }

    pub fn to_jwk(&self) -> EcJwk {
        let (x, y) = self.coordinates();
        EcJwk {
            kty: KTY_EC.to_owned(),
            crv: CRV_P256.to_owned(),
            x: Some(base64url_encode(x)),
            y: Some(base64url_encode(y)),
            d: None,
        }
    }

    pub(crate) fn as_affine(&self) -> &AffinePoint {
        &self.0
    }
}

impl fmt::Debug for EcPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, y) = self.coordinates();
        f.debug_struct("EcPoint")
            .field("x", &hex::encode(x))
            .field("y", &hex::encode(y))
            .finish()
    }
}

/// A P-256 private scalar.
#[derive(Clone)]
pub struct EcPrivateKey(SecretKey);

impl EcPrivateKey {
    /// Fresh key pair from the process CSPRNG.
    pub fn generate() -> Self {
        Self(SecretKey::random(&mut OsRng))
    }

    pub fn from_jwk(jwk: &EcJwk) -> Result<Self> {
        jwk.ensure_p256()?;
        let d = decode_coordinate("d", jwk.d.as_ref())?;
        SecretKey::from_bytes(&FieldBytes::from(d))
            .map(Self)
            .map_err(|_| anyhow::anyhow!("JWK member `d` is not a valid P-256 scalar"))
    }

    /// `d · G`, checked to be finite and on the curve.
    pub fn public_point(&self) -> Result<EcPoint> {
        EcPoint::from_projective(ProjectivePoint::GENERATOR * *self.0.to_nonzero_scalar())
    }

    /// Raw ECDH shared secret: the x coordinate of `d · Q`.
    pub fn diffie_hellman(&self, peer: &EcPoint) -> Result<[u8; COORDINATE_LEN]> {
        let shared = ProjectivePoint::from(*peer.as_affine()) * *self.0.to_nonzero_scalar();
        let (x, _) = EcPoint::from_projective(shared)
            .context("key agreement produced an invalid point")?
            .coordinates();
        Ok(x)
    }
}

impl fmt::Debug for EcPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EcPrivateKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7518 Appendix C.
    const BOB_X: &str = "weNJy2HscCSM6AEDTDg04biOvhFhyyWvOHQfeF_PxMQ";
    const BOB_Y: &str = "e8lnCO-AlStT-NJVX-crhB7QRYhiix03illJOVAOyck";
    const BOB_D: &str = "VEmDZpDXXK8p8N0Cndsxs924q6nS1RXFASRl6BfUqdw";
    const ALICE_X: &str = "gI0GAILBdu7T53akrFmMyGcsF3n5dO7MmwNBHKW5SV0";
    const ALICE_Y: &str = "SLW_xSffzlPWrHEVI30DHM_4egVwt3NQqeUD7nMFpps";
    const ALICE_D: &str = "0_NxaRPUMQoAJt50Gz8YiTr8gRTwyEaCumd-MToTmIo";

    fn public(x: &str, y: &str) -> EcJwk {
        EcJwk {
            kty: KTY_EC.into(),
            crv: CRV_P256.into(),
            x: Some(x.into()),
            y: Some(y.into()),
            d: None,
        }
    }

    #[test]
    fn derives_public_key_from_scalar() {
        let bob = EcPrivateKey::from_jwk(&EcJwk::private(BOB_D)).unwrap();
        let jwk = bob.public_point().unwrap().to_jwk();
        assert_eq!(jwk.x.as_deref(), Some(BOB_X));
        assert_eq!(jwk.y.as_deref(), Some(BOB_Y));
    }

    #[test]
    fn shared_secret_matches_rfc_7518_vector() {
        let alice = EcPrivateKey::from_jwk(&EcJwk::private(ALICE_D)).unwrap();
        let bob = EcPoint::from_jwk(&public(BOB_X, BOB_Y)).unwrap();

        assert_eq!(
            hex::encode(alice.diffie_hellman(&bob).unwrap()),
            "9e56d91d817135d372834283bf84269cfb316ea3da806a48f6daa7798cfe90c4"
        );
    }

    #[test]
    fn shared_secret_is_symmetric_and_agrees_with_p256_ecdh() {
        let alice = EcPrivateKey::from_jwk(&EcJwk::private(ALICE_D)).unwrap();
        let bob = EcPrivateKey::from_jwk(&EcJwk::private(BOB_D)).unwrap();
        let alice_pub = EcPoint::from_jwk(&public(ALICE_X, ALICE_Y)).unwrap();
        let bob_pub = bob.public_point().unwrap();

        let z = alice.diffie_hellman(&bob_pub).unwrap();
        assert_eq!(z, bob.diffie_hellman(&alice_pub).unwrap());

        let reference =
            p256::ecdh::diffie_hellman(alice.0.to_nonzero_scalar(), bob_pub.as_affine());
        assert_eq!(z.as_slice(), reference.raw_secret_bytes().as_slice());
    }

    #[test]
    fn rejects_point_off_the_curve() {
        // Bob's y with its lowest bit flipped.
        let tampered = public(BOB_X, "e8lnCO-AlStT-NJVX-crhB7QRYhiix03illJOVAOycg");
        let err = EcPoint::from_jwk(&tampered).unwrap_err();
        assert!(err.to_string().contains("not on the P-256 curve"));
    }

    #[test]
    fn rejects_wrong_curve_and_short_coordinates() {
        let mut other_curve = public(BOB_X, BOB_Y);
        other_curve.crv = "P-384".into();
        assert!(EcPoint::from_jwk(&other_curve).is_err());

        let short = public("AQID", BOB_Y);
        assert!(EcPoint::from_jwk(&short).is_err());

        let missing_y = EcJwk {
            y: None,
            ..public(BOB_X, BOB_Y)
        };
        assert!(EcPoint::from_jwk(&missing_y)
            .unwrap_err()
            .to_string()
            .contains("`y` is missing"));
    }

    #[test]
    fn generated_keys_round_trip_through_jwk() {
        let key = EcPrivateKey::generate();
        let point = key.public_point().unwrap();
        assert_eq!(EcPoint::from_jwk(&point.to_jwk()).unwrap(), point);
    }

    #[test]
    fn debug_output_redacts_scalar() {
        let jwk = EcJwk::private(BOB_D);
        assert!(!format!("{jwk:?}").contains(BOB_D));
        let key = EcPrivateKey::from_jwk(&jwk).unwrap();
        assert_eq!(format!("{key:?}"), "EcPrivateKey(<redacted>)");
    }
}
