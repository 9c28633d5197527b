use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes128Gcm, Nonce,
};
use base64::prelude::*;
use openid4vp_haip_sim::core::{
    direct_post_jwt::{curve::EcPrivateKey, kdf, JweHeader},
    problem::ProblemCode,
    profile::{Profile, ResponseMode},
};
use p256::{ecdh, EncodedPoint, PublicKey};
use serde_json::{json, Value};


fn encrypt(payload: &Value) -> String {
    let fixture = fixtures::simulator();
    fixture
        .simulator
        .encryption()
        .encrypt(
            "req-0001",
            Profile::Haip,
            ResponseMode::DirectPostJwt,
            None,
            payload.as_object().unwrap(),
        )
        .unwrap()
        .direct_post_jwt
        .unwrap()
}

#[test]
fn response_decrypts_with_plain_ecdh_es() {
    let payload = json!({ "vp_token": "token~", "presentation_submission": { "id": "ps" } });
    let jwe = encrypt(&payload);
    let segments: Vec<&str> = jwe.split('.').collect();
    assert_eq!(segments.len(), 5);
    assert!(segments[1].is_empty());

    let header: JweHeader =
        serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(segments[0]).unwrap()).unwrap();
    assert_eq!(header.alg, "ECDH-ES");
    assert_eq!(header.enc, "A128GCM");
    assert_eq!(header.kid.as_deref(), Some(fixtures::KEY_ID));

    let x = BASE64_URL_SAFE_NO_PAD.decode(header.epk.x.unwrap()).unwrap();
    let y = BASE64_URL_SAFE_NO_PAD.decode(header.epk.y.unwrap()).unwrap();
    assert_eq!((x.len(), y.len()), (32, 32));
    let epk = PublicKey::from_sec1_bytes(
        EncodedPoint::from_affine_coordinates(x.as_slice().into(), y.as_slice().into(), false)
            .as_bytes(),
    )
    .unwrap();

    let secret = p256::SecretKey::from_slice(
        &BASE64_URL_SAFE_NO_PAD
            .decode("VEmDZpDXXK8p8N0Cndsxs924q6nS1RXFASRl6BfUqdw")
            .unwrap(),
    )
    .unwrap();
    let shared = ecdh::diffie_hellman(secret.to_nonzero_scalar(), epk.as_affine());
    let cek = kdf::derive_content_key(shared.raw_secret_bytes().as_slice()).unwrap();

    let iv = BASE64_URL_SAFE_NO_PAD.decode(segments[2]).unwrap();
    let mut ciphertext = BASE64_URL_SAFE_NO_PAD.decode(segments[3]).unwrap();
    ciphertext.extend(BASE64_URL_SAFE_NO_PAD.decode(segments[4]).unwrap());
    let plaintext = Aes128Gcm::new(cek.as_slice().into())
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &ciphertext,
                aad: segments[0].as_bytes(),
            },
        )
        .unwrap();

    assert_eq!(serde_json::from_slice::<Value>(&plaintext).unwrap(), payload);
}

#[test]
fn every_response_uses_a_fresh_ephemeral_key_and_iv() {
    let payload = json!({ "vp_token": "token~" });
    let first: Vec<String> = encrypt(&payload).split('.').map(str::to_owned).collect();
    let second: Vec<String> = encrypt(&payload).split('.').map(str::to_owned).collect();
    assert_ne!(first[0], second[0]);
    assert_ne!(first[2], second[2]);
}

#[test]
fn tampered_segments_fail_closed() {
    let fixture = fixtures::simulator();
    let encryption = fixture.simulator.encryption();
    let jwe = encrypt(&json!({ "vp_token": "token~" }));

    for index in [0, 2, 3, 4] {
        let mut segments: Vec<String> = jwe.split('.').map(str::to_owned).collect();
        let mut bytes = BASE64_URL_SAFE_NO_PAD.decode(&segments[index]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        segments[index] = BASE64_URL_SAFE_NO_PAD.encode(bytes);

        let err = encryption
            .decrypt("req-0001", Profile::Haip, &segments.join("."))
            .unwrap_err();
        assert_eq!(err.code(), ProblemCode::InvalidRequest, "segment {index}");
    }

    let decrypted = encryption.decrypt("req-0001", Profile::Haip, &jwe).unwrap();
    assert_eq!(decrypted.payload["vp_token"], json!("token~"));
}

#[test]
fn ephemeral_keys_derive_valid_public_points() {
    let key = EcPrivateKey::generate();
    let point = key.public_point().unwrap();
    let jwk = point.to_jwk();
    assert_eq!(jwk.crv, "P-256");
    assert!(jwk.d.is_none());
}
