//! Key container and public key token tests against known fixtures.

use std::path::Path;

use strongnamer::{metadata::identity::PublicKeyToken, prelude::*};

#[test]
fn ecma_standard_key_token() {
    let ecma = [0u8, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];
    assert_eq!(
        PublicKeyToken::from_public_key(&ecma).to_string(),
        "b77a5c561934e089"
    );
}

#[test]
fn key_pair_fixture() -> Result<()> {
    let key = KeyMaterial::from_file(Path::new("tests/fixtures/test.snk"))?;

    assert!(key.can_sign());
    assert_eq!(key.bit_length(), 1024);
    assert_eq!(key.signature_size(), 128);
    assert_eq!(key.token().to_string(), "882265d1390953fd");
    assert_eq!(
        PublicKeyToken::from_public_key(key.public_key()),
        key.token()
    );
    Ok(())
}

#[test]
fn public_key_fixture_matches_the_key_pair() -> Result<()> {
    let pair = KeyMaterial::from_file(Path::new("tests/fixtures/test.snk"))?;
    let public = KeyMaterial::from_file(Path::new("tests/fixtures/test_public.snk"))?;

    assert!(!public.can_sign());
    assert_eq!(public.public_key(), pair.public_key());
    assert_eq!(public.token(), pair.token());
    assert_eq!(
        std::fs::read("tests/fixtures/test_public.snk")?,
        pair.public_key()
    );
    Ok(())
}

#[test]
fn unrecognized_containers_are_rejected() {
    for bytes in [Vec::new(), vec![0x07, 0x02, 0x00, 0x00], vec![0xAB; 600]] {
        let error = KeyMaterial::from_bytes(bytes).unwrap_err();
        assert!(error.is_fatal(), "{error}");
    }
}
