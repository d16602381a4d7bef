// tests/pgp_tasks.rs

mod common;
use crate::common::Harness;
use crate::common::builders::{ContextBuilder, RuleBuilder, TransferBuilder, spec};

use std::path::PathBuf;

use pgp::composed::{KeyType, SecretKeyParamsBuilder, SubkeyParamsBuilder};
use pgp::crypto::ecc_curve::ECCCurve;
use pgp::types::SecretKeyTrait;
use pgp::ArmorOptions;

use taskgate::engine::ChainError;
use taskgate::model::{CryptoKey, CryptoKeyType, Rule, TaskSpec, TransferContext};
use taskgate::tasks::TaskError;
use taskgate::types::{Chain, Direction};

const PLAIN: &[u8] = b"order 7731;qty=12;sku=AX-4\n";

/// Armored (secret, public) key pair: EdDSA primary, Curve25519 ECDH subkey.
fn key_pair(user: &str) -> (String, String) {
    let mut rng = rand::thread_rng();
    let params = SecretKeyParamsBuilder::default()
        .key_type(KeyType::EdDSALegacy)
        .can_certify(true)
        .can_sign(true)
        .primary_user_id(user.into())
        .passphrase(None)
        .subkey(
            SubkeyParamsBuilder::default()
                .key_type(KeyType::ECDH(ECCCurve::Curve25519))
                .can_encrypt(true)
                .passphrase(None)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let secret = params
        .generate(&mut rng)
        .unwrap()
        .sign(&mut rng, String::new)
        .unwrap();
    let public = secret
        .public_key()
        .sign(&mut rng, &secret, String::new)
        .unwrap();
    (
        secret.to_armored_string(ArmorOptions::default()).unwrap(),
        public.to_armored_string(ArmorOptions::default()).unwrap(),
    )
}

/// Stores `partner-priv`/`partner-pub`, `gateway-priv`/`gateway-pub` and
/// `stranger-priv`/`stranger-pub`.
fn add_keys(h: &Harness) {
    for owner in ["partner", "gateway", "stranger"] {
        let (secret, public) = key_pair(&format!("{owner} <{owner}@example.com>"));
        h.store
            .add_crypto_key(CryptoKey::new(
                format!("{owner}-priv"),
                CryptoKeyType::PgpPrivate,
                secret,
            ))
            .unwrap();
        h.store
            .add_crypto_key(CryptoKey::new(
                format!("{owner}-pub"),
                CryptoKeyType::PgpPublic,
                public,
            ))
            .unwrap();
    }
}

fn context(rule: Rule) -> TransferContext {
    ContextBuilder::new(
        rule,
        TransferBuilder::new(0).local_path("/gw/out/order.txt").filesize(PLAIN.len() as i64).build(),
    )
    .build()
}

fn post(task: TaskSpec) -> Rule {
    RuleBuilder::new("pgp", Direction::Send).post(task).build()
}

fn error(task: TaskSpec) -> Rule {
    RuleBuilder::new("pgp", Direction::Send).error(task).build()
}

fn source_error(err: ChainError) -> TaskError {
    match err {
        ChainError::Task { source, .. } => source,
        other => panic!("expected a task failure, got {other:?}"),
    }
}

#[tokio::test]
async fn encrypt_for_a_public_key_then_decrypt() {
    let (h, fs) = Harness::mock();
    add_keys(&h);
    fs.add_file("/gw/out/order.txt", PLAIN);

    let mut ctx = context(post(spec("ENCRYPT", &[("method", "PGP"), ("keyName", "partner-pub")])));
    h.register(&mut ctx);
    h.run(Chain::Post, &mut ctx).await.unwrap();

    let encrypted = PathBuf::from("/gw/out/order.txt.crypt");
    assert_eq!(ctx.transfer.local_path, encrypted);
    let armored = fs.contents(&encrypted).unwrap();
    assert!(armored.starts_with(b"-----BEGIN PGP MESSAGE-----"));
    assert!(fs.contents("/gw/out/order.txt").is_none());

    ctx.rule = error(spec("DECRYPT", &[("method", "PGP"), ("keyName", "partner-priv")]));
    h.run(Chain::Error, &mut ctx).await.unwrap();

    assert_eq!(ctx.transfer.local_path, PathBuf::from("/gw/out/order.txt"));
    assert_eq!(fs.contents("/gw/out/order.txt").unwrap(), PLAIN);
    assert_eq!(ctx.transfer.filesize, PLAIN.len() as i64);
}

#[tokio::test]
async fn decrypting_with_another_key_fails_and_keeps_the_file() {
    let (h, fs) = Harness::mock();
    add_keys(&h);
    fs.add_file("/gw/out/order.txt", PLAIN);

    let mut ctx = context(post(spec("ENCRYPT", &[("method", "PGP"), ("keyName", "partner-pub")])));
    h.register(&mut ctx);
    h.run(Chain::Post, &mut ctx).await.unwrap();
    let ciphertext = fs.contents("/gw/out/order.txt.crypt").unwrap();

    ctx.rule = error(spec("DECRYPT", &[("method", "PGP"), ("keyName", "stranger-priv")]));
    assert!(h.run(Chain::Error, &mut ctx).await.is_err());

    assert_eq!(fs.contents("/gw/out/order.txt.crypt").unwrap(), ciphertext);
    assert!(fs.contents("/gw/out/order.txt").is_none());
}

#[tokio::test]
async fn detached_signature_verifies_with_the_public_key() {
    let (h, fs) = Harness::mock();
    add_keys(&h);
    fs.add_file("/gw/out/order.txt", PLAIN);

    let rule = RuleBuilder::new("pgp", Direction::Send)
        .pre(spec("SIGN", &[("method", "PGP"), ("keyName", "gateway-priv")]))
        .pre(spec("VERIFY", &[("method", "PGP"), ("keyName", "gateway-pub")]))
        .build();
    let mut ctx = context(rule);
    h.register(&mut ctx);
    h.run(Chain::Pre, &mut ctx).await.unwrap();

    let signature = fs.contents("/gw/out/order.txt.sig").unwrap();
    assert!(signature.starts_with(b"-----BEGIN PGP SIGNATURE-----"));
    assert_eq!(ctx.transfer.local_path, PathBuf::from("/gw/out/order.txt"));
}

#[tokio::test]
async fn tampered_file_or_wrong_signer_fails_verification() {
    let (h, fs) = Harness::mock();
    add_keys(&h);
    fs.add_file("/gw/out/order.txt", PLAIN);

    let mut ctx = context(post(spec("SIGN", &[("method", "PGP"), ("keyName", "gateway-priv")])));
    h.register(&mut ctx);
    h.run(Chain::Post, &mut ctx).await.unwrap();

    ctx.rule = error(spec("VERIFY", &[("method", "PGP"), ("keyName", "stranger-pub")]));
    let err = source_error(h.run(Chain::Error, &mut ctx).await.unwrap_err());
    assert!(matches!(err, TaskError::VerificationFailed(_)), "{err:?}");

    fs.add_file("/gw/out/order.txt", b"order 7731;qty=99;sku=AX-4\n");
    ctx.rule = error(spec("VERIFY", &[("method", "PGP"), ("keyName", "gateway-pub")]));
    let err = source_error(h.run(Chain::Error, &mut ctx).await.unwrap_err());
    assert!(matches!(err, TaskError::VerificationFailed(_)), "{err:?}");
}

#[tokio::test]
async fn encrypt_and_sign_round_trips_through_decrypt_and_verify() {
    let (h, fs) = Harness::mock();
    add_keys(&h);
    fs.add_file("/gw/out/order.txt", PLAIN);

    let mut ctx = context(post(spec(
        "ENCRYPT&SIGN",
        &[
            ("encryptionPGPKeyName", "partner-pub"),
            ("signaturePGPKeyName", "gateway-priv"),
        ],
    )));
    h.register(&mut ctx);
    h.run(Chain::Post, &mut ctx).await.unwrap();
    assert_eq!(ctx.transfer.local_path, PathBuf::from("/gw/out/order.txt.crypt"));

    ctx.rule = error(spec(
        "DECRYPT&VERIFY",
        &[
            ("decryptionPGPKeyName", "partner-priv"),
            ("verificationPGPKeyName", "gateway-pub"),
        ],
    ));
    h.run(Chain::Error, &mut ctx).await.unwrap();

    assert_eq!(ctx.transfer.local_path, PathBuf::from("/gw/out/order.txt"));
    assert_eq!(fs.contents("/gw/out/order.txt").unwrap(), PLAIN);
}

#[tokio::test]
async fn decrypt_and_verify_rejects_an_unexpected_signer() {
    let (h, fs) = Harness::mock();
    add_keys(&h);
    fs.add_file("/gw/out/order.txt", PLAIN);

    let mut ctx = context(post(spec(
        "ENCRYPT&SIGN",
        &[
            ("encryptionPGPKeyName", "partner-pub"),
            ("signaturePGPKeyName", "stranger-priv"),
        ],
    )));
    h.register(&mut ctx);
    h.run(Chain::Post, &mut ctx).await.unwrap();

    ctx.rule = error(spec(
        "DECRYPT&VERIFY",
        &[
            ("decryptionPGPKeyName", "partner-priv"),
            ("verificationPGPKeyName", "gateway-pub"),
        ],
    ));
    let err = source_error(h.run(Chain::Error, &mut ctx).await.unwrap_err());
    assert!(matches!(err, TaskError::VerificationFailed(_)), "{err:?}");
    assert!(fs.contents("/gw/out/order.txt").is_none());
}

#[tokio::test]
async fn public_key_cannot_decrypt_or_sign() {
    let (h, fs) = Harness::mock();
    add_keys(&h);
    fs.add_file("/gw/out/order.txt", PLAIN);

    let cases = [
        spec("DECRYPT", &[("method", "PGP"), ("keyName", "partner-pub")]),
        spec("SIGN", &[("method", "PGP"), ("keyName", "gateway-pub")]),
        spec(
            "ENCRYPT&SIGN",
            &[
                ("encryptionPGPKeyName", "partner-pub"),
                ("signaturePGPKeyName", "gateway-pub"),
            ],
        ),
    ];
    for task in cases {
        let kind = task.kind.clone();
        let mut ctx = context(post(task));
        h.register(&mut ctx);

        let err = source_error(h.run(Chain::Post, &mut ctx).await.unwrap_err());
        assert!(matches!(err, TaskError::WrongKeyType { .. }), "{kind}: {err:?}");
        assert_eq!(fs.files(), vec![PathBuf::from("/gw/out/order.txt")], "{kind}");
    }
}
