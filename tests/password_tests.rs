use foro_api::password::{BCRYPT_COST, hash_password, hash_password_with_cost, verify_password};

#[test]
fn test_hash_then_verify_round_trip() {
    let digest = hash_password_with_cost("correcta", 4).unwrap();
    assert!(verify_password("correcta", &digest));
}

#[test]
fn test_altered_password_fails_verification() {
    let digest = hash_password_with_cost("correcta", 4).unwrap();
    assert!(!verify_password("Correcta", &digest));
    assert!(!verify_password("correcta ", &digest));
    assert!(!verify_password("", &digest));
}

#[test]
fn test_same_password_hashes_differently_each_time() {
    let first = hash_password_with_cost("repetida", 4).unwrap();
    let second = hash_password_with_cost("repetida", 4).unwrap();

    assert_ne!(first, second, "salts must differ");
    assert!(verify_password("repetida", &first));
    assert!(verify_password("repetida", &second));
}

#[test]
fn test_default_cost_is_encoded_in_digest() {
    let digest = hash_password("costo").unwrap();
    assert!(
        digest.starts_with(&format!("$2b${BCRYPT_COST}$")),
        "unexpected digest prefix: {digest}"
    );
}

#[test]
fn test_corrupt_digest_never_verifies() {
    assert!(!verify_password("cualquiera", "not-a-bcrypt-digest"));
    assert!(!verify_password("cualquiera", ""));
}

#[test]
fn test_invalid_cost_is_an_error() {
    assert!(hash_password_with_cost("x", 2).is_err());
}
