use request_idempotency::idempotency::{fingerprint, IdempotencyToken};
use std::collections::HashSet;

fn token(value: &str) -> IdempotencyToken {
    IdempotencyToken::resolve(Some(value))
}

#[test]
fn test_fingerprint_stable_across_calls() {
    let a = fingerprint(&token("k-1"), "/orders", "POST", &["tenant-1", "v2"]);
    let b = fingerprint(&token("k-1"), "/orders", "POST", &["tenant-1", "v2"]);
    assert_eq!(a, b);
    assert_eq!(a.as_str().len(), 64);
    assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_fingerprint_sensitive_to_every_input() {
    let variants = vec![
        fingerprint(&token("k-1"), "/orders", "POST", &["t1", "t2"]),
        fingerprint(&token("k-2"), "/orders", "POST", &["t1", "t2"]),
        fingerprint(&token("k-1"), "/orders/", "POST", &["t1", "t2"]),
        fingerprint(&token("k-1"), "/orders", "PUT", &["t1", "t2"]),
        fingerprint(&token("k-1"), "/orders", "POST", &["t1", "t3"]),
        fingerprint(&token("k-1"), "/orders", "POST", &["t2", "t1"]),
        fingerprint(&token("k-1"), "/orders", "POST", &["t1"]),
        fingerprint::<&str>(&token("k-1"), "/orders", "POST", &[]),
    ];

    let unique: HashSet<_> = variants.iter().map(|fp| fp.as_str().to_string()).collect();
    assert_eq!(unique.len(), variants.len());
}

#[test]
fn test_fingerprint_component_boundaries() {
    // Moving characters between adjacent components must not collide.
    let a = fingerprint(&token("ab"), "/c", "POST", &["d"]);
    let b = fingerprint(&token("a"), "b/c", "POST", &["d"]);
    let c = fingerprint(&token("ab"), "/c", "POST", &["", "d"]);
    assert_ne!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_owned_and_borrowed_discriminators_agree() {
    let owned = vec!["tenant-1".to_string(), "eu".to_string()];
    let borrowed = ["tenant-1", "eu"];
    assert_eq!(
        fingerprint(&token("k"), "/x", "POST", &owned),
        fingerprint(&token("k"), "/x", "POST", &borrowed)
    );
}

#[test]
fn test_token_resolution() {
    assert_eq!(IdempotencyToken::resolve(Some("\"quoted\"")).as_str(), "quoted");
    assert_eq!(IdempotencyToken::resolve(Some("plain")).as_str(), "plain");
    assert_eq!(IdempotencyToken::resolve(Some("\"")).as_str(), "\"");

    let generated = IdempotencyToken::resolve(None);
    assert_eq!(generated.as_str().len(), 32);
    assert_ne!(generated, IdempotencyToken::resolve(None));

    let blank = IdempotencyToken::resolve(Some("   "));
    assert_eq!(blank.as_str().len(), 32);
}
