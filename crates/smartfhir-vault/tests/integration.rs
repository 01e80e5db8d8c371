//! Integration tests for the smartfhir-vault crate.
//!
//! Exercises the record lifecycle and the on-disk keychain + database pair.

use smartfhir_vault::crypto;
use smartfhir_vault::{FileKeychain, KeychainProvider, Vault, VaultError};

fn test_vault() -> Vault {
    let key = crypto::generate_master_key().unwrap();
    Vault::open_in_memory(&key).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
//  Record lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn record_put_get_delete() {
    let vault = test_vault();
    let data = serde_json::json!({
        "urls": { "service": "https://fhir.example.org" },
        "auth": { "access_token": "abc" }
    });

    vault.put("smartfhir:session:app@https://fhir.example.org", &data).unwrap();

    let loaded = vault
        .get("smartfhir:session:app@https://fhir.example.org")
        .unwrap()
        .unwrap();
    assert_eq!(loaded, data);

    assert!(vault.delete("smartfhir:session:app@https://fhir.example.org").unwrap());
    assert!(vault.get("smartfhir:session:app@https://fhir.example.org").unwrap().is_none());
    assert!(!vault.delete("smartfhir:session:app@https://fhir.example.org").unwrap());
}

#[test]
fn keys_do_not_collide() {
    let vault = test_vault();
    vault.put("a@one", &serde_json::json!({"n": 1})).unwrap();
    vault.put("a@two", &serde_json::json!({"n": 2})).unwrap();

    assert_eq!(vault.get("a@one").unwrap().unwrap()["n"], 1);
    assert_eq!(vault.get("a@two").unwrap().unwrap()["n"], 2);

    let keys: Vec<String> = vault.list().unwrap().into_iter().map(|r| r.key).collect();
    assert_eq!(keys, vec!["a@one".to_string(), "a@two".to_string()]);
}

// ═══════════════════════════════════════════════════════════════════════
//  On-disk persistence
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn records_survive_reopen_with_keychain_key() {
    let dir = tempfile::tempdir().unwrap();
    let keychain = FileKeychain::new(FileKeychain::default_path(dir.path()));
    let db_path = dir.path().join("sessions.db");

    {
        let key = keychain.load_or_create_master_key().unwrap();
        let vault = Vault::open(&db_path, &key).unwrap();
        vault.put("k", &serde_json::json!({"state": "xyz"})).unwrap();
    }

    let key = keychain.get_master_key().unwrap();
    let vault = Vault::open(&db_path, &key).unwrap();
    assert_eq!(vault.get("k").unwrap().unwrap()["state"], "xyz");
}

#[test]
fn reopen_with_other_key_cannot_read() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sessions.db");

    {
        let vault = Vault::open(&db_path, &crypto::generate_master_key().unwrap()).unwrap();
        vault.put("k", &serde_json::json!({"state": "xyz"})).unwrap();
    }

    let vault = Vault::open(&db_path, &crypto::generate_master_key().unwrap()).unwrap();
    assert!(matches!(
        vault.get("k"),
        Err(VaultError::DecryptionFailed { .. })
    ));
}
