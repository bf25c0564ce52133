//! Secrets Service Tests

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strongbox_secrets::{
    Aes256GcmCipher, Cipher, EncryptionKeySet, ExpiringLock, LockToken, SecretEntry,
    SecretsError, SecretsResult, SecretsService, ServiceMode, API_KEY_CONTAINER_NAME,
};
use tempfile::TempDir;

fn key(byte: u8) -> String {
    BASE64.encode([byte; 32])
}

fn service(dir: &Path, keys: &str) -> SecretsService {
    SecretsService::new(dir, EncryptionKeySet::parse(keys).unwrap())
}

fn container_file(dir: &Path, container: &str) -> PathBuf {
    dir.join(format!("{}.secret", container))
}

#[tokio::test]
async fn test_empty_storage_loads_nothing() {
    let dir = TempDir::new().unwrap();
    let storage = dir.path().join("external-volume").join("secrets");
    let service = service(&storage, &key(1));

    service.load_all_containers().await.unwrap();

    assert!(storage.is_dir());
    assert_eq!(std::fs::read_dir(&storage).unwrap().count(), 0);
    assert_eq!(service.mode(), ServiceMode::Active);
    assert!(service.api_keys_container_is_empty());
    assert!(service.get_all_secrets("default").unwrap().is_empty());
}

#[tokio::test]
async fn test_put_then_get() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), &key(1));
    service.load_all_containers().await.unwrap();

    service.put_secret("default", "userA", "pw1", None).await.unwrap();

    assert_eq!(
        service.get_secret("default", "userA").unwrap(),
        SecretEntry::Plain("pw1".to_string())
    );

    // Persisted encrypted, readable by a fresh instance
    let raw = std::fs::read(container_file(dir.path(), "default")).unwrap();
    assert!(!String::from_utf8_lossy(&raw).contains("pw1"));

    let restarted = self::service(dir.path(), &key(1));
    restarted.load_all_containers().await.unwrap();
    assert_eq!(
        restarted.get_secret_from_default_container("userA").unwrap(),
        SecretEntry::from("pw1")
    );
}

#[tokio::test]
async fn test_put_with_admin_flag_stores_structured_entry() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), &key(1));

    service.put_secret("ops", "root", "s3cret", Some(true)).await.unwrap();
    service.put_secret("ops", "plain", "value", None).await.unwrap();

    let all = service.get_all_secrets("ops").unwrap();
    assert_eq!(
        all.get("root"),
        Some(&SecretEntry::Flagged {
            secret: "s3cret".to_string(),
            is_admin: true
        })
    );
    assert_eq!(all.get("plain"), Some(&SecretEntry::from("value")));
}

#[tokio::test]
async fn test_later_put_overwrites() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), &key(1));

    service.put_secret_in_default_container("userA", "pw1").await.unwrap();
    service.put_secret_in_default_container("userA", "pw2").await.unwrap();

    assert_eq!(
        service.get_secret("default", "userA").unwrap(),
        SecretEntry::from("pw2")
    );
    assert_eq!(service.get_all_secrets("default").unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_missing_secret_is_not_found() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), &key(1));

    let err = service.get_secret("never-loaded", "userA").unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.code(), 404);

    // Reads never touch the disk
    assert!(!container_file(dir.path(), "never-loaded").exists());
}

#[tokio::test]
async fn test_delete_secret() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), &key(1));
    service.put_secret("default", "userA", "pw1", None).await.unwrap();
    service.put_secret("default", "userB", "pw2", None).await.unwrap();

    service.delete_secret("default", "userA").await.unwrap();

    assert!(service.get_secret("default", "userA").unwrap_err().is_not_found());
    let restarted = self::service(dir.path(), &key(1));
    restarted.load_all_containers().await.unwrap();
    let all = restarted.get_all_secrets("default").unwrap();
    assert_eq!(all.len(), 1);
    assert!(all.contains_key("userB"));
}

#[tokio::test]
async fn test_delete_missing_secret_leaves_file_untouched() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), &key(1));
    service.put_secret("default", "userA", "pw1", None).await.unwrap();
    let before = std::fs::read(container_file(dir.path(), "default")).unwrap();

    let err = service.delete_secret("default", "nobody").await.unwrap_err();

    assert!(matches!(err, SecretsError::NotFound { .. }));
    // Every write uses a fresh nonce, so identical bytes mean no write happened
    let after = std::fs::read(container_file(dir.path(), "default")).unwrap();
    assert_eq!(before, after);
    // The lock is released after the failure
    assert!(!dir.path().join("secret.lock").exists());
}

#[tokio::test]
async fn test_put_reloads_changes_from_other_instances() {
    let dir = TempDir::new().unwrap();
    let first = service(dir.path(), &key(1));
    let second = service(dir.path(), &key(1));
    first.load_all_containers().await.unwrap();
    second.load_all_containers().await.unwrap();

    first.put_secret("default", "userA", "pw1", None).await.unwrap();
    // `second` never saw userA in memory, but reloads before mutating
    second.put_secret("default", "userB", "pw2", None).await.unwrap();

    let all = second.get_all_secrets("default").unwrap();
    assert!(all.contains_key("userA"));
    assert!(all.contains_key("userB"));

    // Reads are not reloaded: `first` still serves its own copy
    assert!(first.get_secret("default", "userB").unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_concurrent_puts_are_serialized() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(service(dir.path(), &key(1)));

    let (a, b) = tokio::join!(
        service.put_secret("default", "actorA", "a", None),
        service.put_secret("default", "actorB", "b", None),
    );
    a.unwrap();
    b.unwrap();

    let restarted = self::service(dir.path(), &key(1));
    restarted.load_all_containers().await.unwrap();
    let all = restarted.get_all_secrets("default").unwrap();
    assert_eq!(all.get("actorA"), Some(&SecretEntry::from("a")));
    assert_eq!(all.get("actorB"), Some(&SecretEntry::from("b")));
}

#[tokio::test]
async fn test_concurrent_puts_from_two_instances() {
    let dir = TempDir::new().unwrap();
    let first = service(dir.path(), &key(1));
    let second = service(dir.path(), &key(1));

    let (a, b, c) = tokio::join!(
        first.put_secret("default", "first-a", "x", None),
        second.put_secret("default", "second", "y", None),
        first.put_secret("default", "first-b", "z", None),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let restarted = self::service(dir.path(), &key(1));
    restarted.load_all_containers().await.unwrap();
    let all = restarted.get_all_secrets("default").unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all.get("second"), Some(&SecretEntry::from("y")));
}

#[tokio::test]
async fn test_corrupt_container_switches_to_readonly() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), &key(1));
    service.put_secret("default", "userA", "pw1", None).await.unwrap();
    std::fs::write(container_file(dir.path(), "default"), b"definitely not ciphertext").unwrap();

    let restarted = self::service(dir.path(), &key(1));
    restarted.load_all_containers().await.unwrap();

    assert_eq!(restarted.mode(), ServiceMode::Readonly);
    let err = restarted.get_secret("default", "userA").unwrap_err();
    assert!(matches!(err, SecretsError::Readonly));
    assert_eq!(err.code(), 555);
    assert!(matches!(
        restarted.get_all_secrets("default"),
        Err(SecretsError::Readonly)
    ));
}

#[tokio::test]
async fn test_readonly_blocks_every_mutation() {
    let dir = TempDir::new().unwrap();
    let writer = service(dir.path(), &key(1));
    writer.put_secret("default", "userA", "pw1", None).await.unwrap();
    let before = std::fs::read(container_file(dir.path(), "default")).unwrap();

    let wrong_key = service(dir.path(), &key(2));
    wrong_key.load_all_containers().await.unwrap();
    assert!(wrong_key.is_readonly());

    for result in [
        wrong_key.put_secret("default", "userB", "pw2", None).await,
        wrong_key.put_secret("other", "userB", "pw2", None).await,
        wrong_key.delete_secret("default", "userA").await,
        wrong_key.delete_secret("default", "nobody").await,
        wrong_key.generate_api_key("svc", None).await.map(|_| ()),
    ] {
        assert_eq!(result.unwrap_err().code(), 555);
    }

    let after = std::fs::read(container_file(dir.path(), "default")).unwrap();
    assert_eq!(before, after);
    assert!(!container_file(dir.path(), "other").exists());
}

#[tokio::test]
async fn test_parse_failure_blocks_mutations_without_readonly() {
    let dir = TempDir::new().unwrap();
    let file = container_file(dir.path(), "default");
    // Decrypts fine, but 42 is not a valid entry
    let garbage = Aes256GcmCipher
        .encrypt(br#"{"userA":"pw1","userB":42}"#, &[1u8; 32])
        .unwrap();
    std::fs::write(&file, &garbage).unwrap();

    let service = service(dir.path(), &key(1));
    service.load_all_containers().await.unwrap();

    // Cached empty for reads, the service stays writable
    assert_eq!(service.mode(), ServiceMode::Active);
    assert!(service.get_all_secrets("default").unwrap().is_empty());

    let err = service.put_secret("default", "userC", "pw3", None).await.unwrap_err();
    assert!(matches!(err, SecretsError::ParseFailed(_)));
    assert_eq!(err.code(), 555);
    let err = service.delete_secret("default", "userA").await.unwrap_err();
    assert!(matches!(err, SecretsError::ParseFailed(_)));

    assert_eq!(std::fs::read(&file).unwrap(), garbage);
    assert_eq!(service.mode(), ServiceMode::Active);
    assert!(!dir.path().join("secret.lock").exists());

    // Other containers are unaffected
    service.put_secret("other", "userC", "pw3", None).await.unwrap();
}

#[tokio::test]
async fn test_mutation_propagates_read_errors() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), &key(1));
    // Reading a directory fails with something other than "not found"
    std::fs::create_dir(container_file(dir.path(), "default")).unwrap();

    let err = service.put_secret("default", "userA", "pw1", None).await.unwrap_err();

    assert!(matches!(err, SecretsError::Io(_)));
    assert_eq!(err.code(), 500);
    assert!(container_file(dir.path(), "default").is_dir());
    assert_eq!(service.mode(), ServiceMode::Active);
}

#[tokio::test]
async fn test_unparseable_api_key_container_is_never_overwritten() {
    let dir = TempDir::new().unwrap();
    let file = container_file(dir.path(), API_KEY_CONTAINER_NAME);
    let garbage = Aes256GcmCipher.encrypt(b"[1, 2, 3]", &[1u8; 32]).unwrap();
    std::fs::write(&file, &garbage).unwrap();

    let service = service(dir.path(), &key(1));
    service.load_all_containers().await.unwrap();
    assert!(!service.validate_api_key("unknown").await);
    assert!(service.generate_api_key("svc", None).await.is_err());

    // The sentinel is only kept in memory
    assert!(!service.api_keys_container_is_empty());
    assert_eq!(std::fs::read(&file).unwrap(), garbage);
}

#[tokio::test]
async fn test_delete_missing_api_key_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let writer = service(dir.path(), &key(1));
    writer.generate_api_key("svc", None).await.unwrap();
    let file = container_file(dir.path(), API_KEY_CONTAINER_NAME);
    let before = std::fs::read(&file).unwrap();

    // Same key, configured differently: its sentinel is not in the container yet
    let raw_keys = format!(" {}", key(1));
    let service = service(dir.path(), &raw_keys);

    assert!(service.delete_api_key("nobody").await.unwrap_err().is_not_found());
    assert_eq!(std::fs::read(&file).unwrap(), before);

    // A real deletion persists the new sentinel along with it
    service.delete_api_key("svc").await.unwrap();
    let sentinel = EncryptionKeySet::parse(&raw_keys).unwrap().material_hash();
    let restarted = self::service(dir.path(), &key(1));
    restarted.load_all_containers().await.unwrap();
    let api_keys = restarted.get_all_secrets(API_KEY_CONTAINER_NAME).unwrap();
    assert!(api_keys.contains_key(&sentinel));
    assert!(!api_keys.contains_key("svc"));
}

#[tokio::test]
async fn test_generate_server_secret() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), &key(1));

    let secret = service.generate_server_secret("jwt").await.unwrap();

    assert_eq!(BASE64.decode(&secret).unwrap().len(), 32);
    assert_eq!(
        service.get_secret_from_default_container("jwt").unwrap(),
        SecretEntry::Plain(secret)
    );
}

#[tokio::test]
async fn test_api_key_lifecycle() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), &key(1));
    service.load_all_containers().await.unwrap();

    let api_key = service.generate_api_key("svc", None).await.unwrap();
    assert_eq!(BASE64.decode(&api_key).unwrap().len(), 32);
    assert!(service.validate_api_key(&api_key).await);
    assert!(!service.is_admin_api_key(&api_key));
    assert!(!service.validate_api_key("unknown").await);

    service.delete_api_key("svc").await.unwrap();
    assert!(!service.validate_api_key(&api_key).await);
    assert!(service.delete_api_key("svc").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_flagged_api_keys_do_not_validate() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), &key(1));

    let admin_key = service.generate_api_key("admin", Some(true)).await.unwrap();
    let flagged_key = service.generate_api_key("user", Some(false)).await.unwrap();

    // Membership compares plain values only; flagged entries never match
    assert!(!service.validate_api_key(&admin_key).await);
    assert!(!service.validate_api_key(&flagged_key).await);

    assert!(service.is_admin_api_key(&admin_key));
    assert!(!service.is_admin_api_key(&flagged_key));
}

#[tokio::test]
async fn test_api_key_container_holds_key_material_sentinel() {
    let dir = TempDir::new().unwrap();
    let raw_keys = key(1);
    let service = service(dir.path(), &raw_keys);
    let sentinel = EncryptionKeySet::parse(&raw_keys).unwrap().material_hash();

    assert!(service.api_keys_container_is_empty());
    assert!(service.validate_api_key(&sentinel).await);
    assert!(!service.api_keys_container_is_empty());

    // Persisted once, not duplicated on reload
    let restarted = self::service(dir.path(), &raw_keys);
    restarted.load_all_containers().await.unwrap();
    let api_keys = restarted.get_all_secrets(API_KEY_CONTAINER_NAME).unwrap();
    assert_eq!(api_keys.len(), 1);
    assert_eq!(api_keys.get(&sentinel), Some(&SecretEntry::Plain(sentinel.clone())));
}

/// XOR with the key, tagged with the first key byte so a wrong key is detected
struct XorCipher;

impl Cipher for XorCipher {
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> SecretsResult<Vec<u8>> {
        let mut out = vec![key[0]];
        out.extend(plaintext.iter().zip(key.iter().cycle()).map(|(b, k)| b ^ k));
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> SecretsResult<Vec<u8>> {
        match ciphertext.split_first() {
            Some((tag, body)) if *tag == key[0] => {
                Ok(body.iter().zip(key.iter().cycle()).map(|(b, k)| b ^ k).collect())
            }
            _ => Err(SecretsError::Encryption("wrong key".to_string())),
        }
    }
}

#[derive(Default)]
struct CountingLock {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

#[async_trait]
impl ExpiringLock for CountingLock {
    async fn acquire(&self, path: &Path, _expiry: Duration) -> SecretsResult<LockToken> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(LockToken {
            path: path.to_path_buf(),
            holder: "test".to_string(),
        })
    }

    async fn release(&self, _token: LockToken) -> SecretsResult<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_service_with_fake_collaborators() {
    let dir = TempDir::new().unwrap();
    let lock = Arc::new(CountingLock::default());
    let service = SecretsService::with_collaborators(
        dir.path(),
        EncryptionKeySet::parse(&key(7)).unwrap(),
        Arc::new(XorCipher),
        lock.clone(),
        Duration::from_secs(10),
    );

    service.put_secret("default", "userA", "pw1", None).await.unwrap();
    assert!(service.delete_secret("default", "nobody").await.is_err());

    assert_eq!(lock.acquired.load(Ordering::SeqCst), 2);
    assert_eq!(lock.released.load(Ordering::SeqCst), 2);
    assert_eq!(
        service.get_secret("default", "userA").unwrap(),
        SecretEntry::from("pw1")
    );

    let other_key = SecretsService::with_collaborators(
        dir.path(),
        EncryptionKeySet::parse(&key(8)).unwrap(),
        Arc::new(XorCipher),
        lock,
        Duration::from_secs(10),
    );
    other_key.load_all_containers().await.unwrap();
    assert_eq!(other_key.mode(), ServiceMode::Readonly);
}
