//! Local store persistence tests

use std::sync::Arc;

use chrono::Utc;

use talkback::session::{Conversation, Role, Turn};
use talkback::store::{KeyValueStore, SqliteStore, VoicePreferences, keys};
use talkback::{LocalStorage, db};

fn open(path: &std::path::Path) -> LocalStorage {
    let pool = db::init(path).expect("failed to open test db");
    LocalStorage::new(Arc::new(SqliteStore::new(pool)))
}

#[test]
fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("talkback.db");
    let now = Utc::now();

    {
        let storage = open(&path);
        let conversation = Conversation::snapshot(
            "c1",
            &[
                Turn::new("s", Role::System, "Recognition denied\nAudio denied"),
                Turn::new("u", Role::User, "hello"),
                Turn::new("a", Role::Assistant, "hi there"),
            ],
            now,
            now,
        );
        assert!(storage.conversations().save(conversation));
        storage.usage().add(52).unwrap();
        VoicePreferences::default()
            .with_pitch(1.25)
            .save(&storage)
            .unwrap();
        storage.credentials().set_api_key("sk-saved").unwrap();
    }

    let storage = open(&path);
    let stored = storage.conversations().find("c1").unwrap();
    assert_eq!(stored.turns.len(), 2);
    assert_eq!(stored.title(), Some("hello"));
    assert_eq!(stored.started_at, now);
    assert_eq!(storage.usage().total(), 52);
    assert!((VoicePreferences::load(&storage).pitch - 1.25).abs() < f64::EPSILON);
    assert_eq!(storage.credentials().api_key().as_deref(), Some("sk-saved"));
}

#[test]
fn test_corrupt_history_reads_as_empty_and_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("talkback.db");
    let pool = db::init(&path).unwrap();
    let kv = SqliteStore::new(pool);
    kv.set(keys::LOCAL_MESSAGES, "[{\"truncated\":").unwrap();

    let storage = LocalStorage::new(Arc::new(kv));
    assert!(storage.conversations().list().is_empty());

    let now = Utc::now();
    let conversation =
        Conversation::snapshot("c2", &[Turn::new("u", Role::User, "again")], now, now);
    assert!(storage.conversations().save(conversation));
    assert_eq!(storage.conversations().list().len(), 1);
}
