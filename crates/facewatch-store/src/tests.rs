//! Integration tests for `PersonStore` against in-memory and on-disk databases.

use std::path::Path;

use crate::PersonStore;

fn store() -> PersonStore {
    PersonStore::open_in_memory().expect("in-memory store")
}

#[test]
fn add_and_get_person() {
    let s = store();
    let id = s.add_person("Sara", Path::new("data/photos/ab12cd34.jpg")).unwrap();

    let p = s.person(id).unwrap().expect("row exists");
    assert_eq!(p.id, id);
    assert_eq!(p.name, "Sara");
    assert_eq!(p.photo_path, Path::new("data/photos/ab12cd34.jpg"));
}

#[test]
fn get_missing_person_returns_none() {
    let s = store();
    assert!(s.person(42).unwrap().is_none());
}

#[test]
fn ids_are_unique_and_names_are_not() {
    let s = store();
    let a = s.add_person("Omar", Path::new("a.jpg")).unwrap();
    let b = s.add_person("Omar", Path::new("b.jpg")).unwrap();
    assert_ne!(a, b);
    assert_eq!(s.count().unwrap(), 2);
}

#[test]
fn all_people_newest_first() {
    let s = store();
    let first = s.add_person("first", Path::new("1.jpg")).unwrap();
    let second = s.add_person("second", Path::new("2.jpg")).unwrap();
    let third = s.add_person("third", Path::new("3.jpg")).unwrap();

    let ids: Vec<i64> = s.all_people().unwrap().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![third, second, first]);
}

#[test]
fn all_people_orders_by_timestamp_before_id() {
    let s = store();
    let old = s.add_person("old", Path::new("old.jpg")).unwrap();
    let new = s.add_person("new", Path::new("new.jpg")).unwrap();
    s.conn()
        .execute(
            "UPDATE people SET created_at = '2020-01-01 00:00:00' WHERE id = ?1",
            [new],
        )
        .unwrap();

    let ids: Vec<i64> = s.all_people().unwrap().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![old, new]);
}

#[test]
fn delete_removes_row_and_photo() {
    let dir = tempfile::tempdir().unwrap();
    let photo = dir.path().join("ab12cd34.jpg");
    std::fs::write(&photo, b"jpeg bytes").unwrap();

    let s = store();
    let id = s.add_person("Sara", &photo).unwrap();
    assert!(s.delete_person(id).unwrap());

    assert!(s.person(id).unwrap().is_none());
    assert!(!photo.exists());
    assert_eq!(s.count().unwrap(), 0);
}

#[test]
fn delete_with_missing_photo_still_succeeds() {
    let s = store();
    let id = s.add_person("ghost", Path::new("/nonexistent/photo.jpg")).unwrap();
    assert!(s.delete_person(id).unwrap());
    assert!(s.person(id).unwrap().is_none());
}

#[test]
fn delete_missing_row_returns_false() {
    let s = store();
    assert!(!s.delete_person(7).unwrap());
}

#[test]
fn open_creates_parent_dir_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("nested").join("face_recognition.db");

    let id = {
        let s = PersonStore::open(&db).unwrap();
        s.add_person("Lina", Path::new("l.jpg")).unwrap()
    };

    let reopened = PersonStore::open(&db).unwrap();
    let p = reopened.person(id).unwrap().unwrap();
    assert_eq!(p.name, "Lina");
}

#[test]
fn unicode_names_round_trip() {
    let s = store();
    let id = s.add_person("سارة", Path::new("s.jpg")).unwrap();
    assert_eq!(s.person(id).unwrap().unwrap().name, "سارة");
}
