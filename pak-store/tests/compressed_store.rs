//! Compression decorator tests

use blockbuf::compress::CompressionMethod;
use blockbuf::CompressedBuffer;
use cache_record::{CacheKey, CachePolicy, CacheRecordBuilder, RecordPolicy, Value, ValueId};
use pak_store::{
    CacheStore, CompressedStoreWrapper, GetValueRequest, PakFileStore, PakStoreOptions,
    PutRequest, PutStatus, PutValueRequest, RequestOwner, Status,
};
use tempfile::TempDir;

fn wrapped_store(dir: &TempDir, name: &str) -> CompressedStoreWrapper<PakFileStore> {
    let inner =
        PakFileStore::open_write(&dir.path().join(name), PakStoreOptions::default()).unwrap();
    CompressedStoreWrapper::new(inner, CompressionMethod::Zlib, 6)
}

#[test]
fn legacy_payloads_carry_a_size_prefix() {
    let dir = TempDir::new().unwrap();
    let store = wrapped_store(&dir, "compressed.pak");
    let data = b"derived data that compresses".repeat(64);

    assert_eq!(store.put_cached_data("key", &data, false), PutStatus::Cached);
    assert!(store.cached_data_probably_exists("key"));
    assert_eq!(store.get_cached_data("key").unwrap().as_ref(), &data[..]);

    // The stored form is the uncompressed size followed by compressed bytes.
    let stored = store.inner().get_cached_data("key").unwrap();
    let prefix = i32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
    assert_eq!(prefix as usize, data.len());
    assert!(stored.len() < data.len());
}

#[test]
fn legacy_round_trip_survives_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("compressed.pak");
    let data = b"repetitive payload ".repeat(200);
    {
        let inner = PakFileStore::open_write(&path, PakStoreOptions::default()).unwrap();
        let store = CompressedStoreWrapper::new(inner, CompressionMethod::Zlib, 6);
        store.put_cached_data("key", &data, false);
        store.inner().save_cache().unwrap();
    }

    let inner = PakFileStore::open_read(&path, PakStoreOptions::default()).unwrap();
    let store = CompressedStoreWrapper::new(inner, CompressionMethod::Zlib, 6);
    assert_eq!(store.get_cached_data("key").unwrap().as_ref(), &data[..]);
}

#[test]
fn corrupt_prefix_is_a_miss() {
    let dir = TempDir::new().unwrap();
    let store = wrapped_store(&dir, "compressed.pak");
    // Bypass the wrapper to store bytes too short for a prefix.
    store.inner().put_cached_data("short", &[1, 2], false);
    assert!(store.get_cached_data("short").is_none());
}

#[test]
fn put_value_reencodes_to_required_method() {
    let dir = TempDir::new().unwrap();
    let store = wrapped_store(&dir, "compressed.pak");
    let key = CacheKey::from_data("Tex", b"inputs").unwrap();
    let raw = b"uncompressed mip data".repeat(32);
    let value =
        Value::from_buffer(CompressedBuffer::compress(&raw, CompressionMethod::None, 0).unwrap());

    let owner = RequestOwner::new();
    let mut status = Status::Error;
    store.put_value(
        vec![PutValueRequest {
            name: "test".into(),
            key: key.clone(),
            value: value.clone(),
            policy: CachePolicy::DEFAULT,
            user_data: 0,
        }],
        &owner,
        &mut |response| status = response.status,
    );
    assert_eq!(status, Status::Ok);

    let mut loaded = None;
    store.get_value(
        vec![GetValueRequest {
            name: "test".into(),
            key,
            policy: CachePolicy::DEFAULT,
            user_data: 0,
        }],
        &owner,
        &mut |response| loaded = response.value,
    );
    let loaded = loaded.unwrap();
    let data = loaded.data().unwrap();
    // Re-encoded, but the content hash is unchanged.
    assert_eq!(data.method(), CompressionMethod::Zlib);
    assert_eq!(loaded.raw_hash(), value.raw_hash());
    assert_eq!(data.decompress().unwrap().as_ref(), &raw[..]);
}

#[test]
fn put_record_reencodes_values() {
    let dir = TempDir::new().unwrap();
    let store = wrapped_store(&dir, "compressed.pak");
    let key = CacheKey::from_data("Mesh", b"inputs").unwrap();
    let raw = b"vertex buffer".repeat(100);

    let mut builder = CacheRecordBuilder::new(key.clone());
    builder
        .add_value(
            ValueId::from_name("Vertices"),
            Value::from_buffer(CompressedBuffer::compress(&raw, CompressionMethod::Lz4, 0).unwrap()),
        )
        .unwrap();

    let owner = RequestOwner::new();
    let mut status = Status::Error;
    store.put(
        vec![PutRequest {
            name: "test".into(),
            record: builder.build(),
            policy: RecordPolicy::default(),
            user_data: 0,
        }],
        &owner,
        &mut |response| status = response.status,
    );
    assert_eq!(status, Status::Ok);

    let mut record = None;
    store.get(
        vec![pak_store::GetRequest {
            name: "test".into(),
            key,
            policy: RecordPolicy::default(),
            user_data: 0,
        }],
        &owner,
        &mut |response| record = response.record,
    );
    let record = record.unwrap();
    let value = record.value(ValueId::from_name("Vertices")).unwrap();
    let data = value.value().data().unwrap();
    assert_eq!(data.method(), CompressionMethod::Zlib);
    assert_eq!(data.decompress().unwrap().as_ref(), &raw[..]);
}

#[test]
fn satisfying_encoding_is_not_reencoded() {
    let dir = TempDir::new().unwrap();
    let store = wrapped_store(&dir, "compressed.pak");
    let key = CacheKey::from_data("Tex", b"inputs").unwrap();
    let raw = b"already zlib".repeat(50);
    let encoded = CompressedBuffer::compress(&raw, CompressionMethod::Zlib, 9).unwrap();
    let encoded_bytes = encoded.as_bytes().clone();

    let owner = RequestOwner::new();
    store.put_value(
        vec![PutValueRequest {
            name: "test".into(),
            key: key.clone(),
            value: Value::from_buffer(encoded),
            policy: CachePolicy::DEFAULT,
            user_data: 0,
        }],
        &owner,
        &mut |_| {},
    );

    let mut loaded = None;
    store.get_value(
        vec![GetValueRequest {
            name: "test".into(),
            key,
            policy: CachePolicy::DEFAULT,
            user_data: 0,
        }],
        &owner,
        &mut |response| loaded = response.value,
    );
    // Level 9 already satisfies the level-6 target: bytes pass through.
    let loaded = loaded.unwrap();
    assert_eq!(loaded.data().unwrap().as_bytes(), &encoded_bytes);
}
