//! Policy-driven record, value, and chunk operation tests

use blockbuf::compress::CompressionMethod;
use blockbuf::CompressedBuffer;
use cache_record::{
    CacheKey, CachePolicy, CacheRecord, CacheRecordBuilder, RecordPolicy, RecordPolicyBuilder,
    Value, ValueId,
};
use pak_store::{
    CacheStore, GetChunkRequest, GetRequest, GetValueRequest, PakFileStore, PakStoreOptions,
    PutRequest, PutValueRequest, RequestOwner, Status,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn buffer(data: &[u8]) -> CompressedBuffer {
    CompressedBuffer::compress(data, CompressionMethod::Zlib, 6).unwrap()
}

fn open_write(dir: &TempDir, name: &str) -> PakFileStore {
    PakFileStore::open_write(&dir.path().join(name), PakStoreOptions::default()).unwrap()
}

fn shader_record(key: &CacheKey) -> CacheRecord {
    let mut builder = CacheRecordBuilder::new(key.clone());
    builder.set_meta(json!({"profile": "sm6"}));
    builder
        .add_value(ValueId::from_name("Bytecode"), Value::from_buffer(buffer(b"shader bytecode")))
        .unwrap();
    builder
        .add_value(ValueId::from_name("Reflection"), Value::from_buffer(buffer(b"reflection data")))
        .unwrap();
    builder.build()
}

fn put_record(store: &PakFileStore, record: CacheRecord, policy: RecordPolicy) -> Status {
    let owner = RequestOwner::new();
    let mut status = Status::Error;
    store.put(
        vec![PutRequest {
            name: "test".into(),
            record,
            policy,
            user_data: 0,
        }],
        &owner,
        &mut |response| status = response.status,
    );
    status
}

fn get_record(
    store: &PakFileStore,
    key: &CacheKey,
    policy: RecordPolicy,
) -> (Option<CacheRecord>, Status) {
    let owner = RequestOwner::new();
    let mut result = (None, Status::Error);
    store.get(
        vec![GetRequest {
            name: "test".into(),
            key: key.clone(),
            policy,
            user_data: 0,
        }],
        &owner,
        &mut |response| result = (response.record, response.status),
    );
    result
}

#[test]
fn record_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = open_write(&dir, "records.pak");
    let key = CacheKey::from_data("Shader", b"inputs").unwrap();

    assert_eq!(put_record(&store, shader_record(&key), RecordPolicy::default()), Status::Ok);

    let (record, status) = get_record(&store, &key, RecordPolicy::default());
    assert_eq!(status, Status::Ok);
    let record = record.unwrap();
    assert_eq!(record.key(), &key);
    assert_eq!(record.meta()["profile"], "sm6");
    assert_eq!(record.values().len(), 2);

    let bytecode = record.value(ValueId::from_name("Bytecode")).unwrap();
    assert!(bytecode.value().has_data());
    assert_eq!(
        bytecode.value().data().unwrap().decompress().unwrap().as_ref(),
        b"shader bytecode"
    );
}

#[test]
fn get_miss_for_absent_key() {
    let dir = TempDir::new().unwrap();
    let store = open_write(&dir, "records.pak");
    let key = CacheKey::from_data("Shader", b"never stored").unwrap();
    let (record, status) = get_record(&store, &key, RecordPolicy::default());
    assert_eq!(status, Status::Error);
    assert!(record.is_none());
}

#[test]
fn put_without_store_bit_is_a_silent_skip() {
    let dir = TempDir::new().unwrap();
    let store = open_write(&dir, "records.pak");
    let key = CacheKey::from_data("Shader", b"inputs").unwrap();

    let status = put_record(
        &store,
        shader_record(&key),
        RecordPolicy::new(CachePolicy::QUERY_LOCAL),
    );
    // Skipped by policy: completes Ok without storing anything.
    assert_eq!(status, Status::Ok);
    assert_eq!(store.len(), 0);
}

#[test]
fn get_with_skip_data_returns_references() {
    let dir = TempDir::new().unwrap();
    let store = open_write(&dir, "records.pak");
    let key = CacheKey::from_data("Shader", b"inputs").unwrap();
    put_record(&store, shader_record(&key), RecordPolicy::default());

    let policy = RecordPolicy::new(CachePolicy::QUERY_LOCAL | CachePolicy::SKIP_DATA);
    let (record, status) = get_record(&store, &key, policy);
    assert_eq!(status, Status::Ok);
    let record = record.unwrap();
    for value in record.values() {
        assert!(!value.value().has_data());
        assert!(value.value().raw_size() > 0);
    }
}

#[test]
fn shared_content_is_stored_once() {
    let dir = TempDir::new().unwrap();
    // Force all attachments external so sharing is visible in the index.
    let options = PakStoreOptions {
        max_record_size_kb: 0,
        max_value_size_kb: 0,
        ..PakStoreOptions::default()
    };
    let store = PakFileStore::open_write(&dir.path().join("dedup.pak"), options).unwrap();

    let shared = buffer(b"payload shared across records");
    for seed in [b"first".as_slice(), b"second"] {
        let key = CacheKey::from_data("Mesh", seed).unwrap();
        let mut builder = CacheRecordBuilder::new(key);
        builder
            .add_value(ValueId::from_name("Data"), Value::from_buffer(shared.clone()))
            .unwrap();
        assert_eq!(put_record(&store, builder.build(), RecordPolicy::default()), Status::Ok);
    }

    let content_entries: Vec<String> = store
        .keys()
        .into_iter()
        .filter(|key| key.starts_with("Content/"))
        .collect();
    assert_eq!(content_entries.len(), 1);
    assert!(content_entries[0].ends_with(&shared.raw_hash().to_string()));
}

#[test]
fn partial_record_policy_on_missing_content() {
    let dir = TempDir::new().unwrap();
    let options = PakStoreOptions {
        max_record_size_kb: 0,
        max_value_size_kb: 0,
        ..PakStoreOptions::default()
    };
    let store = PakFileStore::open_write(&dir.path().join("partial.pak"), options).unwrap();
    let key = CacheKey::from_data("Shader", b"inputs").unwrap();
    let record = shader_record(&key);
    let bytecode_hash = record
        .value(ValueId::from_name("Bytecode"))
        .unwrap()
        .value()
        .raw_hash();
    put_record(&store, record, RecordPolicy::default());

    // Drop the externalized bytecode content out from under the record.
    store.remove_cached_data(&format!("Content/{bytecode_hash}"), false);

    // Without PartialRecord the whole get fails.
    let (record, status) = get_record(&store, &key, RecordPolicy::default());
    assert_eq!(status, Status::Error);
    assert!(record.is_none());

    // With PartialRecord the record loads, flagged as an error, with the
    // missing value as a hash-and-size reference.
    let policy = RecordPolicy::new(CachePolicy::DEFAULT | CachePolicy::PARTIAL_RECORD);
    let (record, status) = get_record(&store, &key, policy);
    assert_eq!(status, Status::Error);
    let record = record.unwrap();
    let bytecode = record.value(ValueId::from_name("Bytecode")).unwrap();
    assert!(!bytecode.value().has_data());
    assert_eq!(bytecode.value().raw_hash(), bytecode_hash);
    let reflection = record.value(ValueId::from_name("Reflection")).unwrap();
    assert!(reflection.value().has_data());
}

#[test]
fn per_value_policy_overrides() {
    let dir = TempDir::new().unwrap();
    let store = open_write(&dir, "records.pak");
    let key = CacheKey::from_data("Shader", b"inputs").unwrap();
    put_record(&store, shader_record(&key), RecordPolicy::default());

    let skip_id = ValueId::from_name("Reflection");
    let policy = RecordPolicyBuilder::new(CachePolicy::DEFAULT)
        .with_value_policy(skip_id, CachePolicy::QUERY_LOCAL | CachePolicy::SKIP_DATA)
        .build();
    let (record, status) = get_record(&store, &key, policy);
    assert_eq!(status, Status::Ok);
    let record = record.unwrap();
    assert!(record.value(ValueId::from_name("Bytecode")).unwrap().value().has_data());
    assert!(!record.value(skip_id).unwrap().value().has_data());
}

#[test]
fn non_deterministic_put_keeps_existing_record() {
    let dir = TempDir::new().unwrap();
    let store = open_write(&dir, "records.pak");
    let key = CacheKey::from_data("Shader", b"inputs").unwrap();

    let mut builder = CacheRecordBuilder::new(key.clone());
    builder
        .add_value(ValueId::from_name("Bytecode"), Value::from_buffer(buffer(b"first build")))
        .unwrap();
    put_record(&store, builder.build(), RecordPolicy::default());

    // A second build produced different bytes for the same key. With the
    // default query-and-store policy the existing record wins.
    let mut builder = CacheRecordBuilder::new(key.clone());
    builder
        .add_value(ValueId::from_name("Bytecode"), Value::from_buffer(buffer(b"second build")))
        .unwrap();
    assert_eq!(put_record(&store, builder.build(), RecordPolicy::default()), Status::Ok);

    let (record, _) = get_record(&store, &key, RecordPolicy::default());
    let value = record.unwrap();
    let data = value
        .value(ValueId::from_name("Bytecode"))
        .unwrap()
        .value()
        .data()
        .unwrap()
        .decompress()
        .unwrap();
    assert_eq!(data.as_ref(), b"first build");
}

fn put_value(store: &PakFileStore, key: &CacheKey, value: Value, policy: CachePolicy) -> Status {
    let owner = RequestOwner::new();
    let mut status = Status::Error;
    store.put_value(
        vec![PutValueRequest {
            name: "test".into(),
            key: key.clone(),
            value,
            policy,
            user_data: 0,
        }],
        &owner,
        &mut |response| status = response.status,
    );
    status
}

fn get_value(store: &PakFileStore, key: &CacheKey, policy: CachePolicy) -> (Option<Value>, Status) {
    let owner = RequestOwner::new();
    let mut result = (None, Status::Error);
    store.get_value(
        vec![GetValueRequest {
            name: "test".into(),
            key: key.clone(),
            policy,
            user_data: 0,
        }],
        &owner,
        &mut |response| result = (response.value, response.status),
    );
    result
}

#[test]
fn value_round_trip_inline() {
    let dir = TempDir::new().unwrap();
    let store = open_write(&dir, "values.pak");
    let key = CacheKey::from_data("Audio", b"wav inputs").unwrap();
    let value = Value::from_buffer(buffer(b"pcm samples"));

    assert_eq!(put_value(&store, &key, value.clone(), CachePolicy::DEFAULT), Status::Ok);
    // Small content stays inline: no separate Content entry.
    assert!(store.keys().iter().all(|entry| !entry.starts_with("Content/")));

    let (loaded, status) = get_value(&store, &key, CachePolicy::DEFAULT);
    assert_eq!(status, Status::Ok);
    let loaded = loaded.unwrap();
    assert_eq!(loaded.raw_hash(), value.raw_hash());
    assert_eq!(loaded.data().unwrap().decompress().unwrap().as_ref(), b"pcm samples");
}

#[test]
fn large_value_externalizes_content() {
    let dir = TempDir::new().unwrap();
    let options = PakStoreOptions {
        max_value_size_kb: 0,
        ..PakStoreOptions::default()
    };
    let store = PakFileStore::open_write(&dir.path().join("values.pak"), options).unwrap();
    let key = CacheKey::from_data("Audio", b"wav inputs").unwrap();
    let value = Value::from_buffer(buffer(b"pcm samples"));

    assert_eq!(put_value(&store, &key, value.clone(), CachePolicy::DEFAULT), Status::Ok);
    assert!(store.keys().iter().any(|entry| entry.starts_with("Content/")));

    let (loaded, status) = get_value(&store, &key, CachePolicy::DEFAULT);
    assert_eq!(status, Status::Ok);
    assert_eq!(
        loaded.unwrap().data().unwrap().decompress().unwrap().as_ref(),
        b"pcm samples"
    );

    // Existence-only query confirms presence without fetching content.
    let (loaded, status) = get_value(&store, &key, CachePolicy::QUERY_LOCAL | CachePolicy::SKIP_DATA);
    assert_eq!(status, Status::Ok);
    assert!(!loaded.unwrap().has_data());
}

#[test]
fn dataless_put_requires_existing_content() {
    let dir = TempDir::new().unwrap();
    let options = PakStoreOptions {
        max_value_size_kb: 0,
        ..PakStoreOptions::default()
    };
    let store = PakFileStore::open_write(&dir.path().join("values.pak"), options).unwrap();
    let content = buffer(b"shared blob");
    let reference = Value::reference(content.raw_hash(), content.raw_size());

    // The content is not stored yet, so the claim fails.
    let key_a = CacheKey::from_data("Geo", b"a").unwrap();
    assert_eq!(put_value(&store, &key_a, reference.clone(), CachePolicy::DEFAULT), Status::Error);

    // A put with data stores the content; the data-less claim now succeeds.
    let key_b = CacheKey::from_data("Geo", b"b").unwrap();
    put_value(&store, &key_b, Value::from_buffer(content), CachePolicy::DEFAULT);
    assert_eq!(put_value(&store, &key_a, reference, CachePolicy::DEFAULT), Status::Ok);

    let (loaded, status) = get_value(&store, &key_a, CachePolicy::DEFAULT);
    assert_eq!(status, Status::Ok);
    assert_eq!(
        loaded.unwrap().data().unwrap().decompress().unwrap().as_ref(),
        b"shared blob"
    );
}

#[test]
fn chunk_windows_and_batching() {
    let dir = TempDir::new().unwrap();
    let store = open_write(&dir, "chunks.pak");
    let key = CacheKey::from_data("Anim", b"clip inputs").unwrap();
    let raw: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let id = ValueId::from_name("Samples");

    let mut builder = CacheRecordBuilder::new(key.clone());
    builder
        .add_value(
            id,
            Value::from_buffer(
                CompressedBuffer::compress_with_block_size(&raw, CompressionMethod::Lz4, 0, 4096)
                    .unwrap(),
            ),
        )
        .unwrap();
    put_record(&store, builder.build(), RecordPolicy::default());

    let request = |offset: u64, size: u64, policy: CachePolicy, user_data: u64| GetChunkRequest {
        name: "test".into(),
        key: key.clone(),
        id,
        raw_offset: offset,
        raw_size: size,
        policy,
        user_data,
    };

    let owner = RequestOwner::new();
    let mut responses = Vec::new();
    store.get_chunks(
        vec![
            // Out of submission order on purpose; responses arrive sorted.
            request(12_000, 1000, CachePolicy::QUERY_LOCAL, 2),
            request(0, 100, CachePolicy::QUERY_LOCAL, 0),
            request(5_000, 2_500, CachePolicy::QUERY_LOCAL, 1),
            request(19_990, 1000, CachePolicy::QUERY_LOCAL, 3),
            request(0, 64, CachePolicy::QUERY_LOCAL | CachePolicy::SKIP_DATA, 4),
        ],
        &owner,
        &mut |response| responses.push(response),
    );

    assert_eq!(responses.len(), 5);
    for response in &responses {
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.raw_hash, blockbuf::RawHash::from_data(&raw));
    }

    for response in &responses {
        match response.user_data {
            0 => assert_eq!(response.data.as_ref().unwrap().as_ref(), &raw[0..100]),
            1 => assert_eq!(response.data.as_ref().unwrap().as_ref(), &raw[5_000..7_500]),
            2 => assert_eq!(response.data.as_ref().unwrap().as_ref(), &raw[12_000..13_000]),
            3 => {
                // Clamped to the value's raw size.
                assert_eq!(response.raw_size, 10);
                assert_eq!(response.data.as_ref().unwrap().as_ref(), &raw[19_990..]);
            }
            4 => {
                // Existence-only: no payload transfer.
                assert!(response.data.is_none());
                assert_eq!(response.raw_size, 64);
            }
            _ => panic!("unexpected response"),
        }
    }
}

#[test]
fn chunk_of_anonymous_value() {
    let dir = TempDir::new().unwrap();
    let store = open_write(&dir, "chunks.pak");
    let key = CacheKey::from_data("Tex", b"mips").unwrap();
    let raw = b"0123456789abcdef".repeat(16);
    put_value(
        &store,
        &key,
        Value::from_buffer(buffer(&raw)),
        CachePolicy::DEFAULT,
    );

    let owner = RequestOwner::new();
    let mut responses = Vec::new();
    store.get_chunks(
        vec![GetChunkRequest {
            name: "test".into(),
            key: key.clone(),
            id: ValueId::null(),
            raw_offset: 16,
            raw_size: 32,
            policy: CachePolicy::QUERY_LOCAL,
            user_data: 0,
        }],
        &owner,
        &mut |response| responses.push(response),
    );

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, Status::Ok);
    assert_eq!(responses[0].data.as_ref().unwrap().as_ref(), &raw[16..48]);
}
