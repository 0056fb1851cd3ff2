//! Policy-driven record, value, and chunk operations for the pak store
//!
//! Records and values are stored as binary packages under `Buckets/<key>`,
//! with compressed content externalized to `Content/<hash>` entries so that
//! identical payloads shared across records are stored once. Both paths are
//! ordinary pak entries; the package layer reuses the raw save/load/exists
//! primitives.

use crate::store::pak_store::PakFileStore;
use crate::store::requests::{
    GetChunkRequest, GetChunkResponse, GetRequest, GetResponse, GetValueRequest, GetValueResponse,
    PutRequest, PutResponse, PutValueRequest, PutValueResponse, RequestOwner,
};
use crate::store::traits::CacheStore;
use crate::store::{content_path, package_path};
use crate::types::{PutStatus, Status};
use blockbuf::{BlockReader, CompressedBuffer, RawHash};
use bytes::Bytes;
use cache_record::{
    CacheKey, CachePolicy, CacheRecord, CacheRecordBuilder, RecordPackage, RecordPolicy, Value,
    ValueId, ValuePackage,
};
use tracing::{debug, info, trace, warn};

/// Outcome of one structured put
enum PutOutcome {
    /// Stored, with the number of bytes written
    Stored(u64),
    /// The policy did not permit storing here; not an error
    Skipped,
    Failed,
}

impl PutOutcome {
    fn status(&self) -> Status {
        match self {
            Self::Stored(_) | Self::Skipped => Status::Ok,
            Self::Failed => Status::Error,
        }
    }
}

impl PakFileStore {
    fn put_cache_record(
        &self,
        name: &str,
        record: &CacheRecord,
        policy: &RecordPolicy,
    ) -> PutOutcome {
        let key = record.key();
        if !self.is_writable() || self.is_closed() {
            trace!("{name}: skipped put of {key} because the store is not writable");
            return PutOutcome::Failed;
        }
        let record_policy = policy.record_policy();
        if !record_policy.contains(CachePolicy::STORE_LOCAL) {
            trace!("{name}: skipped put of {key} due to cache policy");
            return PutOutcome::Skipped;
        }

        let path = package_path(key);

        // Decide whether an existing package survives. Without the query
        // bit the caller forces a replace; otherwise a valid existing
        // record with matching value hashes is kept as long as none of its
        // content has gone missing.
        let mut replace_existing = !record_policy.contains(CachePolicy::QUERY_LOCAL);
        let mut save_package = replace_existing;
        let mut existing: Option<RecordPackage> = None;
        let load_existing =
            !replace_existing || !record.values().iter().all(|value| value.value().has_data());
        if load_existing {
            existing = self.load_file(&path).and_then(|bytes| {
                match RecordPackage::deserialize(&bytes) {
                    Ok(package) => Some(package),
                    Err(err) => {
                        debug!("{name}: existing package for {key} is invalid: {err}");
                        None
                    }
                }
            });
            match &existing {
                None => save_package = true,
                Some(package) => {
                    let same_shape = package.values().len() == record.values().len()
                        && package
                            .values()
                            .iter()
                            .zip(record.values())
                            .all(|(existing_value, value)| {
                                existing_value.id == value.id()
                                    && existing_value.raw_hash == value.value().raw_hash()
                            });
                    if !same_shape {
                        info!("{name}: cache put found non-deterministic record for {key}");
                        let missing_content = package.values().iter().any(|value| {
                            package.find_attachment(value.raw_hash).is_none()
                                && !self.file_exists(&content_path(value.raw_hash))
                        });
                        if missing_content {
                            debug!(
                                "{name}: overwriting non-deterministic record for {key} due to missing content"
                            );
                            save_package = true;
                        }
                    }
                }
            }
            replace_existing |= save_package;
        }

        // Split attachments into inline and external content.
        let mut package = RecordPackage::from_record(record);
        let mut external: Vec<CompressedBuffer> = Vec::new();
        if let (Some(existing_package), false) = (existing.as_ref(), save_package) {
            // The existing package stays; mirror its inline/external split
            // so content it references externally still gets written.
            for content in package.attachments().to_vec() {
                if existing_package.find_attachment(content.raw_hash()).is_none() {
                    package.remove_attachment(content.raw_hash());
                    external.push(content);
                }
            }
        } else {
            if let Some(existing_package) = existing.as_ref() {
                // Carry over attachments for values this put has no data for.
                for value in record.values() {
                    if !value.value().has_data() {
                        if let Some(attachment) =
                            existing_package.find_attachment(value.value().raw_hash())
                        {
                            package.add_attachment(attachment.clone());
                        }
                    }
                }
            }

            // Externalize the largest attachments until the package fits.
            let limit_kb = if record.values().len() == 1 {
                self.options().max_value_size_kb
            } else {
                self.options().max_record_size_kb
            };
            let limit = limit_kb * 1024;
            let mut total: u64 = package
                .attachments()
                .iter()
                .map(CompressedBuffer::compressed_size)
                .sum();
            if total > limit {
                let mut by_size = package.attachments().to_vec();
                by_size.sort_by_key(|content| std::cmp::Reverse(content.compressed_size()));
                for content in by_size {
                    let size = content.compressed_size();
                    package.remove_attachment(content.raw_hash());
                    external.push(content);
                    total -= size;
                    if total <= limit {
                        break;
                    }
                }
            }
        }

        let mut write_size = 0u64;
        for content in &external {
            if !self.put_cache_content(name, content, &mut write_size) {
                return PutOutcome::Failed;
            }
        }

        if save_package {
            let bytes = match package.serialize() {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!("{name}: failed to serialize record package for {key}: {err}");
                    return PutOutcome::Failed;
                }
            };
            if !self.save_file(&path, &bytes, replace_existing) {
                warn!("{name}: failed to store record package for {key}");
                return PutOutcome::Failed;
            }
            write_size += bytes.len() as u64;
        }

        self.log_access(&path);
        debug!("{name}: cache put complete for {key} ({write_size} bytes written)");
        PutOutcome::Stored(write_size)
    }

    /// Write one content blob unless an entry with its hash already exists
    fn put_cache_content(
        &self,
        name: &str,
        content: &CompressedBuffer,
        write_size: &mut u64,
    ) -> bool {
        let path = content_path(content.raw_hash());
        if !self.file_exists(&path) {
            let encoded = content.as_bytes();
            if !self.save_file(&path, encoded, false) {
                warn!("{name}: failed to store content {}", content.raw_hash());
                return false;
            }
            *write_size += encoded.len() as u64;
        }
        self.log_access(&path);
        true
    }

    fn get_cache_record_only(
        &self,
        name: &str,
        key: &CacheKey,
        policy: &RecordPolicy,
    ) -> Option<RecordPackage> {
        if self.is_closed() {
            trace!("{name}: skipped get of {key} because the store is closed");
            return None;
        }
        if !policy.record_policy().contains(CachePolicy::QUERY_LOCAL) {
            trace!("{name}: skipped get of {key} due to cache policy");
            return None;
        }

        let path = package_path(key);
        let Some(bytes) = self.load_file(&path) else {
            debug!("{name}: cache miss with missing package for {key}");
            return None;
        };
        let package = match RecordPackage::deserialize(&bytes) {
            Ok(package) => package,
            Err(err) => {
                warn!("{name}: cache miss with invalid package for {key}: {err}");
                self.drop_corrupt_entry(&path);
                return None;
            }
        };
        if package.key() != key {
            warn!(
                "{name}: cache miss with mismatched package key {} for {key}",
                package.key()
            );
            self.drop_corrupt_entry(&path);
            return None;
        }

        self.log_access(&path);
        Some(package)
    }

    fn get_cache_record(
        &self,
        name: &str,
        key: &CacheKey,
        policy: &RecordPolicy,
    ) -> (Option<CacheRecord>, Status) {
        let Some(package) = self.get_cache_record_only(name, key, policy) else {
            return (None, Status::Error);
        };

        let mut status = Status::Ok;
        let mut builder = CacheRecordBuilder::new(key.clone());
        if !policy.record_policy().contains(CachePolicy::SKIP_META) {
            builder.set_meta(package.meta().clone());
        }

        for package_value in package.values() {
            let value_policy = policy.value_policy(package_value.id);
            let base = match package.find_attachment(package_value.raw_hash) {
                Some(attachment) => Value::from_buffer(attachment.clone()),
                None => package_value.as_value(),
            };
            match self.get_content(name, key, Some(package_value.id), &base, value_policy) {
                Some(value) => {
                    // Ids are unique; the package validator enforced it.
                    let _ = builder.add_value(package_value.id, value);
                }
                None if policy.record_policy().contains(CachePolicy::PARTIAL_RECORD) => {
                    status = Status::Error;
                    let _ = builder.add_value(package_value.id, package_value.as_value());
                }
                None => return (None, Status::Error),
            }
        }

        (Some(builder.build()), status)
    }

    fn put_cache_value(
        &self,
        name: &str,
        key: &CacheKey,
        value: &Value,
        policy: CachePolicy,
    ) -> PutOutcome {
        if !self.is_writable() || self.is_closed() {
            trace!("{name}: skipped put of {key} because the store is not writable");
            return PutOutcome::Failed;
        }
        if !policy.contains(CachePolicy::STORE_LOCAL) {
            trace!("{name}: skipped put of {key} due to cache policy");
            return PutOutcome::Skipped;
        }

        let path = package_path(key);
        let mut replace_existing = !policy.contains(CachePolicy::QUERY_LOCAL);
        let mut save_package = replace_existing;
        let mut existing: Option<ValuePackage> = None;
        if !replace_existing || !value.has_data() {
            existing = self.load_file(&path).and_then(|bytes| {
                match ValuePackage::deserialize(&bytes) {
                    Ok(package) => Some(package),
                    Err(err) => {
                        debug!("{name}: existing value package for {key} is invalid: {err}");
                        None
                    }
                }
            });
            match &existing {
                None => save_package = true,
                Some(package) => {
                    if package.raw_hash().is_zero() {
                        info!("{name}: cache put found invalid existing value for {key}");
                        save_package = true;
                    } else if package.raw_hash() != value.raw_hash()
                        || package.raw_size() != value.raw_size()
                    {
                        info!(
                            "{name}: cache put found non-deterministic value for {key} with new hash {} and existing hash {}",
                            value.raw_hash(),
                            package.raw_hash()
                        );
                        let has_content = package.attachment().is_some()
                            || self.file_exists(&content_path(package.raw_hash()));
                        if !has_content {
                            debug!(
                                "{name}: overwriting non-deterministic value for {key} due to missing content"
                            );
                            save_package = true;
                        }
                    }
                }
            }
            replace_existing |= save_package;
        }

        let mut external: Option<CompressedBuffer> = None;
        let mut package: Option<ValuePackage> = None;
        if let (Some(existing_package), false) = (existing.as_ref(), save_package) {
            // The existing package stays; still write our content if the
            // existing package does not inline it.
            if let Some(data) = value.data() {
                let inlined = existing_package
                    .attachment()
                    .is_some_and(|attachment| attachment.raw_hash() == value.raw_hash());
                if !inlined {
                    external = Some(data.clone());
                }
            }
        } else if let Some(data) = value.data() {
            if data.compressed_size() <= self.options().max_value_size_kb * 1024 {
                package = Some(ValuePackage::from_value(key.clone(), value));
            } else {
                package = Some(ValuePackage::from_reference(
                    key.clone(),
                    value.raw_hash(),
                    value.raw_size(),
                ));
                external = Some(data.clone());
            }
        } else {
            // A data-less put claims the content already exists; trust the
            // claim only as far as an existence probe.
            if !self.file_exists(&content_path(value.raw_hash())) {
                debug!(
                    "{name}: failed put of {key} due to missing content {}",
                    value.raw_hash()
                );
                return PutOutcome::Failed;
            }
            package = Some(ValuePackage::from_reference(
                key.clone(),
                value.raw_hash(),
                value.raw_size(),
            ));
        }

        let mut write_size = 0u64;
        if let Some(content) = &external {
            if !self.put_cache_content(name, content, &mut write_size) {
                return PutOutcome::Failed;
            }
        }
        if save_package {
            if let Some(package) = &package {
                let bytes = match package.serialize() {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!("{name}: failed to serialize value package for {key}: {err}");
                        return PutOutcome::Failed;
                    }
                };
                if !self.save_file(&path, &bytes, replace_existing) {
                    warn!("{name}: failed to store value package for {key}");
                    return PutOutcome::Failed;
                }
                write_size += bytes.len() as u64;
            }
        }

        self.log_access(&path);
        debug!("{name}: cache put complete for {key} ({write_size} bytes written)");
        PutOutcome::Stored(write_size)
    }

    fn get_cache_value_only(
        &self,
        name: &str,
        key: &CacheKey,
        policy: CachePolicy,
    ) -> Option<Value> {
        if self.is_closed() {
            trace!("{name}: skipped get of {key} because the store is closed");
            return None;
        }
        if !policy.contains(CachePolicy::QUERY_LOCAL) {
            trace!("{name}: skipped get of {key} due to cache policy");
            return None;
        }

        let path = package_path(key);
        let Some(bytes) = self.load_file(&path) else {
            debug!("{name}: cache miss with missing package for {key}");
            return None;
        };
        let package = match ValuePackage::deserialize(&bytes) {
            Ok(package) => package,
            Err(err) => {
                warn!("{name}: cache miss with invalid package for {key}: {err}");
                self.drop_corrupt_entry(&path);
                return None;
            }
        };
        if package.key() != key || package.raw_hash().is_zero() {
            warn!("{name}: cache miss with invalid value for {key}");
            self.drop_corrupt_entry(&path);
            return None;
        }

        let value = if let Some(attachment) = package.attachment() {
            if attachment.raw_hash() != package.raw_hash()
                || attachment.raw_size() != package.raw_size()
            {
                warn!("{name}: cache miss with invalid value attachment for {key}");
                return None;
            }
            Value::from_buffer(attachment.clone())
        } else {
            Value::reference(package.raw_hash(), package.raw_size())
        };

        self.log_access(&path);
        Some(value)
    }

    /// Resolve a value's content according to its policy
    ///
    /// `value` carries inline data when the package had it. Content that
    /// must be fetched comes from `Content/<hash>` and is rejected when its
    /// hash does not match the reference.
    fn get_content(
        &self,
        name: &str,
        key: &CacheKey,
        id: Option<ValueId>,
        value: &Value,
        policy: CachePolicy,
    ) -> Option<Value> {
        if !policy.contains(CachePolicy::QUERY_LOCAL) {
            return Some(value.remove_data());
        }

        if value.has_data() {
            return Some(if policy.contains(CachePolicy::SKIP_DATA) {
                value.remove_data()
            } else {
                value.clone()
            });
        }

        let raw_hash = value.raw_hash();
        let path = content_path(raw_hash);
        if policy.contains(CachePolicy::SKIP_DATA) {
            if self.file_exists(&path) {
                self.log_access(&path);
                return Some(value.remove_data());
            }
        } else if let Some(bytes) = self.load_file(&path) {
            match CompressedBuffer::from_encoded(bytes) {
                Ok(buffer) if buffer.raw_hash() == raw_hash => {
                    self.log_access(&path);
                    return Some(Value::from_buffer(buffer));
                }
                Ok(_) | Err(_) => {
                    warn!(
                        "{name}: cache miss with corrupted value {id:?} with hash {raw_hash} for {key}"
                    );
                    self.drop_corrupt_entry(&path);
                    return None;
                }
            }
        }

        debug!("{name}: cache miss with missing value {id:?} with hash {raw_hash} for {key}");
        None
    }
}

impl CacheStore for PakFileStore {
    fn cached_data_probably_exists(&self, key: &str) -> bool {
        Self::cached_data_probably_exists(self, key)
    }

    fn get_cached_data(&self, key: &str) -> Option<Bytes> {
        Self::get_cached_data(self, key)
    }

    fn put_cached_data(&self, key: &str, data: &[u8], put_even_if_exists: bool) -> PutStatus {
        Self::put_cached_data(self, key, data, put_even_if_exists)
    }

    fn remove_cached_data(&self, key: &str, transient: bool) {
        Self::remove_cached_data(self, key, transient);
    }

    fn put(
        &self,
        requests: Vec<PutRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(PutResponse),
    ) {
        let _scope = owner.begin_task();
        for request in requests {
            let outcome = self.put_cache_record(&request.name, &request.record, &request.policy);
            on_complete(PutResponse {
                name: request.name,
                key: request.record.key().clone(),
                user_data: request.user_data,
                status: outcome.status(),
            });
        }
    }

    fn get(
        &self,
        requests: Vec<GetRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(GetResponse),
    ) {
        let _scope = owner.begin_task();
        for request in requests {
            let (record, status) = self.get_cache_record(&request.name, &request.key, &request.policy);
            if status == Status::Ok {
                debug!("{}: cache hit for {}", request.name, request.key);
            }
            on_complete(GetResponse {
                name: request.name,
                key: request.key,
                record,
                user_data: request.user_data,
                status,
            });
        }
    }

    fn put_value(
        &self,
        requests: Vec<PutValueRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(PutValueResponse),
    ) {
        let _scope = owner.begin_task();
        for request in requests {
            let outcome =
                self.put_cache_value(&request.name, &request.key, &request.value, request.policy);
            on_complete(PutValueResponse {
                name: request.name,
                key: request.key,
                user_data: request.user_data,
                status: outcome.status(),
            });
        }
    }

    fn get_value(
        &self,
        requests: Vec<GetValueRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(GetValueResponse),
    ) {
        let _scope = owner.begin_task();
        for request in requests {
            let value = self
                .get_cache_value_only(&request.name, &request.key, request.policy)
                .and_then(|value| {
                    self.get_content(&request.name, &request.key, None, &value, request.policy)
                });
            let status = if value.is_some() { Status::Ok } else { Status::Error };
            if status == Status::Ok {
                debug!("{}: cache hit for {}", request.name, request.key);
            }
            on_complete(GetValueResponse {
                name: request.name,
                key: request.key,
                value,
                user_data: request.user_data,
                status,
            });
        }
    }

    fn get_chunks(
        &self,
        requests: Vec<GetChunkRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(GetChunkResponse),
    ) {
        let _scope = owner.begin_task();

        // Stable-sort by (key, id) so repeated reads of one value batch
        // together and share a loaded record and an open block reader.
        let mut sorted = requests;
        sorted.sort_by(|a, b| (&a.key, a.id).cmp(&(&b.key, b.id)));

        let mut current: Option<(CacheKey, ValueId)> = None;
        let mut value: Option<Value> = None;
        let mut reader: Option<BlockReader> = None;
        let mut record_package: Option<RecordPackage> = None;

        for request in sorted {
            let exists_only = request.policy.contains(CachePolicy::SKIP_DATA);
            let same = value.is_some()
                && current
                    .as_ref()
                    .is_some_and(|(key, id)| *key == request.key && *id == request.id);
            if !same || (!exists_only && reader.is_none()) {
                reader = None;
                value = None;
                if request.id.is_null() {
                    value = self
                        .get_cache_value_only(&request.name, &request.key, request.policy)
                        .and_then(|base| {
                            self.get_content(&request.name, &request.key, None, &base, request.policy)
                        });
                } else {
                    if record_package.as_ref().map(RecordPackage::key) != Some(&request.key) {
                        record_package = self.get_cache_record_only(
                            &request.name,
                            &request.key,
                            &RecordPolicy::new(request.policy),
                        );
                    }
                    if let Some(package) = &record_package {
                        if let Some(package_value) = package
                            .values()
                            .iter()
                            .find(|package_value| package_value.id == request.id)
                        {
                            let base = match package.find_attachment(package_value.raw_hash) {
                                Some(attachment) => Value::from_buffer(attachment.clone()),
                                None => package_value.as_value(),
                            };
                            value = self.get_content(
                                &request.name,
                                &request.key,
                                Some(request.id),
                                &base,
                                request.policy,
                            );
                        }
                    }
                }
                current = Some((request.key.clone(), request.id));
                if !exists_only {
                    if let Some(data) = value.as_ref().and_then(Value::data) {
                        reader = Some(BlockReader::new(data.clone()));
                    }
                }
            }

            let mut status = Status::Error;
            let mut data = None;
            let mut raw_size = 0;
            let mut raw_hash = RawHash::zero();
            if let Some(found) = &value {
                raw_hash = found.raw_hash();
                let raw_offset = found.raw_size().min(request.raw_offset);
                raw_size = (found.raw_size() - raw_offset).min(request.raw_size);
                if exists_only {
                    status = Status::Ok;
                } else if let Some(open_reader) = reader.as_mut() {
                    match open_reader.read(raw_offset, raw_size) {
                        Ok(bytes) => {
                            data = Some(bytes);
                            status = Status::Ok;
                        }
                        Err(err) => warn!(
                            "{}: failed to decompress chunk of {}: {err}",
                            request.name, request.key
                        ),
                    }
                }
            } else {
                debug!("{}: chunk miss for {}", request.name, request.key);
            }

            on_complete(GetChunkResponse {
                name: request.name,
                key: request.key,
                id: request.id,
                raw_offset: request.raw_offset,
                raw_size,
                raw_hash,
                data,
                user_data: request.user_data,
                status,
            });
        }
    }
}
