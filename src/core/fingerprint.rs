// src/core/fingerprint.rs

//! Provision fingerprints and the record stored next to each context.

use crate::{constants::PROVISION_RECORD_FILENAME, core::registry::ProvisionSpec, models::Requirement};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};
use tempfile::NamedTempFile;
use thiserror::Error;

const HASH_TRUNCATE_LENGTH: usize = 16; // 16 bytes = 32 hex characters

/// Failures while writing a provision record.
#[derive(Error, Debug)]
pub enum FingerprintError {
    /// The record file could not be written.
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    /// The record could not be encoded.
    #[error("Error encoding provision record: {0}")]
    BincodeEncode(#[from] bincode::error::EncodeError),
    /// The temporary file could not replace the record.
    #[error("Error persisting provision record: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// What was installed into a context, stored next to it after a successful provision.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRecord {
    /// Hex digest of everything that shaped the context.
    pub fingerprint: String,
    /// Runtime the context was created with.
    pub runtime: String,
    /// Installed specifiers, in installation order.
    pub requirements: Vec<String>,
    /// Seconds since the Unix epoch.
    pub provisioned_at: u64,
}

impl ProvisionRecord {
    /// Stamps a record with the current time.
    pub fn new(fingerprint: String, runtime: &str, requirements: &[Requirement]) -> Self {
        let provisioned_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            fingerprint,
            runtime: runtime.to_string(),
            requirements: requirements.iter().map(|r| r.spec.clone()).collect(),
            provisioned_at,
        }
    }
}

/// Hashes everything that determines the content of a provisioned context:
/// the runtime, the requirement specifiers and the installer templates.
///
/// The requirement list is hashed in order, since installers may be order-sensitive.
pub fn compute(runtime: &str, requirements: &[Requirement], provision: &ProvisionSpec) -> String {
    let mut hasher = blake3::Hasher::new();
    let mut feed = |part: &str| {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    };

    feed(runtime);
    for requirement in requirements {
        feed(&requirement.spec);
    }
    feed(&provision.bin_dir);
    for step in [&provision.create, &provision.install] {
        feed(step.as_ref().map_or("", |s| s.source()));
    }

    let hash = hasher.finalize();
    hex::encode(hash.as_bytes().get(..HASH_TRUNCATE_LENGTH).unwrap_or(hash.as_bytes()))
}

/// Reads the record of a context directory. Any failure is treated as a cache miss.
pub fn read_record(env_dir: &Path) -> Option<ProvisionRecord> {
    let path = env_dir.join(PROVISION_RECORD_FILENAME);
    let bytes = fs::read(&path).ok()?;
    match bincode::serde::decode_from_slice(&bytes, bincode::config::standard()) {
        Ok((record, _)) => Some(record),
        Err(e) => {
            log::debug!("Ignoring unreadable provision record '{}': {}", path.display(), e);
            None
        }
    }
}

/// Atomically writes the record into a context directory.
pub fn write_record(env_dir: &Path, record: &ProvisionRecord) -> Result<(), FingerprintError> {
    let bytes = bincode::serde::encode_to_vec(record, bincode::config::standard())?;
    let mut temp = NamedTempFile::new_in(env_dir)?;
    temp.write_all(&bytes)?;
    temp.flush()?;
    temp.persist(env_dir.join(PROVISION_RECORD_FILENAME))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::Registry;
    use tempfile::TempDir;

    fn provision_spec() -> ProvisionSpec {
        Registry::from_toml_str(
            r#"
            env_list = ["unit"]
            [env.unit]
            commands = ["pytest"]
            "#,
            Path::new("/project"),
        )
        .unwrap()
        .provision
    }

    fn reqs(specs: &[&str]) -> Vec<Requirement> {
        specs.iter().map(|s| Requirement::parse(s)).collect()
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let spec = provision_spec();
        let a = compute("python3.11", &reqs(&["pytest", "coverage"]), &spec);
        assert_eq!(a.len(), 32);
        assert_eq!(a, compute("python3.11", &reqs(&["pytest", "coverage"]), &spec));
        assert_ne!(a, compute("python3.12", &reqs(&["pytest", "coverage"]), &spec));
        assert_ne!(a, compute("python3.11", &reqs(&["pytest"]), &spec));
        assert_ne!(a, compute("python3.11", &reqs(&["pytest", "coverage>=7"]), &spec));
    }

    #[test]
    fn test_fingerprint_separates_parts() {
        let spec = provision_spec();
        assert_ne!(
            compute("py", &reqs(&["ab"]), &spec),
            compute("pya", &reqs(&["b"]), &spec)
        );
    }

    #[test]
    fn test_record_round_trip_and_missing() {
        let dir = TempDir::new().unwrap();
        assert!(read_record(dir.path()).is_none());

        let record = ProvisionRecord::new("abc".to_string(), "python3", &reqs(&["pytest"]));
        write_record(dir.path(), &record).unwrap();
        assert_eq!(read_record(dir.path()), Some(record));
    }

    #[test]
    fn test_corrupt_record_is_a_miss() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PROVISION_RECORD_FILENAME), b"\xff\xff\xff").unwrap();
        assert!(read_record(dir.path()).is_none());
    }
}
