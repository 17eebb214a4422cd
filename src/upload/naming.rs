//! Container-name validation and derived object names.

use chrono::{DateTime, SubsecRound, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::errors::UploadError;

/// Format of the timestamp injected into derived names.
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Check a container name before any backend call.
///
/// Accepted names are 3 to 63 characters drawn from lowercase ASCII
/// letters, digits and `-`.  A hyphen may not start or end the name, nor
/// follow another hyphen.
pub fn validate_container_name(name: &str) -> Result<(), UploadError> {
    let valid = (3..=63).contains(&name.len())
        && name
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--");
    if !valid {
        return Err(UploadError::InvalidContainerName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Split a blob name into `(stem, extension)`.  The extension keeps its
/// leading dot and is taken from the last path segment only; a leading dot
/// (`.env`) does not start an extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    let segment_start = name.rfind('/').map_or(0, |i| i + 1);
    match name[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => name.split_at(segment_start + dot),
        _ => (name, ""),
    }
}

/// Inject a UTC timestamp between stem and extension:
/// `report.pdf` becomes `report_20260301120000.pdf`.
pub fn derive_name(name: &str, at: DateTime<Utc>) -> String {
    let (stem, extension) = split_extension(name);
    format!("{}_{}{}", stem, at.format(TIMESTAMP_FORMAT), extension)
}

/// Issues derived names that are unique per container within this process.
///
/// A name already issued for the same container steps its timestamp forward
/// a second at a time until it is free.  Entries are forgotten once their
/// second has passed, since later derivations start from a later second.
#[derive(Debug, Default)]
pub struct NameAllocator {
    issued: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a name for `name` at `at` that no earlier call handed out.
    pub fn allocate(&self, container: &str, name: &str, at: DateTime<Utc>) -> String {
        let floor = at.trunc_subsecs(0);
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        issued.retain(|_, stamp| *stamp >= floor);

        let mut stamp = floor;
        loop {
            let key = (container.to_string(), derive_name(name, stamp));
            if !issued.contains_key(&key) {
                let derived = key.1.clone();
                issued.insert(key, stamp);
                return derived;
            }
            stamp += chrono::Duration::seconds(1);
        }
    }
}

/// Check a caller-supplied object name.
pub fn require_object_name(name: &str, what: &str) -> Result<(), UploadError> {
    if name.trim().is_empty() {
        return Err(UploadError::MissingUploadTarget(format!("{what} is required")));
    }
    Ok(())
}
