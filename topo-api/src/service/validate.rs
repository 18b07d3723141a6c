//! Input validation for device requests.
//!
//! All checks run before the store is touched, so a rejected request never
//! leaves a partial write behind.

use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use crate::device::Device;

/// Shortest accepted device id.
///
/// Ids double as target names, so bare three-letter tokens such as `foo`
/// or `sw1` are refused and callers must pick a descriptive name
/// (`device-foo`, `spine-01`). Anything from four characters up is a
/// regular DNS label.
pub const MIN_ID_LEN: usize = 4;
/// Longest accepted device id (one DNS label).
pub const MAX_ID_LEN: usize = 63;

const MAX_HOSTNAME_LEN: usize = 253;

/// Reasons a device request is rejected before reaching the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("device ID must not be empty")]
    EmptyId,

    #[error("device ID '{0}' is invalid")]
    InvalidId(String),

    #[error("device address '{0}' is invalid")]
    InvalidAddress(String),

    #[error("device version '{0}' is invalid")]
    InvalidVersion(String),

    #[error("device '{0}' must not carry a revision when added")]
    RevisionNotAllowed(String),

    #[error("device '{0}' requires a revision to be updated")]
    RevisionRequired(String),
}

/// Validate a device about to be created.
pub fn validate_new(device: &Device) -> Result<(), ValidationError> {
    validate_fields(device)?;
    if !device.revision.is_none() {
        return Err(ValidationError::RevisionNotAllowed(device.id.to_string()));
    }
    Ok(())
}

/// Validate a device about to replace its stored version.
pub fn validate_update(device: &Device) -> Result<(), ValidationError> {
    validate_fields(device)?;
    if device.revision.is_none() {
        return Err(ValidationError::RevisionRequired(device.id.to_string()));
    }
    Ok(())
}

fn validate_fields(device: &Device) -> Result<(), ValidationError> {
    validate_id(device.id.as_str())?;
    validate_address(&device.address)?;
    validate_version(&device.version)
}

/// Device ids are DNS labels: ASCII letters, digits and hyphens, not
/// starting or ending with a hyphen.
pub fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if !(MIN_ID_LEN..=MAX_ID_LEN).contains(&id.len()) || !is_dns_label(id) {
        return Err(ValidationError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Addresses are `host:port`; IPv6 hosts must be bracketed.
pub fn validate_address(address: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidAddress(address.to_string());

    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    match port.parse::<u16>() {
        Ok(port) if port != 0 => {}
        _ => return Err(invalid()),
    }

    let host_ok = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        Some(v6) => v6.parse::<Ipv6Addr>().is_ok(),
        None => host.parse::<Ipv4Addr>().is_ok() || is_hostname(host),
    };
    if !host_ok {
        return Err(invalid());
    }
    Ok(())
}

/// Versions are `MAJOR.MINOR.PATCH` with optional `-pre` and `+build` parts.
pub fn validate_version(version: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidVersion(version.to_string());

    let (rest, build) = match version.split_once('+') {
        Some((rest, build)) => (rest, Some(build)),
        None => (version, None),
    };
    let (core, pre) = match rest.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (rest, None),
    };

    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() != 3 || !parts.iter().all(|p| is_numeric_identifier(p)) {
        return Err(invalid());
    }
    if [pre, build].into_iter().flatten().any(|s| !is_dotted_identifiers(s)) {
        return Err(invalid());
    }
    Ok(())
}

fn is_dns_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_ID_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_hostname(host: &str) -> bool {
    !host.is_empty() && host.len() <= MAX_HOSTNAME_LEN && host.split('.').all(is_dns_label)
}

fn is_numeric_identifier(part: &str) -> bool {
    !part.is_empty()
        && part.chars().all(|c| c.is_ascii_digit())
        && (part == "0" || !part.starts_with('0'))
}

fn is_dotted_identifiers(s: &str) -> bool {
    s.split('.')
        .all(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
}
