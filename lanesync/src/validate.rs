//! Input checks applied before anything is sent to the registry.

use std::net::IpAddr;

use uuid::{Uuid, Variant};

use crate::error::{Error, Result};

/// Accepts only RFC 4122 version-4 UUIDs, the format merchant access keys are
/// issued in.
pub fn validate_access_key(key: &str) -> Result<()> {
    let uuid = Uuid::parse_str(key.trim())
        .map_err(|_| Error::Invalid("access key is not a valid UUID".to_string()))?;
    if uuid.get_version_num() != 4 {
        return Err(Error::Invalid(format!(
            "access key must be a version 4 UUID, got version {}",
            uuid.get_version_num()
        )));
    }
    if uuid.get_variant() != Variant::RFC4122 {
        return Err(Error::Invalid(format!(
            "access key must be an RFC 4122 UUID, got variant {:?}",
            uuid.get_variant()
        )));
    }
    Ok(())
}

/// Parses a terminal address as IPv4 or IPv6.
pub fn validate_ip_address(ip: &str) -> Result<IpAddr> {
    ip.trim()
        .parse()
        .map_err(|_| Error::Invalid(format!("{:?} is not a valid IP address", ip)))
}

pub fn validate_lane_id(lane_id: &str) -> Result<()> {
    if lane_id.trim().is_empty() {
        return Err(Error::Invalid("lane id cannot be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_key() {
        assert!(validate_access_key("0b6bbf3c-7a4a-4d0e-9b0e-3c4a5f6e7d8c").is_ok());
        assert!(validate_access_key(&Uuid::new_v4().to_string()).is_ok());
        // Version 1 UUID.
        assert!(validate_access_key("c232ab00-9414-11ec-b3c8-9f6bdeced846").is_err());
        // Version nibble 4 but Microsoft and NCS variant bits.
        assert!(validate_access_key("0b6bbf3c-7a4a-4d0e-cb0e-3c4a5f6e7d8c").is_err());
        assert!(validate_access_key("0b6bbf3c-7a4a-4d0e-7b0e-3c4a5f6e7d8c").is_err());
        assert!(validate_access_key("not-a-key").is_err());
        assert!(validate_access_key("").is_err());
    }

    #[test]
    fn test_ip_address() {
        assert_eq!(
            validate_ip_address("10.0.0.5").unwrap().to_string(),
            "10.0.0.5"
        );
        assert!(validate_ip_address("::1").unwrap().is_ipv6());
        assert!(validate_ip_address("10.0.0").is_err());
        assert!(validate_ip_address("terminal.local").is_err());
    }

    #[test]
    fn test_lane_id() {
        assert!(validate_lane_id("5").is_ok());
        assert!(validate_lane_id("  ").is_err());
    }
}
