//! Shared CLI argument parsers.

use std::time::Duration;
use vmnet_launch::helper::{OperationMode, Privilege};
use vmnet_launch::vm::{Driver, VmId};

/// Parse a duration string (e.g., "30s", "5m", "1h").
pub fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Parse and validate a VM name.
pub fn parse_vm_id(s: &str) -> Result<VmId, String> {
    VmId::new(s).map_err(|e| e.to_string())
}

/// Parse a driver identifier.
pub fn parse_driver(s: &str) -> Result<Driver, String> {
    s.parse().map_err(|e: vmnet_launch::Error| e.to_string())
}

/// Parse a vmnet operation mode.
pub fn parse_operation_mode(s: &str) -> Result<OperationMode, String> {
    s.parse().map_err(|e: vmnet_launch::Error| e.to_string())
}

/// Parse a privilege policy.
pub fn parse_privilege(s: &str) -> Result<Privilege, String> {
    s.parse().map_err(|e: vmnet_launch::Error| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_vm_id() {
        assert_eq!(parse_vm_id("ubuntu").unwrap().as_str(), "ubuntu");
        assert!(parse_vm_id("../ubuntu").is_err());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!(parse_driver("krunkit").unwrap(), Driver::Krunkit);
        assert!(parse_driver("xhyve").unwrap_err().contains("xhyve"));
        assert_eq!(parse_operation_mode("host").unwrap(), OperationMode::Host);
        assert_eq!(parse_privilege("always").unwrap(), Privilege::Always);
    }
}
