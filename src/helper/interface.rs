//! vmnet-helper handshake reply.
//!
//! After starting the vmnet interface the helper prints the interface
//! parameters as one JSON object on stdout:
//!
//! ```text
//! {"vmnet_start_address":"192.168.105.1","vmnet_end_address":"192.168.105.254",
//!  "vmnet_subnet_mask":"255.255.255.0","vmnet_mac_address":"e:9a:1:ff:10:0",
//!  "vmnet_max_packet_size":1514,"vmnet_interface_id":"...", ...}
//! ```

use crate::error::{Error, Result};
use crate::identity::MacAddress;
use serde_json::Value;
use std::collections::BTreeMap;

/// Keys reported by vmnet-helper.
pub mod keys {
    /// First address of the per-VM DHCP range (also the gateway).
    pub const START_ADDRESS: &str = "vmnet_start_address";
    /// Last address of the per-VM DHCP range.
    pub const END_ADDRESS: &str = "vmnet_end_address";
    /// Subnet mask of the per-VM range.
    pub const SUBNET_MASK: &str = "vmnet_subnet_mask";
    /// Interface MAC address.
    pub const MAC_ADDRESS: &str = "vmnet_mac_address";
    /// Largest packet the interface accepts.
    pub const MAX_PACKET_SIZE: &str = "vmnet_max_packet_size";
    /// vmnet interface id.
    pub const INTERFACE_ID: &str = "vmnet_interface_id";
    /// Shared network IPv4 subnet.
    pub const IPV4_SUBNET: &str = "net_ipv4_subnet";
    /// Shared network IPv4 mask.
    pub const IPV4_MASK: &str = "net_ipv4_mask";
    /// Shared network IPv6 prefix.
    pub const IPV6_PREFIX: &str = "net_ipv6_prefix";
    /// Shared network IPv6 prefix length.
    pub const IPV6_PREFIX_LEN: &str = "net_ipv6_prefix_len";
}

/// Which set of keys a reply carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceShape {
    /// `--operation-mode=shared`: DHCP range of a per-VM subnet.
    PerVmSubnet,
    /// `--operation-mode=bridged|host`: vmnet reports no addressing.
    BareInterface,
    /// `--network`: subnet of a shared network.
    SharedNetwork,
}

impl InterfaceShape {
    /// Keys required for this shape.
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            InterfaceShape::PerVmSubnet => &[
                keys::START_ADDRESS,
                keys::END_ADDRESS,
                keys::SUBNET_MASK,
                keys::MAC_ADDRESS,
                keys::MAX_PACKET_SIZE,
            ],
            InterfaceShape::BareInterface => &[keys::MAC_ADDRESS, keys::MAX_PACKET_SIZE],
            InterfaceShape::SharedNetwork => &[
                keys::IPV4_SUBNET,
                keys::IPV4_MASK,
                keys::IPV6_PREFIX,
                keys::IPV6_PREFIX_LEN,
                keys::MAC_ADDRESS,
                keys::MAX_PACKET_SIZE,
            ],
        }
    }
}

/// Interface metadata from the helper handshake. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceInfo {
    values: BTreeMap<String, Value>,
}

impl InterfaceInfo {
    /// Parse a handshake line. The line must be a JSON object.
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line.trim())
            .map_err(|e| Error::handshake(format!("invalid reply {:?}: {}", line.trim(), e)))?;
        match value {
            Value::Object(map) => Ok(Self {
                values: map.into_iter().collect(),
            }),
            other => Err(Error::handshake(format!(
                "expected a JSON object, got {}",
                other
            ))),
        }
    }

    /// Fail unless every key of `shape` is present.
    pub fn ensure_complete(&self, shape: InterfaceShape) -> Result<()> {
        let missing: Vec<&str> = shape
            .required_keys()
            .iter()
            .copied()
            .filter(|k| !self.values.contains_key(*k))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::handshake(format!(
                "reply is missing {}",
                missing.join(", ")
            )))
        }
    }

    /// Shape inferred from the keys present.
    pub fn shape(&self) -> Option<InterfaceShape> {
        if self.values.contains_key(keys::START_ADDRESS) {
            Some(InterfaceShape::PerVmSubnet)
        } else if self.values.contains_key(keys::IPV4_SUBNET) {
            Some(InterfaceShape::SharedNetwork)
        } else if self.values.contains_key(keys::MAC_ADDRESS) {
            Some(InterfaceShape::BareInterface)
        } else {
            None
        }
    }

    /// Raw value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Integer value.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    /// MAC address assigned by vmnet.
    pub fn mac_address(&self) -> Option<MacAddress> {
        self.get_str(keys::MAC_ADDRESS)?.parse().ok()
    }

    /// Largest packet the interface accepts.
    pub fn max_packet_size(&self) -> Option<u64> {
        self.get_u64(keys::MAX_PACKET_SIZE)
    }

    /// Gateway address: the range start, or the shared network subnet.
    pub fn gateway(&self) -> Option<&str> {
        self.get_str(keys::START_ADDRESS)
            .or_else(|| self.get_str(keys::IPV4_SUBNET))
    }

    /// Iterate over all key/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

impl std::fmt::Display for InterfaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map: serde_json::Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        write!(f, "{}", Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PER_VM: &str = r#"{"vmnet_start_address":"192.168.105.1","vmnet_end_address":"192.168.105.254","vmnet_subnet_mask":"255.255.255.0","vmnet_mac_address":"e:9a:1:ff:10:0","vmnet_max_packet_size":1514,"vmnet_interface_id":"4A36B4F7-0F6B-4F2C-8B9D-3B0D0E3C6F11","vmnet_mtu":1500}"#;

    const SHARED_NETWORK: &str = r#"{"net_ipv4_subnet":"192.168.105.0","net_ipv4_mask":"255.255.255.0","net_ipv6_prefix":"fd9b:5a14:ba57:e3d3::","net_ipv6_prefix_len":64,"vmnet_mac_address":"92:c4:1d:2a:77:10","vmnet_max_packet_size":1514}"#;

    const BRIDGED: &str = r#"{"vmnet_mac_address":"92:c4:1d:2a:77:10","vmnet_mtu":1500,"vmnet_max_packet_size":1514}"#;

    #[test]
    fn test_parse_per_vm_reply() {
        let info = InterfaceInfo::parse(&format!("{}\n", PER_VM)).unwrap();
        assert_eq!(info.shape(), Some(InterfaceShape::PerVmSubnet));
        info.ensure_complete(InterfaceShape::PerVmSubnet).unwrap();

        assert_eq!(info.get_str(keys::START_ADDRESS), Some("192.168.105.1"));
        assert_eq!(info.max_packet_size(), Some(1514));
        assert_eq!(info.gateway(), Some("192.168.105.1"));
        assert_eq!(
            info.mac_address().unwrap().to_string(),
            "0e:9a:01:ff:10:00"
        );
        // Unknown keys are kept.
        assert_eq!(info.get_u64("vmnet_mtu"), Some(1500));
    }

    #[test]
    fn test_parse_shared_network_reply() {
        let info = InterfaceInfo::parse(SHARED_NETWORK).unwrap();
        assert_eq!(info.shape(), Some(InterfaceShape::SharedNetwork));
        info.ensure_complete(InterfaceShape::SharedNetwork).unwrap();
        assert!(info.ensure_complete(InterfaceShape::PerVmSubnet).is_err());
        assert_eq!(info.gateway(), Some("192.168.105.0"));
        assert_eq!(info.get_u64(keys::IPV6_PREFIX_LEN), Some(64));
    }

    #[test]
    fn test_parse_bridged_reply() {
        let info = InterfaceInfo::parse(BRIDGED).unwrap();
        assert_eq!(info.shape(), Some(InterfaceShape::BareInterface));
        info.ensure_complete(InterfaceShape::BareInterface).unwrap();
        assert!(info.ensure_complete(InterfaceShape::PerVmSubnet).is_err());
        assert_eq!(info.gateway(), None);
        assert_eq!(info.max_packet_size(), Some(1514));
        assert_eq!(info.mac_address().unwrap().to_string(), "92:c4:1d:2a:77:10");
    }

    #[test]
    fn test_incomplete_reply_names_missing_keys() {
        let info = InterfaceInfo::parse(r#"{"vmnet_start_address":"192.168.105.1"}"#).unwrap();
        let err = info.ensure_complete(InterfaceShape::PerVmSubnet).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::Handshake(_)));
        assert!(msg.contains(keys::END_ADDRESS), "got: {}", msg);
        assert!(msg.contains(keys::MAC_ADDRESS), "got: {}", msg);
    }

    #[test]
    fn test_invalid_replies() {
        for line in ["", "not json", "[1, 2]", "\"text\"", "{\"a\":"] {
            let err = InterfaceInfo::parse(line).unwrap_err();
            assert!(matches!(err, Error::Handshake(_)), "{:?}: {:?}", line, err);
        }
    }

    #[test]
    fn test_display_is_json() {
        let info = InterfaceInfo::parse(PER_VM).unwrap();
        let again = InterfaceInfo::parse(&info.to_string()).unwrap();
        assert_eq!(again, info);
    }
}
