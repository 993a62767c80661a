//! VM network identity.
//!
//! The interface id and MAC address are derived from the VM name so running
//! the same VM again gets the same vmnet interface and therefore the same
//! guest address.

use crate::error::{Error, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use uuid::Uuid;

/// Prefix hashed with the VM name to derive the interface id.
const INTERFACE_ID_PREFIX: &str = "vmnet-launch-";

/// Prefix hashed with the VM name to derive the MAC address.
const MAC_ADDRESS_PREFIX: &str = "vmnet-launch-mac-";

/// Return a stable vmnet interface id for `name`.
pub fn interface_id(name: &str) -> Uuid {
    let digest = Sha256::digest(format!("{}{}", INTERFACE_ID_PREFIX, name).as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

/// Return a stable locally administered unicast MAC address for `name`.
pub fn mac_from_name(name: &str) -> MacAddress {
    let digest = Sha256::digest(format!("{}{}", MAC_ADDRESS_PREFIX, name).as_bytes());
    let mut bytes = [0u8; 6];
    bytes.copy_from_slice(&digest[..6]);
    MacAddress::local_unicast(bytes)
}

/// Return a random locally administered unicast MAC address.
pub fn random_mac() -> MacAddress {
    let mut bytes = [0u8; 6];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    MacAddress::local_unicast(bytes)
}

/// Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Wrap raw bytes as-is.
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Set the locally administered bit and clear the multicast bit.
    pub fn local_unicast(mut bytes: [u8; 6]) -> Self {
        bytes[0] = (bytes[0] | 0x02) & 0xfe;
        Self(bytes)
    }

    /// Raw bytes.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Check the U/L bit.
    pub fn is_local(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// Check the I/G bit is clear.
    pub fn is_unicast(&self) -> bool {
        self.0[0] & 0x01 == 0
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(Error::config(format!("invalid mac address: {}", s)));
        }
        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(&parts) {
            // vmnet prints octets without zero padding ("e:9a:...").
            if part.is_empty() || part.len() > 2 {
                return Err(Error::config(format!("invalid mac address: {}", s)));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| Error::config(format!("invalid mac address: {}", s)))?;
        }
        Ok(Self(bytes))
    }
}
