//! Types for representing node identities
//!

/// The 4-byte identity of a node on the managed bus
///
/// Nodes report their ID in the first four payload bytes of every intro
/// frame. For map keys, persistence, and the operator protocol the ID is
/// rendered as an 8-character lowercase hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId([u8; 4]);

impl NodeId {
    /// Create a NodeId from its raw bytes
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the raw ID bytes
    pub const fn bytes(&self) -> [u8; 4] {
        self.0
    }

    /// Render as the canonical 8-char lowercase hex string
    #[cfg(feature = "std")]
    pub fn to_hex(&self) -> String {
        use core::fmt::Write as _;
        let mut s = String::with_capacity(8);
        for b in self.0 {
            write!(s, "{b:02x}").expect("writing to a String is infallible");
        }
        s
    }

    /// Parse the canonical hex rendering back into a NodeId
    ///
    /// Accepts exactly 8 hex characters, case-insensitive.
    #[cfg(feature = "std")]
    pub fn from_hex(s: &str) -> Result<Self, InvalidNodeIdError> {
        if s.len() != 8 || !s.is_ascii() {
            return Err(InvalidNodeIdError);
        }
        let mut bytes = [0u8; 4];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let text = core::str::from_utf8(chunk).map_err(|_| InvalidNodeIdError)?;
            bytes[i] = u8::from_str_radix(text, 16).map_err(|_| InvalidNodeIdError)?;
        }
        Ok(Self(bytes))
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 4]> for NodeId {
    fn from(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }
}

/// Error for parsing a NodeId from its hex rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidNodeIdError;

impl core::fmt::Display for InvalidNodeIdError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Invalid node ID")
    }
}
impl core::error::Error for InvalidNodeIdError {}

#[cfg(feature = "std")]
impl serde::Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(feature = "std")]
impl<'de> serde::Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'de, str> as serde::Deserialize>::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let id = NodeId::new([0x19, 0x00, 0x00, 0x19]);
        assert_eq!(id.to_hex(), "19000019");
        assert_eq!(NodeId::from_hex("19000019"), Ok(id));
        assert_eq!(NodeId::from_hex("19000019").unwrap().bytes(), id.bytes());
    }

    #[test]
    fn test_hex_rejects_bad_input() {
        assert!(NodeId::from_hex("1900001").is_err());
        assert!(NodeId::from_hex("190000190").is_err());
        assert!(NodeId::from_hex("1900zz19").is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = NodeId::new([0xAB, 0xCD, 0x00, 0x01]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abcd0001\"");
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
