//! Network port type

use std::num::NonZeroU16;
use std::str::FromStr;

use crate::types::ValidationError;

nonzero_newtype! {
    /// A TCP port other than 0
    ///
    /// ```
    /// use mongo_wire_proxy::types::Port;
    ///
    /// assert_eq!(Port::MONGODB.get(), 27017);
    /// assert!(Port::new(0).is_none());
    /// ```
    #[doc(alias = "tcp_port")]
    pub struct Port(NonZeroU16: u16, serialize as serialize_u16);
}

impl Port {
    /// Standard mongod port
    pub const MONGODB: Self = Self(NonZeroU16::new(27017).unwrap());

    /// Default proxy listen port
    pub const DEFAULT: Self = Self(NonZeroU16::new(27018).unwrap());
}

impl Default for Port {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl FromStr for Port {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u16>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| ValidationError::InvalidPort(s.to_string()))
    }
}

impl TryFrom<u16> for Port {
    type Error = ValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| ValidationError::InvalidPort(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_constants() {
        assert_eq!(Port::MONGODB.get(), 27017);
        assert_eq!(Port::default(), Port::DEFAULT);
    }

    #[test]
    fn test_port_from_str() {
        assert_eq!("27019".parse::<Port>().unwrap().get(), 27019);
        assert_eq!(
            "0".parse::<Port>(),
            Err(ValidationError::InvalidPort("0".to_string()))
        );
        assert!("70000".parse::<Port>().is_err());
        assert!("http".parse::<Port>().is_err());
    }

    #[test]
    fn test_port_ordering() {
        assert!(Port::MONGODB < Port::DEFAULT);
    }
}
