//! Validated string types that enforce invariants at construction time

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("hostname cannot be empty or whitespace")]
    EmptyHostName,

    #[error("proxy name cannot be empty or whitespace")]
    EmptyProxyName,

    #[error("invalid hostname: {0}")]
    InvalidHostName(String),

    #[error("invalid port number: {0}")]
    InvalidPort(String),
}

/// Generates a `String` newtype whose constructor runs `validation`
///
/// Each type gets `new()`, `as_str()`, `AsRef<str>`, `Deref`, `Display`,
/// `TryFrom<String>` and serde support that re-validates on deserialize.
macro_rules! validated_string {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident(String) {
            validation: |$s_param:ident| $validation:expr,
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
        #[serde(transparent)]
        $vis struct $name(String);

        impl $name {
            #[doc = concat!("Create a new ", stringify!($name), " after validation")]
            pub fn new($s_param: String) -> Result<Self, ValidationError> {
                let validate = || $validation;
                validate()?;
                Ok(Self($s_param))
            }

            #[must_use]
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            #[inline]
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from($s_param: String) -> Result<Self, Self::Error> {
                Self::new($s_param)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::new(s).map_err(serde::de::Error::custom)
            }
        }
    };
}

validated_string! {
    /// A hostname or IP literal that is neither blank nor padded
    ///
    /// ```
    /// use mongo_wire_proxy::types::HostName;
    ///
    /// assert!(HostName::new("db.internal".to_string()).is_ok());
    /// assert!(HostName::new("   ".to_string()).is_err());
    /// assert!(HostName::new("bad host".to_string()).is_err());
    /// ```
    #[doc(alias = "host")]
    pub struct HostName(String) {
        validation: |s| {
            if s.trim().is_empty() {
                Err(ValidationError::EmptyHostName)
            } else if s.chars().any(char::is_whitespace) {
                Err(ValidationError::InvalidHostName(s.clone()))
            } else {
                Ok(())
            }
        },
    }
}

validated_string! {
    /// Name the proxy reports to interceptors and in logs
    pub struct ProxyName(String) {
        validation: |s| {
            if s.trim().is_empty() {
                Err(ValidationError::EmptyProxyName)
            } else {
                Ok(())
            }
        },
    }
}
