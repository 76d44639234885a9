//! Connection and thread limits

use std::num::NonZeroUsize;

use crate::constants::pool::DEFAULT_MAX_CONNECTIONS;

nonzero_newtype! {
    /// Upper bound on pooled connections to one backend
    ///
    /// ```
    /// use mongo_wire_proxy::types::MaxConnections;
    ///
    /// assert_eq!(MaxConnections::new(10).unwrap().get(), 10);
    /// assert!(MaxConnections::new(0).is_none());
    /// ```
    #[doc(alias = "pool_size")]
    pub struct MaxConnections(NonZeroUsize: usize, serialize as serialize_u64);
}

impl MaxConnections {
    pub const DEFAULT: Self = Self(NonZeroUsize::new(DEFAULT_MAX_CONNECTIONS).unwrap());
}

impl Default for MaxConnections {
    fn default() -> Self {
        Self::DEFAULT
    }
}

nonzero_newtype! {
    /// Worker thread count; 1 selects the current-thread runtime
    pub struct ThreadCount(NonZeroUsize: usize, serialize as serialize_u64);
}

impl ThreadCount {
    pub const SINGLE: Self = Self(NonZeroUsize::MIN);

    /// One thread per available core
    #[must_use]
    pub fn from_available_parallelism() -> Self {
        std::thread::available_parallelism().map_or(Self::SINGLE, Self)
    }
}

impl std::str::FromStr for ThreadCount {
    type Err = std::num::ParseIntError;

    /// `0` means "one per core"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.parse::<usize>()?;
        Ok(Self::new(value).unwrap_or_else(Self::from_available_parallelism))
    }
}
