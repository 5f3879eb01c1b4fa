//! Why an I/O request was issued

use std::fmt;
use std::str::FromStr;

use crate::error::NetfsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoOrigin {
    ReadAhead,
    ReadPage,
    ReadForWrite,
    Writeback,
    WriteThrough,
    LaunderWrite,
    UnbufferedWrite,
    DioRead,
    DioWrite,
}

impl IoOrigin {
    pub const COUNT: usize = 9;

    /// All origins, in counter/report order
    pub const ALL: [IoOrigin; Self::COUNT] = [
        Self::ReadAhead,
        Self::ReadPage,
        Self::ReadForWrite,
        Self::Writeback,
        Self::WriteThrough,
        Self::LaunderWrite,
        Self::UnbufferedWrite,
        Self::DioRead,
        Self::DioWrite,
    ];

    /// Two-letter code used in the requests listing
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::ReadAhead => "RA",
            Self::ReadPage => "RP",
            Self::ReadForWrite => "RW",
            Self::Writeback => "WB",
            Self::WriteThrough => "WT",
            Self::LaunderWrite => "LW",
            Self::UnbufferedWrite => "UW",
            Self::DioRead => "DR",
            Self::DioWrite => "DW",
        }
    }

    /// Position in [`IoOrigin::ALL`]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::Writeback
                | Self::WriteThrough
                | Self::LaunderWrite
                | Self::UnbufferedWrite
                | Self::DioWrite
        )
    }
}

impl fmt::Display for IoOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for IoOrigin {
    type Err = NetfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|origin| origin.mnemonic() == s)
            .ok_or_else(|| NetfsError::InvalidConfig(format!("unknown origin code '{s}'")))
    }
}
