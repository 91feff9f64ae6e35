//! SDK semantic version carried by every request.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::bitstream::{BitReader, BitWriter};
use crate::error::{NextRouteError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct SdkVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl SdkVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch }
    }

    pub fn at_least(&self, minimum: &SdkVersion) -> bool {
        self >= minimum
    }

    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_u8(self.major)?;
        w.write_u8(self.minor)?;
        w.write_u8(self.patch)
    }

    pub fn read(r: &mut BitReader<'_>) -> Result<Self> {
        Ok(Self {
            major: r.read_u8()?,
            minor: r.read_u8()?,
            patch: r.read_u8()?,
        })
    }
}

impl fmt::Display for SdkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SdkVersion {
    type Err = NextRouteError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('.');
        let mut next = |what: &str| -> Result<u8> {
            parts
                .next()
                .ok_or_else(|| NextRouteError::BadRequest(format!("sdk version missing {what}: {s}")))?
                .parse::<u8>()
                .map_err(|e| NextRouteError::BadRequest(format!("sdk version {what} invalid ({s}): {e}")))
        };
        let version = SdkVersion::new(next("major")?, next("minor")?, next("patch")?);
        if parts.next().is_some() {
            return Err(NextRouteError::BadRequest(format!("sdk version has extra parts: {s}")));
        }
        Ok(version)
    }
}
