// ── Hardware address ──
//
// Every Slave is keyed by its 17-character colon-separated MAC. The
// codec rejects anything else, so a `MacAddress` in hand is always valid.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::frame::DecodeError;

/// Length of the canonical `aa:bb:cc:dd:ee:ff` form.
pub const MAC_LEN: usize = 17;

/// MAC address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Parse and normalize a MAC address.
    ///
    /// Accepts colon- or dash-separated hex octets in either case. Anything
    /// that is not exactly six two-digit octets is rejected.
    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        if raw.len() != MAC_LEN {
            return Err(DecodeError::BadAddress {
                value: raw.to_owned(),
            });
        }

        let normalized = raw.to_ascii_lowercase().replace('-', ":");
        let well_formed = normalized.split(':').count() == 6
            && normalized
                .split(':')
                .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()));

        if well_formed {
            Ok(Self(normalized))
        } else {
            Err(DecodeError::BadAddress {
                value: raw.to_owned(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MacAddress {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}
