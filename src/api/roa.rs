//! Route origin authorization configuration.

use std::{error, fmt};
use std::str::FromStr;
use serde::{Deserialize, Serialize};


//------------ RoaConfigurationPrefix ----------------------------------------

/// A configured route origin authorization for one prefix.
///
/// The string representation is `<prefix>[-<max length>] => <asn>`, e.g.
/// `10.0.0.0/8-16 => 64496`.
#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct RoaConfigurationPrefix {
    /// The autonomous system authorized to originate routes.
    pub asn: u32,

    /// The prefix in `address/length` notation.
    pub prefix: String,

    /// The maximum prefix length for authorized routes.
    ///
    /// If this is `None`, then it is the length of the prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_length: Option<u8>,
}

impl RoaConfigurationPrefix {
    pub fn new(
        asn: u32, prefix: impl Into<String>, maximum_length: Option<u8>
    ) -> Self {
        RoaConfigurationPrefix {
            asn, prefix: prefix.into(), maximum_length
        }
    }

    /// Returns the length of the prefix.
    pub fn prefix_length(&self) -> Option<u8> {
        self.prefix.split_once('/').and_then(|(_, len)| len.parse().ok())
    }

    /// Returns the effective max length.
    pub fn effective_max_length(&self) -> Option<u8> {
        self.maximum_length.or_else(|| self.prefix_length())
    }
}

impl FromStr for RoaConfigurationPrefix {
    type Err = RoaPrefixParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix_part, asn_part) = s.split_once("=>").ok_or(
            RoaPrefixParseError::Syntax
        )?;
        let asn_part = asn_part.trim();
        let asn_part = asn_part.strip_prefix("AS").unwrap_or(asn_part);
        let asn = u32::from_str(asn_part).map_err(|_| {
            RoaPrefixParseError::Asn
        })?;

        let prefix_part = prefix_part.trim();
        let (prefix, max_length) = match prefix_part.split_once('-') {
            Some((prefix, max)) => {
                let max = u8::from_str(max.trim()).map_err(|_| {
                    RoaPrefixParseError::MaxLength
                })?;
                (prefix.trim(), Some(max))
            }
            None => (prefix_part, None)
        };

        let res = RoaConfigurationPrefix::new(asn, prefix, max_length);
        match (res.prefix_length(), max_length) {
            (None, _) => Err(RoaPrefixParseError::Prefix),
            (Some(len), Some(max)) if max < len => {
                Err(RoaPrefixParseError::MaxLength)
            }
            _ => Ok(res)
        }
    }
}

impl fmt::Display for RoaConfigurationPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.maximum_length {
            Some(max) => {
                write!(f, "{}-{} => {}", self.prefix, max, self.asn)
            }
            None => write!(f, "{} => {}", self.prefix, self.asn)
        }
    }
}


//------------ AnnouncedRoute ------------------------------------------------

/// A route seen in BGP, as used by the ignored announcements list.
#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct AnnouncedRoute {
    pub asn: u32,
    pub prefix: String,
}

impl AnnouncedRoute {
    pub fn new(asn: u32, prefix: impl Into<String>) -> Self {
        AnnouncedRoute { asn, prefix: prefix.into() }
    }
}

impl fmt::Display for AnnouncedRoute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} => {}", self.prefix, self.asn)
    }
}


//------------ RoaPrefixParseError -------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RoaPrefixParseError {
    Syntax,
    Asn,
    Prefix,
    MaxLength,
}

impl fmt::Display for RoaPrefixParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            RoaPrefixParseError::Syntax => {
                "expected '<prefix>[-<max length>] => <asn>'"
            }
            RoaPrefixParseError::Asn => "invalid AS number",
            RoaPrefixParseError::Prefix => "invalid prefix",
            RoaPrefixParseError::MaxLength => "invalid max length",
        })
    }
}

impl error::Error for RoaPrefixParseError { }


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roa_prefix() {
        let roa = RoaConfigurationPrefix::from_str(
            "10.0.0.0/8-16 => 64496"
        ).unwrap();
        assert_eq!(roa.asn, 64496);
        assert_eq!(roa.prefix, "10.0.0.0/8");
        assert_eq!(roa.maximum_length, Some(16));
        assert_eq!(roa.to_string(), "10.0.0.0/8-16 => 64496");

        let roa = RoaConfigurationPrefix::from_str(
            "2001:db8::/32 => AS64497"
        ).unwrap();
        assert_eq!(roa.effective_max_length(), Some(32));
    }

    #[test]
    fn reject_bad_roa_prefix() {
        assert_eq!(
            RoaConfigurationPrefix::from_str("10.0.0.0/8"),
            Err(RoaPrefixParseError::Syntax)
        );
        assert_eq!(
            RoaConfigurationPrefix::from_str("10.0.0.0/16-8 => 1"),
            Err(RoaPrefixParseError::MaxLength)
        );
        assert_eq!(
            RoaConfigurationPrefix::from_str("10.0.0.0 => 1"),
            Err(RoaPrefixParseError::Prefix)
        );
    }
}
