//! # Interaction Compatibility
//!
//! The lattice between the interaction a caller asks for and the one a
//! service declares:
//!
//! | service \ requested | ∅ | event | request | event+request |
//! |---------------------|---|-------|---------|---------------|
//! | event               | ✓ | ✓     |         |               |
//! | request             | ✓ |       | ✓       |               |
//! | event+request       | ✓ | ✓     | ✓       | ✓             |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a service exchanges data.
///
/// Variant order matches the lexical order of the wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Interaction {
    #[serde(rename = "event")]
    Event,
    #[serde(rename = "event+request", alias = "event_and_request")]
    EventAndRequest,
    #[serde(rename = "request")]
    Request,
}

impl Interaction {
    pub const ALL: [Interaction; 3] = [Self::Event, Self::EventAndRequest, Self::Request];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::EventAndRequest => "event+request",
            Self::Request => "request",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Event => 0,
            Self::EventAndRequest => 1,
            Self::Request => 2,
        }
    }

    /// Every interaction a service declaring `self` can serve.
    #[must_use]
    pub const fn served(self) -> &'static [Interaction] {
        match self {
            Self::Event => &[Self::Event],
            Self::Request => &[Self::Request],
            Self::EventAndRequest => &Self::ALL,
        }
    }
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interaction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(Self::Event),
            "request" => Ok(Self::Request),
            "event+request" | "event_and_request" => Ok(Self::EventAndRequest),
            other => Err(format!("unknown interaction '{}'", other)),
        }
    }
}

/// `COMPATIBILITY[service][requested]`, indexed by `Interaction::index`.
const COMPATIBILITY: [[bool; 3]; 3] = [
    // requested: event, event+request, request
    [true, false, false], // service: event
    [true, true, true],   // service: event+request
    [false, false, true], // service: request
];

/// Whether a service declaring `service` satisfies a request for `requested`.
#[must_use]
pub fn is_compatible(service: Interaction, requested: Option<Interaction>) -> bool {
    match requested {
        None => true,
        Some(r) => COMPATIBILITY[service.index()][r.index()],
    }
}

/// Serde adapter for optional interactions: `""` and absent both mean `None`,
/// and `None` serializes as `""`.
pub mod optional {
    use super::Interaction;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Interaction>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.map(Interaction::as_str).unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Interaction>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
