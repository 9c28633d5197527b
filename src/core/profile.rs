use std::{fmt, str::FromStr};

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

const HAIP: &str = "HAIP";
const BASELINE: &str = "BASELINE";

const FRAGMENT: &str = "fragment";
const DIRECT_POST: &str = "direct_post";
const DIRECT_POST_JWT: &str = "direct_post.jwt";

/// The OID4VP profile a simulation runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Profile {
    /// High Assurance Interoperability Profile.
    Haip,
    Baseline,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Haip => HAIP,
            Profile::Baseline => BASELINE,
        }
    }

    /// Response mode assumed when the caller does not name one.
    pub fn default_response_mode(&self) -> ResponseMode {
        match self {
            Profile::Haip => ResponseMode::DirectPostJwt,
            Profile::Baseline => ResponseMode::DirectPost,
        }
    }

    /// Encrypted responses are mandatory exactly for HAIP combined with `direct_post.jwt`.
    pub fn requires_encryption(&self, response_mode: ResponseMode) -> bool {
        matches!(
            (self, response_mode),
            (Profile::Haip, ResponseMode::DirectPostJwt)
        )
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for Profile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            HAIP => Ok(Profile::Haip),
            BASELINE => Ok(Profile::Baseline),
            _ => bail!("unsupported profile {s}"),
        }
    }
}

/// `response_mode` parameter of an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResponseMode {
    Fragment,
    DirectPost,
    DirectPostJwt,
}

impl ResponseMode {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Fragment => FRAGMENT,
            ResponseMode::DirectPost => DIRECT_POST,
            ResponseMode::DirectPostJwt => DIRECT_POST_JWT,
        }
    }

    /// Whether the wallet posts its response back to a `response_uri`.
    pub fn is_direct_post(&self) -> bool {
        matches!(self, ResponseMode::DirectPost | ResponseMode::DirectPostJwt)
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for ResponseMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            FRAGMENT => Ok(ResponseMode::Fragment),
            DIRECT_POST => Ok(ResponseMode::DirectPost),
            DIRECT_POST_JWT => Ok(ResponseMode::DirectPostJwt),
            // Facades hand over enum-style names as well.
            "FRAGMENT" => Ok(ResponseMode::Fragment),
            "DIRECT_POST" => Ok(ResponseMode::DirectPost),
            "DIRECT_POST_JWT" => Ok(ResponseMode::DirectPostJwt),
            _ => bail!("unsupported response_mode {s}"),
        }
    }
}

impl TryFrom<String> for ResponseMode {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ResponseMode> for String {
    fn from(rm: ResponseMode) -> Self {
        rm.as_str().to_owned()
    }
}
