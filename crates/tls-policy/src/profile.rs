use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

/// A named upstream cipher-suite selection.
///
/// Profiles are modeled on the Mozilla server-side TLS guidance: `modern`
/// is TLS 1.3 only, `intermediate` allows TLS 1.2 with forward-secret AEAD
/// suites, `default` is the library default, and `insecure` enables every
/// suite the provider supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CipherProfile {
    #[default]
    Default,
    Modern,
    Intermediate,
    Insecure,
}

impl CipherProfile {
    /// All profiles, in a fixed order usable for table construction.
    pub const ALL: [CipherProfile; 4] = [
        CipherProfile::Default,
        CipherProfile::Modern,
        CipherProfile::Intermediate,
        CipherProfile::Insecure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CipherProfile::Default => "default",
            CipherProfile::Modern => "modern",
            CipherProfile::Intermediate => "intermediate",
            CipherProfile::Insecure => "insecure",
        }
    }

    /// Index into per-profile lookup tables; matches the order of [`Self::ALL`].
    pub(crate) fn index(self) -> usize {
        match self {
            CipherProfile::Default => 0,
            CipherProfile::Modern => 1,
            CipherProfile::Intermediate => 2,
            CipherProfile::Insecure => 3,
        }
    }
}

impl fmt::Display for CipherProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherProfile {
    type Err = Infallible;

    /// Parse a profile name.  Unrecognized names resolve to
    /// [`CipherProfile::Default`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "modern" => CipherProfile::Modern,
            "intermediate" => CipherProfile::Intermediate,
            "insecure" => CipherProfile::Insecure,
            _ => CipherProfile::Default,
        })
    }
}

impl<'de> Deserialize<'de> for CipherProfile {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(name.parse().unwrap_or_default())
    }
}

impl Serialize for CipherProfile {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}
