use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// The role a registered port serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    /// Answers the diagnostic name probe; subject to active health checks.
    Status,
    Grpc,
    Tcp,
    Html,
}

impl ApiType {
    pub const ALL: [ApiType; 4] = [ApiType::Status, ApiType::Grpc, ApiType::Tcp, ApiType::Html];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::Status => "status",
            ApiType::Grpc => "grpc",
            ApiType::Tcp => "tcp",
            ApiType::Html => "html",
        }
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown api type \"{0}\"")]
pub struct UnknownApiType(pub String);

impl FromStr for ApiType {
    type Err = UnknownApiType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApiType::ALL
            .into_iter()
            .find(|api| api.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownApiType(s.to_string()))
    }
}
