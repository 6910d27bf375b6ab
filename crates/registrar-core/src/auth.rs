use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Permission {
    /// list, target, lookup
    ServiceRead,
    /// register, deregister, process-shutdown
    ServiceRegister,
    /// shut down other services
    ServiceShutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Role {
    Admin,
    Service,
    Viewer,
}

impl Role {
    pub fn permissions(&self) -> HashSet<Permission> {
        match self {
            Role::Admin => [
                Permission::ServiceRead,
                Permission::ServiceRegister,
                Permission::ServiceShutdown,
            ].into_iter().collect(),
            Role::Service => [
                Permission::ServiceRead,
                Permission::ServiceRegister,
            ].into_iter().collect(),
            Role::Viewer => [
                Permission::ServiceRead,
            ].into_iter().collect(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" | "admin" => Ok(Role::Admin),
            "Service" | "service" => Ok(Role::Service),
            "Viewer" | "viewer" => Ok(Role::Viewer),
            _ => Err("Invalid role. Use Admin, Service, or Viewer.".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub roles: Vec<Role>,
    pub exp: usize,
}

impl Claims {
    pub fn new(subject: impl Into<String>, roles: Vec<Role>, ttl: Duration) -> Self {
        let exp = (crate::time::now() / 1000).saturating_add(ttl.as_secs());
        Self {
            sub: subject.into(),
            roles,
            exp: usize::try_from(exp).unwrap_or(usize::MAX),
        }
    }

    pub fn allows(&self, permission: &Permission) -> bool {
        self.roles.iter().any(|role| role.permissions().contains(permission))
    }

    pub fn sign(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::default(), self, &EncodingKey::from_secret(secret.as_ref()))
    }

    pub fn verify(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_ref()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
    }
}
