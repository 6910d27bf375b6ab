pub mod api_type;
pub mod service;
pub mod instance;
pub mod health;
pub mod catalogue;
pub mod resolver;
pub mod errors;
pub mod time;
pub mod auth;

pub use api_type::ApiType;
pub use service::{ServiceDescription, ServiceEntry};
pub use instance::{InstanceId, ServiceAddress, ServiceInstance};
pub use health::{EvictionReason, HealthPolicy, InstanceState};
pub use catalogue::{Catalogue, Eviction, ProbeTarget, ScrapeTarget, Upserted};
pub use resolver::{Target, TargetQuery};
pub use errors::{ErrorKind, RegistryError, RegistryResult};
pub use auth::{Role, Permission, Claims};
