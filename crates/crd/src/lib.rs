//! Custom resources and helpers shared by the Dossier hub
//!
//! - [`Tenant`]: Capsule tenant with its container limit ranges
//! - [`Spawner`]: administrator-defined backend definition
//! - [`parse_quantity`]: Kubernetes quantity strings to numbers

pub mod annotations;
pub mod quantity;
mod spawner;
mod tenant;

pub use annotations::Annotated;
pub use quantity::{parse_quantity, QuantityError, ResourceUnit};
pub use spawner::{Spawner, SpawnerSpec};
pub use tenant::{LimitRanges, Tenant, TenantSpec, CONTAINER_LIMIT};
