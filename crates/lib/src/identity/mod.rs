//! Groups, group aliases and the engine that binds them together.

pub mod error;
pub mod request;
pub mod store;
pub mod types;

pub use error::{IdentityError, UserError};
pub use request::{GroupAliasRequest, GroupRequest, RegisterResponse};
pub use store::{AliasIdList, IdentityStore};
pub use types::{Alias, AliasView, Group};
