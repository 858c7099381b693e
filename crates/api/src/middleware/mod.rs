//! Request extractors: [`auth::AuthUser`] for any signed-in caller and
//! [`rbac::RequireAdmin`] for credit administration.

pub mod auth;
pub mod rbac;
