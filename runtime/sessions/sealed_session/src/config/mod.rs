//! Types related to [`SessionConfig`][crate::SessionConfig].
mod cookie;
mod load;
mod policy;

pub use cookie::SessionCookieConfig;
pub use load::ConfigLoadError;
pub use policy::InvalidCookiePolicy;
