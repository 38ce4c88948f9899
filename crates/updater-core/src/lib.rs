mod errors;
pub mod proto;

pub use errors::CoreError;

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
