pub mod combat;
pub mod expiry;
pub mod patrol;
pub mod sync;
