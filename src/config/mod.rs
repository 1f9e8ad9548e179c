pub mod runtime;
pub mod manager;
pub mod profiles;

pub use runtime::*;
pub use manager::*;
pub use profiles::*;
