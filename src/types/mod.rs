pub mod route;
pub mod observation;
pub mod matrix;

pub use route::*;
pub use observation::*;
pub use matrix::*;
