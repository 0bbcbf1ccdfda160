mod detector;
mod loader;
mod table;

pub use detector::*;
pub use loader::*;
pub use table::*;
