mod driver;
mod options;

pub use driver::*;
pub use options::*;
