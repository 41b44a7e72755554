mod responses;
mod types;
mod util;

pub use responses::*;
pub use types::*;
pub use util::*;
