pub mod checks;
pub mod messages;

pub use checks::*;
pub use messages::*;
