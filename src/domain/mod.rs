pub mod process;
pub mod restart;
pub mod state;

pub use process::*;
pub use restart::*;
pub use state::*;
