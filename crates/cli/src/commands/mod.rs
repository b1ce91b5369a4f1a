pub mod history;
pub mod mappings;
pub mod project;
pub mod run;
pub mod suspects;
pub mod util;

pub use history::*;
pub use mappings::*;
pub use project::*;
pub use run::*;
pub use suspects::*;
pub use util::*;
