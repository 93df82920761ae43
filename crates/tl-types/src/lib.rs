pub mod errors;
pub mod experiment;
pub mod job;
pub mod values;

pub use errors::*;
pub use experiment::*;
pub use job::*;
pub use values::*;
