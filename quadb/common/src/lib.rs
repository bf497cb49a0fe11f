pub mod constants;
pub mod quad;
pub mod term;

pub use quad::{Quad, QuadPattern};
pub use term::Term;
