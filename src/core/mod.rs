pub mod compiler;
pub mod interpolate;
pub mod loader;
pub mod resolver;
pub mod tree;
pub mod validator;

pub use crate::domain::ports::{Publisher, Storage};
pub use crate::utils::error::Result;
pub use compiler::{CompileRequest, CompileStage, Compiler};
