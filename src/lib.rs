pub mod adapters;
pub mod app;
#[cfg(feature = "cli")]
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, CompilerConfig};

pub use adapters::{DirectoryPublisher, LocalStorage};
pub use app::emitters::ArtifactKind;
pub use crate::core::compiler::{CancellationToken, CompileRequest, Compiler};
pub use crate::core::loader::SourceDocument;
pub use utils::error::{CompileError, Result};
