pub mod emitters;

#[cfg(feature = "cli")]
pub mod runner;

#[cfg(feature = "server")]
pub mod server;
