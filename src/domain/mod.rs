// Domain layer: models, findings and ports. No I/O here.

pub mod artifact;
pub mod finding;
pub mod lenient;
pub mod model;
pub mod ports;
pub mod quantity;
pub mod resolved;
