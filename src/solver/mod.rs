pub mod construct;
pub mod engine;
pub mod evaluation;
pub mod improve;
pub mod model;
pub mod race;
pub mod reconfigure;

pub use engine::solve_with;
pub use model::{unique_depots, RoutingModel};
pub use race::race;
