pub mod types;

pub use types::{Customer, Route, Solution, WarehouseAllocation};
