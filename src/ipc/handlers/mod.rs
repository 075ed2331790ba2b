pub mod assignments;
pub mod auth;
pub mod core;
pub mod factors;
pub mod footprints;
pub mod materials;
pub mod recommendations;
pub mod recycling;
pub mod users;
