pub mod market;
pub mod resources;
pub mod ws;
