pub mod gate;
pub mod jwt;
