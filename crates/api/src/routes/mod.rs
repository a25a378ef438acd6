pub mod config;
pub mod faces;
pub mod gate;
pub mod messages;
pub mod observability;
pub mod people;
pub mod rules;
pub mod system;
