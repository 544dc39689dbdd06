pub mod breaks;
pub mod location;
pub mod route_service;
pub mod simulator;
pub mod workflow;
