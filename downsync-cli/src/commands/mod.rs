pub mod agent;
pub mod connect;
pub mod controller;
