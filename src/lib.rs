pub mod acquisition;
pub mod broadcast;
pub mod bus;
pub mod cli;
pub mod codec;
pub mod config;
pub mod health;
pub mod reading;
