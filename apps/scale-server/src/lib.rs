pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod modbus;
pub mod openapi;
pub mod poller;
pub mod routes;
pub mod state;
pub mod store;
pub mod time;

#[cfg(test)]
pub mod test_support;
