pub mod config;
pub mod discord;
pub mod lifecycle;
pub mod logging;
pub mod monitor;
pub mod presence;
pub mod start_log;

#[cfg(test)]
mod testing;
