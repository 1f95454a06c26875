pub mod accuracy;
pub mod aggregate;
pub mod cli;
pub mod config;
pub mod error;
pub mod granularity;
pub mod model;
pub mod pipeline;
pub mod quality;
pub mod repair;
pub mod statistics;
pub mod validation;

mod time;

#[cfg(test)]
pub mod test_support;
