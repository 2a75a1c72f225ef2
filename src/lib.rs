pub mod aggregators;
pub mod config;
pub mod emission;
pub mod engine;
pub mod error;
pub mod geo;
pub mod notify;
pub mod output;
pub mod pipeline;
pub mod reading;
pub mod source;
pub mod state;
