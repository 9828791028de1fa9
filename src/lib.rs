pub mod coach;
pub mod config;
pub mod consts;
pub mod filter;
pub mod gate;
pub mod identity;
pub mod limiter;
pub mod persist;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod store;
