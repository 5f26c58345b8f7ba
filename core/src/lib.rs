pub mod capability;
pub mod compiler;
pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod filter;
pub mod formula;
pub mod intent;
pub mod narration;
pub mod pipeline;
pub mod plan;
pub mod result;
pub mod stats;
pub mod store;
pub mod synth;
pub mod types;
