//! # tl-remote
//!
//! The contract Tunelab holds against the remote experiment store, plus two
//! implementations: [`HttpStore`] talks to the hosted service over REST,
//! [`MemoryStore`] keeps everything in-process and simulates the optimizer.

pub mod config;
pub mod http;
pub mod memory;
pub mod sampler;
pub mod store;
pub mod wire;

pub use config::{ClientConfig, DOTFILE_NAME, ENV_ACCESS_TOKEN, ENV_API_URL};
pub use http::HttpStore;
pub use memory::{MemoryDump, MemoryStore, MemoryStoreConfig};
pub use sampler::RandomSampler;
pub use store::RemoteStore;
pub use wire::{
    decode_outcome, decode_param, decode_variable, encode_outcome, encode_variable,
    ExperimentRecord, Page, ResultSubmission, WireResult, WireSetting, WireVariable,
    VIOLATION_TOKEN,
};
