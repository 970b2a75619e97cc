pub mod assets;
pub mod config;
pub mod crypto;
pub mod document;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod template;
