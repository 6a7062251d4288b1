pub mod cleanup;
pub mod engine;
pub mod pipeline;
pub mod storage;
