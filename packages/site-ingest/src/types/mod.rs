pub mod discovery;
pub mod document;
pub mod job;
