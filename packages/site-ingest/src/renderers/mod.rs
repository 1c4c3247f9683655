//! Rendering capability implementations.

pub mod browserless;

pub use browserless::BrowserlessRenderer;
