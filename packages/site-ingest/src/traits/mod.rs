pub mod extractor;
pub mod fetcher;
pub mod renderer;
pub mod sink;
pub mod store;

pub use extractor::Extractor;
pub use fetcher::{FetchedPage, PageFetcher};
pub use renderer::{RenderSession, Renderer};
pub use sink::DocumentSink;
pub use store::JobStore;
