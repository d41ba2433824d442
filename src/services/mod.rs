pub mod detail_cache;
pub mod indexer;
pub mod library;
pub mod profile;
pub mod providers;
pub mod recommendations;
pub mod scorer;
pub mod session;

pub use detail_cache::DetailCache;
pub use indexer::Indexer;
pub use library::LibraryService;
pub use profile::ProfileBuilder;
pub use recommendations::Recommender;
pub use scorer::Scorer;
pub use session::SessionSigner;
