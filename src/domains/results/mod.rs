pub mod record;
pub mod store;

pub use record::CrawledRecord;
pub use store::{keyword_regex, InMemoryResultsStore, PostgresResultsStore, ResultsStore};
