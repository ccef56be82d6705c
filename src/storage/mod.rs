mod articles;
mod schema;
mod settings;
mod sources;
mod types;

pub use schema::Database;
pub use types::{Article, CandidateItem, DatabaseError, NewSource, Settings, Source};
