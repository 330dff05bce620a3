mod preferences;
mod schema;
mod session;
mod types;

pub use schema::Database;
pub use session::{MemorySessionStore, SessionStore};
pub use types::{DatabaseError, SessionEntry};
