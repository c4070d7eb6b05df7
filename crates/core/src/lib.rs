pub mod lifetime;
pub mod record;

pub use lifetime::{Lifetime, UnknownLifetime, humanize_remaining};
pub use record::{DEFAULT_AUTHOR, DEFAULT_TITLE, NewRecord, Record};
