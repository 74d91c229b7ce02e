//! facewatch-store — SQLite record store for enrolled people.
//!
//! One row per enrolled person, pointing at a reference photo on disk. The
//! store owns both: deleting a person also removes their photo.

mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{Person, PersonStore};

#[cfg(test)]
mod tests;
