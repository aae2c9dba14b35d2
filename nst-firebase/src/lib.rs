//! Firebase REST adapters for the NST store traits.
//!
//! [`FirestoreRestStore`] backs the primary document tier and the user
//! records; [`RtdbRestStore`] backs the secondary tree tier, gift codes and
//! system settings.

pub mod codec;
mod firestore;
mod http;
mod rtdb;

pub use firestore::FirestoreRestStore;
pub use rtdb::RtdbRestStore;
