//! Resource delivery: signed URLs, the compatibility table, proxying and
//! the object store behind the origin.

mod kinds;
mod service;
mod signing;
mod store;
mod table;

pub use kinds::{Combination, DeliveryType, ResourceType};
pub use service::{DeliveryError, DeliveryService};
pub use signing::{
    SignatureError, SignedUrl, UrlSigner, ensure_signing_key, load_signing_key, read_signing_key,
};
pub use store::{FsObjectStore, NewObject, ObjectStore, StoreError, StoredObject};
pub use table::CompatibilityTable;

#[cfg(test)]
pub(crate) use store::MockObjectStore;
