pub mod unique_linked_hash_map;

pub use unique_linked_hash_map::{DuplicateKeyError, UniqueLinkedHashMap};
