use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub fn stable_hash_with(f: impl FnOnce(&mut DefaultHasher)) -> u64 {
    let mut hasher = DefaultHasher::new();
    f(&mut hasher);
    hasher.finish()
}

/// Order-sensitive checksum of an `(item, split)` assignment listing.
pub fn assignment_checksum<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> u64 {
    stable_hash_with(|hasher| {
        for (item, split) in entries {
            item.hash(hasher);
            split.hash(hasher);
        }
    })
}
