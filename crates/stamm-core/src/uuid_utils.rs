//! UUID v7 utilities for time-ordered identifiers.
//!
//! Job and event rows use UUIDv7, which embeds a millisecond timestamp in
//! the first 48 bits, so id order matches creation order and FIFO queue
//! scans stay index-friendly.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Check whether a UUID is version 7.
pub fn is_v7(id: &Uuid) -> bool {
    id.get_version_num() == 7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_v7_is_version_7() {
        assert!(is_v7(&new_v7()));
    }

    #[test]
    fn new_v7_is_time_ordered() {
        let a = new_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_v7();
        assert!(a < b);
    }

    #[test]
    fn nil_is_not_v7() {
        assert!(!is_v7(&Uuid::nil()));
    }
}
