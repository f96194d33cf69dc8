use mediatree::v1::CommitIdGenerator;

/// 128 random bits as 32 hex digits.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCommitIds;

impl CommitIdGenerator for RandomCommitIds {
    fn next_id(&self) -> String {
        random_hex()
    }
}

fn random_hex() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Id for merge requests the user did not name.
pub fn merge_request_id() -> String {
    format!("mr-{}", random_hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_are_hex_and_distinct() {
        let ids = RandomCommitIds;
        let a = ids.next_id();
        let b = ids.next_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_merge_request_id_shape() {
        let id = merge_request_id();
        assert!(id.starts_with("mr-"));
        assert_eq!(id.len(), 35);
        assert_ne!(id, merge_request_id());
    }
}
