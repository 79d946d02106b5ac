//! Key layout for the queue's Fjall partitions.
//!
//! Sequence numbers are zero-padded to 20 digits so that lexicographic
//! key ordering (what Fjall iterates in) matches numeric ordering — this
//! is what gives the `pending` partition its FIFO property.

const SEQ_WIDTH: usize = 20;

pub fn encode_seq_key(seq: u64) -> Vec<u8> {
    format!("{seq:0>width$}", width = SEQ_WIDTH).into_bytes()
}

pub fn decode_seq_key(key: &[u8]) -> Option<u64> {
    std::str::from_utf8(key).ok()?.parse().ok()
}

pub const NEXT_SEQ_KEY: &[u8] = b"next_seq";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_keys_sort_numerically() {
        let mut keys: Vec<Vec<u8>> = vec![10, 2, 1, 100].into_iter().map(encode_seq_key).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                encode_seq_key(1),
                encode_seq_key(2),
                encode_seq_key(10),
                encode_seq_key(100),
            ]
        );
    }
}
