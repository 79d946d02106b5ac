//! Key layout for the registry's Fjall partitions.
//!
//! - `files`: file:{file_id} -> File (JSON)
//! - `files_by_sha256`: sha256:{hex} -> file_id (string) — secondary index
//! - `jobs`: job:{job_id} -> Job (JSON)

pub fn encode_file_key(file_id: &uuid::Uuid) -> Vec<u8> {
    format!("file:{file_id}").into_bytes()
}

pub fn encode_sha256_key(sha256: &str) -> Vec<u8> {
    format!("sha256:{sha256}").into_bytes()
}

pub fn encode_job_key(job_id: &uuid::Uuid) -> Vec<u8> {
    format!("job:{job_id}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn file_key_round_trips_format() {
        let id = Uuid::nil();
        assert_eq!(
            encode_file_key(&id),
            format!("file:{id}").into_bytes()
        );
    }

    #[test]
    fn sha256_key_format() {
        assert_eq!(encode_sha256_key("abc"), b"sha256:abc");
    }
}
