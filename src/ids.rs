//! Job identifier generation. IDs sort by creation time and carry a short
//! random suffix to disambiguate submissions landing within the same
//! second: `j_20240423182001_x4Tz`.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

const SUFFIX_LEN: usize = 4;

pub fn generate_job_id() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("j_{}_{}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

/// Cheap shape check used before any database lookup on a caller-supplied
/// ID. Not a full parse: the timestamp digits are not validated.
pub fn is_job_id(candidate: &str) -> bool {
    candidate.starts_with("j_")
}

//
// Tests
//

#[cfg(test)]
mod tests {
    use crate::ids::*;

    #[test]
    fn test_ids_generate_job_id() {
        let id = generate_job_id();
        assert!(is_job_id(&id));

        let sections: Vec<&str> = id.splitn(3, '_').collect();
        assert_eq!(3, sections.len());
        assert_eq!("j", sections[0]);
        assert_eq!(14, sections[1].len());
        assert!(sections[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(SUFFIX_LEN, sections[2].len());
    }

    #[test]
    fn test_ids_generate_job_id_unique() {
        assert_ne!(generate_job_id(), generate_job_id());
    }

    #[test]
    fn test_ids_is_job_id() {
        assert!(is_job_id("j_20240423182001_1234"));
        assert!(!is_job_id("20240423182001"));
        assert!(!is_job_id(""));
    }
}
