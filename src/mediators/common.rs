//! Bits shared by the job mediators.

/// Bounded re-read-and-re-apply budget for operations that retry on
/// optimistic-lock conflicts.
pub const MAX_UPDATE_RETRIES: u32 = 3;

/// The peers a broadcast goes to: every join party except ourselves.
pub fn other_parties(join_parties: &[String], this_party: &str) -> Vec<String> {
    join_parties
        .iter()
        .filter(|party| party.as_str() != this_party)
        .cloned()
        .collect()
}

//
// Tests
//
