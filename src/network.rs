//! Party addressing and the deterministic per-task network descriptor.
//!
//! Every party independently computes the descriptor for a task from the
//! same `(job_id, class_path, class_name)` passphrase, so everything here
//! must be a pure function of its inputs: parties are emitted in sorted
//! order and ports are derived from a SHA-256 digest of the passphrase.

use crate::errors::*;
use crate::settings::{NetworkScheme, Settings};
use crate::urls;

use serde_json::Value;
use sha2::{Digest, Sha256};
use slog::Logger;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

//
// Public types
//

/// One entry of the party-address file: where to reach the party's
/// coordination service, optional extra headers for those calls, and the
/// party's data-plane agent endpoints.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PartyEntry {
    pub address: String,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub petnet:  Option<Vec<PetnetEndpoint>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PetnetEndpoint {
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct NetworkConfig {
    parties:          BTreeMap<String, PartyEntry>,
    scheme:           NetworkScheme,
    port_lower_bound: u32,
    port_upper_bound: u32,
}

impl NetworkConfig {
    /// Loads the party-address file named by settings. A missing file is
    /// logged and leaves an empty party table; lookups will then fail with
    /// not-found, which is the right failure mode for a misconfigured node
    /// that still has to serve health checks.
    pub fn load(log: &Logger, settings: &Settings) -> Result<NetworkConfig> {
        let path = Path::new(&settings.config_file);
        let parties = if path.is_file() {
            let raw = fs::read_to_string(path)
                .chain_err(|| format!("Error reading party config {}", settings.config_file))?;
            serde_json::from_str(&raw)
                .chain_err(|| format!("Error parsing party config {}", settings.config_file))?
        } else {
            warn!(log, "Failed to load party config -- starting with an empty party table";
                "config_file" => settings.config_file.as_str());
            BTreeMap::new()
        };
        Ok(NetworkConfig {
            parties,
            scheme: settings.network_scheme,
            port_lower_bound: settings.port_lower_bound,
            port_upper_bound: settings.port_upper_bound,
        })
    }

    pub fn from_parts(
        parties: BTreeMap<String, PartyEntry>,
        scheme: NetworkScheme,
        port_lower_bound: u32,
        port_upper_bound: u32,
    ) -> NetworkConfig {
        NetworkConfig {
            parties,
            scheme,
            port_lower_bound,
            port_upper_bound,
        }
    }

    /// A copy of the party table for collaborators (the peer client) that
    /// outlive this config handle.
    pub fn parties_cloned(&self) -> BTreeMap<String, PartyEntry> {
        self.parties.clone()
    }

    pub fn party(&self, name: &str) -> Result<&PartyEntry> {
        self.parties
            .get(name)
            .ok_or_else(|| error::not_found(format!("party {} in party config", name)))
    }

    /// Builds the transport descriptor shallow-merged into a task's common
    /// configuration.
    pub fn generate(&self, join_parties: &[String], passphrase: &str) -> Result<Value> {
        match self.scheme {
            NetworkScheme::Socket => self.socket_descriptor(join_parties, passphrase),
            NetworkScheme::Agent => self.agent_descriptor(join_parties, passphrase),
        }
    }

    //
    // Steps
    //

    fn socket_descriptor(&self, join_parties: &[String], passphrase: &str) -> Result<Value> {
        let mut parties: BTreeMap<String, Value> = BTreeMap::new();
        let mut sorted: Vec<&String> = join_parties.iter().collect();
        sorted.sort();
        for party in sorted {
            let port = derive_port(
                &format!("{}.{}", passphrase, party),
                self.port_lower_bound,
                self.port_upper_bound,
            )?;
            let host = urls::host(&self.party(party)?.address)?;
            parties.insert(
                party.clone(),
                json!({"address": [format!("{}:{}", host, port)]}),
            );
        }
        Ok(json!({
            "network_mode": "petnet",
            "network_scheme": "socket",
            "parties": parties,
        }))
    }

    fn agent_descriptor(&self, join_parties: &[String], passphrase: &str) -> Result<Value> {
        let mut parties: BTreeMap<String, Value> = BTreeMap::new();
        let mut sorted: Vec<&String> = join_parties.iter().collect();
        sorted.sort();
        for party in sorted {
            let entry = self.party(party)?;
            let endpoint = entry
                .petnet
                .as_ref()
                .and_then(|endpoints| endpoints.first())
                .ok_or_else(|| {
                    error::not_found(format!("petnet endpoint for party {}", party))
                })?;
            let address = urls::netloc(&endpoint.url)?;
            parties.insert(party.clone(), json!({"address": [address]}));
        }
        Ok(json!({
            "network_mode": "petnet",
            "network_scheme": "agent",
            "shared_topic": passphrase,
            "parties": parties,
        }))
    }
}

//
// Private functions
//

/// Maps a seed into `[lb, ub)` by reducing its SHA-256 digest modulo the
/// range width. The digest is folded byte by byte, which is equal to
/// treating it as one big integer and taking the modulus.
fn derive_port(seed: &str, lb: u32, ub: u32) -> Result<u32> {
    if !(lb < ub && ub <= 65536) {
        return Err(error::validation(format!("invalid port range: {}-{}", lb, ub)));
    }
    let width = u64::from(ub - lb);
    let digest = Sha256::digest(seed.as_bytes());
    let mut acc: u64 = 0;
    for byte in digest {
        acc = (acc * 256 + u64::from(byte)) % width;
    }
    Ok(lb + acc as u32)
}

//
// Tests
//

#[cfg(test)]
mod tests {
    use crate::network::*;
    use crate::settings::NetworkScheme;

    #[test]
    fn test_network_socket_descriptor() {
        let config = test_config(NetworkScheme::Socket);
        let join_parties = vec!["party_a".to_owned(), "party_b".to_owned()];

        let descriptor = config
            .generate(&join_parties, "test_network_config")
            .unwrap();
        assert_eq!(
            json!({
                "network_mode": "petnet",
                "network_scheme": "socket",
                "parties": {
                    "party_a": {"address": ["127.0.0.1:49702"]},
                    "party_b": {"address": ["127.0.0.2:60082"]},
                }
            }),
            descriptor
        );
    }

    #[test]
    fn test_network_agent_descriptor() {
        let config = test_config(NetworkScheme::Agent);
        let join_parties = vec!["party_a".to_owned(), "party_b".to_owned()];

        let descriptor = config
            .generate(&join_parties, "test_network_config")
            .unwrap();
        assert_eq!(
            json!({
                "network_mode": "petnet",
                "network_scheme": "agent",
                "shared_topic": "test_network_config",
                "parties": {
                    "party_a": {"address": ["127.0.0.1:1235"]},
                    "party_b": {"address": ["127.0.0.2:1235"]},
                }
            }),
            descriptor
        );
    }

    #[test]
    fn test_network_descriptor_deterministic() {
        let config = test_config(NetworkScheme::Socket);
        // Party iteration order must not leak into the output.
        let forward = vec!["party_a".to_owned(), "party_b".to_owned()];
        let backward = vec!["party_b".to_owned(), "party_a".to_owned()];

        let one = config.generate(&forward, "j_1.x.y").unwrap();
        let two = config.generate(&backward, "j_1.x.y").unwrap();
        assert_eq!(one, two);
        assert_eq!(
            serde_json::to_string(&one).unwrap(),
            serde_json::to_string(&two).unwrap()
        );
    }

    #[test]
    fn test_network_derive_port_in_bounds() {
        for seed in &["a", "b", "j_1.x.y.party_a", "j_1.x.y.party_b"] {
            let port = derive_port(seed, 49152, 65535).unwrap();
            assert!((49152..65535).contains(&port), "port {} for seed {}", port, seed);
        }
        // Degenerate one-port range maps everything to the bound.
        assert_eq!(50000, derive_port("anything", 50000, 50001).unwrap());
    }

    #[test]
    fn test_network_derive_port_invalid_range() {
        assert!(derive_port("x", 500, 400).is_err());
        assert!(derive_port("x", 0, 70000).is_err());
    }

    #[test]
    fn test_network_unknown_party() {
        let config = test_config(NetworkScheme::Socket);
        let res = config.generate(&["party_zz".to_owned()], "p");
        assert!(res.is_err());
    }

    //
    // Private functions
    //

    fn test_config(scheme: NetworkScheme) -> NetworkConfig {
        let mut parties = std::collections::BTreeMap::new();
        parties.insert(
            "party_a".to_owned(),
            PartyEntry {
                address: "http://127.0.0.1:5000".to_owned(),
                headers: None,
                petnet:  Some(vec![PetnetEndpoint {
                    url: "http://127.0.0.1:1235".to_owned(),
                }]),
            },
        );
        parties.insert(
            "party_b".to_owned(),
            PartyEntry {
                address: "http://127.0.0.2:5000".to_owned(),
                headers: None,
                petnet:  Some(vec![PetnetEndpoint {
                    url: "http://127.0.0.2:1235".to_owned(),
                }]),
            },
        );
        NetworkConfig::from_parts(parties, scheme, 49152, 65535)
    }
}
