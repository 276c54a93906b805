//! Process configuration, read from the environment exactly once at startup
//! and passed around by handle from there.

use crate::errors::*;

use std::env;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetworkScheme {
    Socket,
    Agent,
}

impl NetworkScheme {
    pub fn parse(token: &str) -> Result<NetworkScheme> {
        match token {
            "socket" => Ok(NetworkScheme::Socket),
            "agent" => Ok(NetworkScheme::Agent),
            _ => Err(error::validation(format!(
                "invalid network scheme {} (expected socket or agent)",
                token
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub db_uri:           String,
    /// Which party this node is. Every scheduling decision keys off it.
    pub party:            String,
    pub config_file:      String,
    pub safe_work_dir:    String,
    pub network_scheme:   NetworkScheme,
    pub port_lower_bound: u32,
    pub port_upper_bound: u32,
    pub max_job_limit:    i64,
    /// HS256 secret for verifying inbound bearer tokens. Only the API
    /// server needs it.
    pub secret:           Option<String>,
    /// Bearer token attached to outbound peer calls.
    pub jwt_token:        Option<String>,
    pub mission_dir:      String,
}

impl Settings {
    pub fn from_env() -> Result<Settings> {
        let party = env::var("PARTY")
            .map_err(|_| error::validation("env PARTY not found"))?;

        let network_scheme = NetworkScheme::parse(
            &env::var("NETWORK_SCHEME").unwrap_or_else(|_| "agent".to_owned()),
        )?;
        let port_lower_bound = parse_u32("PORT_LOWER_BOUND", 49152)?;
        let port_upper_bound = parse_u32("PORT_UPPER_BOUND", 65535)?;
        if !(port_lower_bound < port_upper_bound && port_upper_bound <= 65536) {
            return Err(error::validation(format!(
                "invalid port range: {}-{}",
                port_lower_bound, port_upper_bound
            )));
        }

        Ok(Settings {
            db_uri: env::var("PLATFORM_DB_URI").unwrap_or_else(|_| "jobmesh.db".to_owned()),
            party,
            config_file: env::var("CONFIG_FILE")
                .unwrap_or_else(|_| "parties/party.json".to_owned()),
            safe_work_dir: env::var("SAFE_WORK_DIR").unwrap_or_else(|_| "./data".to_owned()),
            network_scheme,
            port_lower_bound,
            port_upper_bound,
            max_job_limit: parse_i64("MAX_JOB_LIMIT", 10)?,
            secret: env::var("SECRET").ok(),
            jwt_token: env::var("JWT_TOKEN").ok(),
            mission_dir: env::var("MISSION_DIR").unwrap_or_else(|_| "missions".to_owned()),
        })
    }
}

//
// Private functions
//

fn parse_u32(key: &str, default: u32) -> Result<u32> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| error::validation(format!("env {} is not an integer: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

fn parse_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| error::validation(format!("env {} is not an integer: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

//
// Tests
//
