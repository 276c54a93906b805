//! Outbound calls to sibling parties' coordination services.
//!
//! The trait exists so mediators can be exercised against a pass-through
//! implementation that records calls instead of making them. The live
//! implementation speaks JSON over blocking HTTP with a bearer token and
//! bounded retry; delivery is best-effort and receivers are idempotent, so
//! a failed broadcast after retries is an error for the caller to surface,
//! not to compensate for.

use crate::errors::*;
use crate::network::{NetworkConfig, PartyEntry};

use serde_json::Value;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

//
// PeerClient trait + implementations
//

/// Body of a task-update notification. `job_context` is already filtered
/// to what the recipient is allowed to see by the time it gets here.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdateTaskParams {
    pub task_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_context: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors:      Option<String>,
}

pub trait PeerClient: Send + Sync {
    // This is here because it's difficult to make a trait cloneable.
    fn clone_box(&self) -> Box<dyn PeerClient>;

    fn submit(&self, log: &Logger, party: &str, params: &Value) -> Result<()>;

    fn rerun(&self, log: &Logger, party: &str, job_id: &str) -> Result<()>;

    fn cancel(&self, log: &Logger, party: &str, job_id: &str) -> Result<()>;

    fn update_task(
        &self,
        log: &Logger,
        party: &str,
        job_id: &str,
        task_name: &str,
        params: &UpdateTaskParams,
    ) -> Result<()>;
}

pub struct PeerClientLive {
    client:    reqwest::blocking::Client,
    parties:   BTreeMap<String, PartyEntry>,
    jwt_token: Option<String>,
}

impl PeerClientLive {
    pub fn new(network_config: &NetworkConfig, jwt_token: Option<String>) -> Result<PeerClientLive> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECONDS))
            .build()
            .chain_err(|| "Error building peer HTTP client")?;
        Ok(PeerClientLive {
            client,
            parties: network_config.parties_cloned(),
            jwt_token,
        })
    }

    //
    // Steps
    //

    fn action(
        &self,
        log: &Logger,
        party: &str,
        method: reqwest::Method,
        path: &str,
        body: &Value,
    ) -> Result<()> {
        let entry = self
            .parties
            .get(party)
            .ok_or_else(|| error::not_found(format!("party {} in party config", party)))?;
        let url = format!("{}{}", entry.address.trim_end_matches('/'), path);

        let mut last_error: Option<Error> = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                thread::sleep(Duration::from_millis(1 << (attempt - 1)));
            }
            info!(log, "Sending peer request";
                "party" => party, "method" => method.as_str(), "url" => url.as_str(),
                "attempt" => attempt);
            match self.attempt(entry, party, method.clone(), &url, body) {
                Ok(()) => return Ok(()),
                // A well-formed refusal is terminal: the peer understood us
                // and said no. Only transport-level trouble is retried.
                Err(e) => {
                    if let ErrorKind::Peer(_, _) = *e.kind() {
                        return Err(e);
                    }
                    warn!(log, "Peer request failed";
                        "party" => party, "url" => url.as_str(), "error" => e.to_string());
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| error::peer(party, "request failed without a recorded error")))
    }

    fn attempt(
        &self,
        entry: &PartyEntry,
        party: &str,
        method: reqwest::Method,
        url: &str,
        body: &Value,
    ) -> Result<()> {
        let mut request = self.client.request(method, url).json(body);
        if let Some(ref token) = self.jwt_token {
            request = request.bearer_auth(token);
        }
        if let Some(ref headers) = entry.headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request.send()?;
        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Err(error::validation(format!("empty response from {}", url)));
        }
        if !status.is_success() {
            return Err(error::validation(format!(
                "peer returned HTTP {} from {}",
                status, url
            )));
        }

        let payload: Value = response
            .json()
            .chain_err(|| format!("Error parsing peer response from {}", url))?;
        if payload["success"].as_bool() != Some(true) {
            let message = payload["error_message"]
                .as_str()
                .unwrap_or("peer reported failure without a message")
                .to_owned();
            return Err(error::peer(party, message));
        }
        Ok(())
    }
}

impl PeerClient for PeerClientLive {
    fn clone_box(&self) -> Box<dyn PeerClient> {
        Box::new(PeerClientLive {
            client:    self.client.clone(),
            parties:   self.parties.clone(),
            jwt_token: self.jwt_token.clone(),
        })
    }

    fn submit(&self, log: &Logger, party: &str, params: &Value) -> Result<()> {
        self.action(log, party, reqwest::Method::POST, "/api/v1/jobs", params)
    }

    fn rerun(&self, log: &Logger, party: &str, job_id: &str) -> Result<()> {
        self.action(
            log,
            party,
            reqwest::Method::POST,
            &format!("/api/v1/jobs/{}/rerun", job_id),
            &json!({}),
        )
    }

    fn cancel(&self, log: &Logger, party: &str, job_id: &str) -> Result<()> {
        self.action(
            log,
            party,
            reqwest::Method::POST,
            &format!("/api/v1/jobs/{}/cancel", job_id),
            &json!({}),
        )
    }

    fn update_task(
        &self,
        log: &Logger,
        party: &str,
        job_id: &str,
        task_name: &str,
        params: &UpdateTaskParams,
    ) -> Result<()> {
        let body = serde_json::to_value(params).chain_err(|| "Error serializing task update")?;
        self.action(
            log,
            party,
            reqwest::Method::PATCH,
            &format!("/api/v1/tasks/{}/{}", job_id, task_name),
            &body,
        )
    }
}

/// Records every call instead of making it; optionally fails them all.
/// The peer-facing analog of a test double for the whole sibling party.
#[derive(Clone, Debug, Default)]
pub struct PeerClientPassThrough {
    pub calls: Arc<Mutex<Vec<PeerCall>>>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PeerCall {
    pub party:     String,
    pub operation: String,
    pub job_id:    Option<String>,
    pub task_name: Option<String>,
    pub payload:   Option<Value>,
}

impl PeerClientPassThrough {
    pub fn new() -> PeerClientPassThrough {
        PeerClientPassThrough::default()
    }

    pub fn failing(message: &str) -> PeerClientPassThrough {
        PeerClientPassThrough {
            calls: Arc::new(Mutex::new(Vec::new())),
            error: Some(message.to_owned()),
        }
    }

    pub fn recorded(&self) -> Vec<PeerCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: PeerCall) -> Result<()> {
        let party = call.party.clone();
        self.calls.lock().unwrap().push(call);
        match self.error {
            Some(ref message) => Err(error::peer(party, message.clone())),
            None => Ok(()),
        }
    }
}

impl PeerClient for PeerClientPassThrough {
    fn clone_box(&self) -> Box<dyn PeerClient> {
        Box::new(self.clone())
    }

    fn submit(&self, _log: &Logger, party: &str, params: &Value) -> Result<()> {
        self.record(PeerCall {
            party:     party.to_owned(),
            operation: "submit".to_owned(),
            job_id:    params["job_id"].as_str().map(str::to_owned),
            task_name: None,
            payload:   Some(params.clone()),
        })
    }

    fn rerun(&self, _log: &Logger, party: &str, job_id: &str) -> Result<()> {
        self.record(PeerCall {
            party:     party.to_owned(),
            operation: "rerun".to_owned(),
            job_id:    Some(job_id.to_owned()),
            task_name: None,
            payload:   None,
        })
    }

    fn cancel(&self, _log: &Logger, party: &str, job_id: &str) -> Result<()> {
        self.record(PeerCall {
            party:     party.to_owned(),
            operation: "cancel".to_owned(),
            job_id:    Some(job_id.to_owned()),
            task_name: None,
            payload:   None,
        })
    }

    fn update_task(
        &self,
        _log: &Logger,
        party: &str,
        job_id: &str,
        task_name: &str,
        params: &UpdateTaskParams,
    ) -> Result<()> {
        self.record(PeerCall {
            party:     party.to_owned(),
            operation: "update_task".to_owned(),
            job_id:    Some(job_id.to_owned()),
            task_name: Some(task_name.to_owned()),
            payload:   serde_json::to_value(params).ok(),
        })
    }
}

//
// Private constants
//

const MAX_ATTEMPTS: u32 = 3;

const TIMEOUT_SECONDS: u64 = 10;

//
// Tests
//
