use std::time::Duration;

use serde::Deserialize;

use txweave_core::{CoreError, Gid, GlobalStatus, TransProtocol};
use txweave_engine::{BranchSpec, TransDefinition};

// -------------------------
// Request DTOs
// -------------------------

/// Body of `/api/submit` and `/api/prepare`.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    /// Generated when absent.
    #[serde(default)]
    pub gid: Option<String>,
    pub protocol: TransProtocol,
    pub branches: Vec<BranchSpec>,
    #[serde(default)]
    pub wait_result: bool,
    #[serde(default)]
    pub timeout_to_fail_ms: Option<u64>,
}

impl SubmitRequest {
    pub fn into_definition(self) -> Result<TransDefinition, CoreError> {
        let gid = match self.gid {
            Some(gid) => Gid::new(gid)?,
            None => Gid::generate(),
        };
        let mut def = TransDefinition::new(gid, self.protocol);
        def.branches = self.branches;
        def.wait_result = self.wait_result;
        def.timeout_to_fail = self.timeout_to_fail_ms.map(Duration::from_millis);
        def.validate()?;
        Ok(def)
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: GlobalStatus,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}
