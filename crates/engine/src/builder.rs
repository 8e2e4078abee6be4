//! Fluent builders for transaction definitions.
//!
//! ```ignore
//! let def = SagaBuilder::new(Gid::generate())
//!     .add("http://bank-a/transout", "http://bank-a/transout_revert", json!({"amount": 30}))
//!     .add("http://bank-b/transin", "http://bank-b/transin_revert", json!({"amount": 30}))
//!     .wait_result(true)
//!     .build()?;
//! ```

use std::time::Duration;

use serde_json::Value as JsonValue;

use txweave_core::{CoreError, Gid, TransProtocol};

use crate::definition::{BranchSpec, TransDefinition};

macro_rules! common_builder_methods {
    () => {
        /// Block `Engine::submit` until the transaction is terminal.
        pub fn wait_result(mut self, wait: bool) -> Self {
            self.def.wait_result = wait;
            self
        }

        /// Abandon forward operations still unresolved after `timeout`.
        pub fn timeout_to_fail(mut self, timeout: Duration) -> Self {
            self.def.timeout_to_fail = Some(timeout);
            self
        }

        pub fn build(self) -> Result<TransDefinition, CoreError> {
            self.def.validate()?;
            Ok(self.def)
        }
    };
}

/// Builds a Saga: ordered (action, compensate) pairs.
#[derive(Debug, Clone)]
pub struct SagaBuilder {
    def: TransDefinition,
}

impl SagaBuilder {
    pub fn new(gid: Gid) -> Self {
        Self {
            def: TransDefinition::new(gid, TransProtocol::Saga),
        }
    }

    pub fn add(
        mut self,
        action: impl Into<String>,
        compensate: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        self.def.branches.push(BranchSpec::Saga {
            action: action.into(),
            compensate: compensate.into(),
            payload,
        });
        self
    }

    common_builder_methods!();
}

/// Builds a TCC transaction: ordered (try, confirm, cancel) triples.
#[derive(Debug, Clone)]
pub struct TccBuilder {
    def: TransDefinition,
}

impl TccBuilder {
    pub fn new(gid: Gid) -> Self {
        Self {
            def: TransDefinition::new(gid, TransProtocol::Tcc),
        }
    }

    pub fn add(
        mut self,
        try_endpoint: impl Into<String>,
        confirm: impl Into<String>,
        cancel: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        self.def.branches.push(BranchSpec::Tcc {
            try_endpoint: try_endpoint.into(),
            confirm: confirm.into(),
            cancel: cancel.into(),
            payload,
        });
        self
    }

    common_builder_methods!();
}

/// Builds an XA transaction: one endpoint per participant database.
#[derive(Debug, Clone)]
pub struct XaBuilder {
    def: TransDefinition,
}

impl XaBuilder {
    pub fn new(gid: Gid) -> Self {
        Self {
            def: TransDefinition::new(gid, TransProtocol::Xa),
        }
    }

    pub fn add(mut self, endpoint: impl Into<String>, payload: JsonValue) -> Self {
        self.def.branches.push(BranchSpec::Xa {
            endpoint: endpoint.into(),
            payload,
        });
        self
    }

    common_builder_methods!();
}
