//! Module descriptions and the programmatic builder that produces them.

use std::collections::BTreeMap;
use std::path::Path;

use ignis_types::{ArgumentValue, Future, FutureAction, FutureId};
use serde::{Deserialize, Serialize};

use crate::FuturesError;

/// Named, ordered set of futures plus declared output bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescription {
    pub name: String,
    #[serde(default)]
    pub futures: Vec<Future>,
    #[serde(default)]
    pub outputs: BTreeMap<String, FutureId>,
}

impl ModuleDescription {
    /// Parses the JSON form of a module description.
    pub fn from_json_str(raw: &str) -> Result<Self, FuturesError> {
        serde_json::from_str(raw).map_err(|error| FuturesError::InvalidDescription(error.to_string()))
    }

    /// Reads and parses a JSON module description file.
    pub fn from_path(path: &Path) -> Result<Self, FuturesError> {
        let raw = std::fs::read_to_string(path).map_err(|error| FuturesError::Read {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_pretty(&self) -> Result<String, FuturesError> {
        serde_json::to_string_pretty(self)
            .map_err(|error| FuturesError::InvalidDescription(error.to_string()))
    }
}

/// Stand-in for the external module DSL: records futures with deterministic ids.
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    name: String,
    futures: Vec<Future>,
    outputs: BTreeMap<String, FutureId>,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Result<Self, FuturesError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(FuturesError::EmptyModuleName);
        }
        Ok(Self {
            name,
            futures: Vec::new(),
            outputs: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a future under an explicit module-local id.
    pub fn add(&mut self, local_id: &str, action: FutureAction) -> Result<FutureId, FuturesError> {
        let id = FutureId::new(&self.name, local_id)?;
        self.futures.push(Future::new(id.clone(), action));
        Ok(id)
    }

    /// Deploys `contract_name`; the future id is `<module>#<contract_name>`.
    pub fn contract(
        &mut self,
        contract_name: &str,
        args: Vec<ArgumentValue>,
    ) -> Result<FutureId, FuturesError> {
        self.add(
            contract_name,
            FutureAction::Deploy {
                contract_name: contract_name.to_string(),
                args,
                value: None,
            },
        )
    }

    /// Calls `function` on the contract produced by `contract`.
    pub fn call(
        &mut self,
        contract: &FutureId,
        function: &str,
        args: Vec<ArgumentValue>,
    ) -> Result<FutureId, FuturesError> {
        let local_id = format!("{}.{}", contract.local_id(), function);
        self.add(
            &local_id,
            FutureAction::Call {
                contract: ArgumentValue::address_of(contract),
                function: function.to_string(),
                args,
                value: None,
            },
        )
    }

    /// Reads `function` on the contract produced by `contract` without a transaction.
    pub fn static_call(
        &mut self,
        contract: &FutureId,
        function: &str,
        args: Vec<ArgumentValue>,
    ) -> Result<FutureId, FuturesError> {
        let local_id = format!("{}.{}", contract.local_id(), function);
        self.add(
            &local_id,
            FutureAction::StaticCall {
                contract: ArgumentValue::address_of(contract),
                function: function.to_string(),
                args,
            },
        )
    }

    pub fn send_value(
        &mut self,
        local_id: &str,
        to: ArgumentValue,
        value: ArgumentValue,
    ) -> Result<FutureId, FuturesError> {
        self.add(local_id, FutureAction::SendValue { to, value })
    }

    /// Reads `argument` from the first `event` emitted by `emitter`'s transaction.
    pub fn read_event_argument(
        &mut self,
        emitter: &FutureId,
        event: &str,
        argument: &str,
    ) -> Result<FutureId, FuturesError> {
        let local_id = format!("{}.{}.{}.0", emitter.local_id(), event, argument);
        self.add(
            &local_id,
            FutureAction::ReadEventArgument {
                emitter: emitter.clone(),
                event: event.to_string(),
                argument: argument.to_string(),
                event_index: 0,
            },
        )
    }

    /// Binds an already deployed contract at `address`.
    pub fn contract_at(
        &mut self,
        contract_name: &str,
        address: ArgumentValue,
    ) -> Result<FutureId, FuturesError> {
        self.add(
            contract_name,
            FutureAction::ContractAt {
                contract_name: contract_name.to_string(),
                address,
            },
        )
    }

    /// Adds an explicit ordering dependency `future -> dependency`.
    pub fn after(&mut self, future: &FutureId, dependency: &FutureId) -> Result<(), FuturesError> {
        let entry = self
            .futures
            .iter_mut()
            .find(|candidate| &candidate.id == future)
            .ok_or_else(|| FuturesError::UnknownFuture(future.clone()))?;
        entry.after.insert(dependency.clone());
        Ok(())
    }

    pub fn output(&mut self, key: impl Into<String>, future: &FutureId) {
        self.outputs.insert(key.into(), future.clone());
    }

    pub fn build(self) -> ModuleDescription {
        ModuleDescription {
            name: self.name,
            futures: self.futures,
            outputs: self.outputs,
        }
    }
}
