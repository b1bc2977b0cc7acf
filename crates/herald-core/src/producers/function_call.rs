//! FunctionCallAdapter: AI-issued function calls as a producer.
//!
//! A function either answers inline (`Reply`) or turns its arguments into a
//! queued event (`Enqueue`). Every call, including unknown names, is written
//! to the function-call audit log.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::emitter::EventEmitter;
use crate::domain::{
    DEFAULT_MAX_RETRIES, EventId, FunctionCallLog, FunctionCallLogId, FunctionCallStatus,
    NewEvent, QueueError,
};
use crate::ports::{AuditLog, Clock, IdGenerator};
use crate::registry::RegistryError;

/// A function answered synchronously.
#[async_trait]
pub trait SyncFunction: Send + Sync {
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value, FunctionError>;
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct FunctionError(pub String);

/// Where an enqueued call goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueTarget {
    pub event_type: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl EnqueueTarget {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            priority: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Clone)]
pub enum FunctionKind {
    Reply(Arc<dyn SyncFunction>),
    Enqueue(EnqueueTarget),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default = "empty_arguments")]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub owner: Option<String>,
}

fn empty_arguments() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FunctionCallOutcome {
    Success {
        log_id: FunctionCallLogId,
        result: serde_json::Value,
    },
    Enqueued {
        log_id: FunctionCallLogId,
        event_id: EventId,
    },
}

#[derive(Debug, Error)]
pub enum FunctionCallError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("function {name} failed: {message}")]
    Failed { name: String, message: String },

    #[error("failed to enqueue function call: {0}")]
    Enqueue(#[from] QueueError),
}

pub struct FunctionCallAdapter {
    functions: HashMap<String, FunctionKind>,
    emitter: EventEmitter,
    audit: Arc<dyn AuditLog>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl FunctionCallAdapter {
    pub fn new(
        emitter: EventEmitter,
        audit: Arc<dyn AuditLog>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            functions: HashMap::new(),
            emitter,
            audit,
            ids,
            clock,
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        kind: FunctionKind,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.functions.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.functions.insert(name, kind);
        Ok(())
    }

    pub fn register_reply(
        &mut self,
        name: impl Into<String>,
        function: Arc<dyn SyncFunction>,
    ) -> Result<(), RegistryError> {
        self.register(name, FunctionKind::Reply(function))
    }

    pub fn register_enqueue(
        &mut self,
        name: impl Into<String>,
        target: EnqueueTarget,
    ) -> Result<(), RegistryError> {
        self.register(name, FunctionKind::Enqueue(target))
    }

    /// Sorted.
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn call(&self, call: FunctionCall) -> Result<FunctionCallOutcome, FunctionCallError> {
        let Some(kind) = self.functions.get(&call.name).cloned() else {
            let err = FunctionCallError::UnknownFunction(call.name.clone());
            self.audit(&call, FunctionCallStatus::Failed, None, Some(err.to_string()), None)
                .await;
            return Err(err);
        };

        match kind {
            FunctionKind::Reply(function) => match function.call(call.arguments.clone()).await {
                Ok(result) => {
                    let log_id = self
                        .audit(&call, FunctionCallStatus::Success, Some(result.clone()), None, None)
                        .await;
                    info!(function = %call.name, "function call answered");
                    Ok(FunctionCallOutcome::Success { log_id, result })
                }
                Err(e) => {
                    warn!(function = %call.name, error = %e, "function call failed");
                    self.audit(&call, FunctionCallStatus::Failed, None, Some(e.to_string()), None)
                        .await;
                    Err(FunctionCallError::Failed {
                        name: call.name,
                        message: e.0,
                    })
                }
            },
            FunctionKind::Enqueue(target) => {
                let mut new = NewEvent::new(target.event_type, call.arguments.clone())
                    .with_priority(target.priority)
                    .with_max_retries(target.max_retries);
                new.owner = call.owner.clone();

                match self.emitter.emit(new).await {
                    Ok(event) => {
                        let log_id = self
                            .audit(&call, FunctionCallStatus::Enqueued, None, None, Some(event.id))
                            .await;
                        info!(function = %call.name, event_id = %event.id, "function call enqueued");
                        Ok(FunctionCallOutcome::Enqueued {
                            log_id,
                            event_id: event.id,
                        })
                    }
                    Err(e) => {
                        warn!(function = %call.name, error = %e, "function call could not be enqueued");
                        self.audit(&call, FunctionCallStatus::Failed, None, Some(e.to_string()), None)
                            .await;
                        Err(FunctionCallError::Enqueue(e))
                    }
                }
            }
        }
    }

    async fn audit(
        &self,
        call: &FunctionCall,
        status: FunctionCallStatus,
        result: Option<serde_json::Value>,
        error_message: Option<String>,
        event_id: Option<EventId>,
    ) -> FunctionCallLogId {
        let id = self.ids.generate_function_call_log_id();
        let log = FunctionCallLog {
            id,
            function_name: call.name.clone(),
            arguments: call.arguments.clone(),
            status,
            result,
            error_message,
            event_id,
            owner: call.owner.clone(),
            called_at: self.clock.now(),
        };
        if let Err(e) = self.audit.record_function_call(log).await {
            warn!(function = %call.name, error = %e, "failed to write function call log");
        }
        id
    }
}
