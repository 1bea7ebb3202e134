//! Contract Resolution Workflow
//!
//! Issues one contract lookup per target, buffers candidates per lookup and,
//! on the end signal, accepts the lookup only if exactly one candidate came
//! back. Zero or several candidates are filed as errors against the lookup
//! so the driver sees them in the ledger.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::application::ports::{ContractSink, GatewayEvent, GatewayRequest};
use crate::application::session::{
    AMBIGUOUS_CODE, SINK_FAILED_CODE, Session, SessionFault, UNRESOLVED_CODE, Workflow,
    WorkflowError,
};
use crate::domain::contract::{ContractDescription, ContractSpec};
use crate::domain::request::RequestId;

/// How a lookup ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one candidate, persisted.
    Resolved(ContractDescription),
    /// Exactly one candidate, but the sink refused it.
    SinkFailed(ContractDescription),
    /// No candidate.
    Unresolved,
    /// More than one candidate.
    Ambiguous {
        /// Every candidate returned.
        candidates: Vec<ContractDescription>,
    },
}

/// Lookups sent and how they ended.
#[derive(Debug, Default)]
pub struct ResolutionBook {
    requested: HashMap<RequestId, ContractSpec>,
    resolutions: BTreeMap<RequestId, Resolution>,
}

impl ResolutionBook {
    /// The target looked up under `id`.
    #[must_use]
    pub fn target(&self, id: RequestId) -> Option<&ContractSpec> {
        self.requested.get(&id)
    }

    /// How the lookup under `id` ended, if it has.
    #[must_use]
    pub fn resolution(&self, id: RequestId) -> Option<&Resolution> {
        self.resolutions.get(&id)
    }

    /// Finished lookups in request order.
    pub fn resolutions(&self) -> impl Iterator<Item = (&ContractSpec, &Resolution)> {
        self.resolutions
            .iter()
            .filter_map(|(id, resolution)| Some((self.requested.get(id)?, resolution)))
    }

    /// Number of lookups sent.
    #[must_use]
    pub fn requested_count(&self) -> usize {
        self.requested.len()
    }
}

/// Resolves contract specs to gateway contracts.
pub struct ContractResolutionWorkflow {
    targets: Vec<ContractSpec>,
    sink: Arc<dyn ContractSink>,
}

impl ContractResolutionWorkflow {
    /// Create a workflow over `targets`, persisting through `sink`.
    pub fn new(targets: Vec<ContractSpec>, sink: Arc<dyn ContractSink>) -> Self {
        Self { targets, sink }
    }

    fn on_lookup_end(&self, id: RequestId, session: &Session<Self>) -> Result<(), SessionFault> {
        if !session.is_pending(id) {
            if session.is_known(id) {
                tracing::debug!(request_id = %id, "End signal for retired lookup");
                return Ok(());
            }
            return Err(SessionFault::Protocol(format!(
                "lookup end for unrequested id {id}"
            )));
        }

        let Some(target) = session.with_book(|book| book.requested.get(&id).cloned()) else {
            return Err(SessionFault::Protocol(format!(
                "lookup {id} filed without a target"
            )));
        };

        let mut candidates = session.take_responses(id);
        match candidates.len() {
            1 => {
                let description = candidates.remove(0);
                match self.sink.on_resolved(&target, &description) {
                    Ok(()) => {
                        tracing::info!(
                            request_id = %id,
                            symbol = %target.symbol,
                            con_id = description.con_id,
                            "Contract resolved"
                        );
                        session.with_book(|book| {
                            book.resolutions.insert(id, Resolution::Resolved(description));
                        });
                        session.complete_response(id).map(drop)
                    }
                    Err(e) => {
                        tracing::error!(request_id = %id, symbol = %target.symbol, error = %e, "Failed to persist contract");
                        session.with_book(|book| {
                            book.resolutions.insert(id, Resolution::SinkFailed(description));
                        });
                        session.reject_request(id, SINK_FAILED_CODE, e.to_string())
                    }
                }
            }
            0 => {
                tracing::warn!(request_id = %id, contract = %target, "Contract not found");
                session.with_book(|book| {
                    book.resolutions.insert(id, Resolution::Unresolved);
                });
                session.reject_request(id, UNRESOLVED_CODE, format!("no contract found for {target}"))
            }
            n => {
                tracing::warn!(request_id = %id, contract = %target, candidates = n, "Contract is ambiguous");
                session.with_book(|book| {
                    book.resolutions
                        .insert(id, Resolution::Ambiguous { candidates });
                });
                session.reject_request(
                    id,
                    AMBIGUOUS_CODE,
                    format!("{n} contracts match {target}"),
                )
            }
        }
    }
}

impl Workflow for ContractResolutionWorkflow {
    type Target = ContractSpec;
    type Fragment = ContractDescription;
    type Book = ResolutionBook;

    fn name(&self) -> &'static str {
        "contract_resolution"
    }

    fn targets(&self) -> &[ContractSpec] {
        &self.targets
    }

    fn prepare(
        &self,
        id: RequestId,
        target: &ContractSpec,
        book: &mut ResolutionBook,
    ) -> Result<GatewayRequest, WorkflowError> {
        if target.symbol.trim().is_empty() && target.con_id.is_none() {
            return Err(WorkflowError::InvalidTarget(
                "contract needs a symbol or a con id".to_string(),
            ));
        }
        book.requested.insert(id, target.clone());
        Ok(GatewayRequest::ContractDetails {
            id,
            contract: target.clone(),
        })
    }

    fn on_event(&self, event: GatewayEvent, session: &Session<Self>) -> Result<(), SessionFault> {
        match event {
            GatewayEvent::ContractDetails { id, description } => {
                tracing::debug!(request_id = %id, con_id = description.con_id, "Contract candidate");
                session.partial_response(id, description)
            }
            GatewayEvent::ContractDetailsEnd(id) => self.on_lookup_end(id, session),
            other => {
                tracing::trace!(event = ?other, "Ignoring event");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::SinkError;

    fn workflow() -> ContractResolutionWorkflow {
        let sink = |_: &ContractSpec, _: &ContractDescription| -> Result<(), SinkError> { Ok(()) };
        ContractResolutionWorkflow::new(vec![ContractSpec::stock("IBM")], Arc::new(sink))
    }

    #[test]
    fn prepare_files_target_in_book() {
        let workflow = workflow();
        let mut book = ResolutionBook::default();
        let request = workflow
            .prepare(RequestId::new(7), &ContractSpec::stock("IBM"), &mut book)
            .unwrap();

        assert_eq!(request.request_id(), Some(RequestId::new(7)));
        assert_eq!(book.target(RequestId::new(7)).map(|s| s.symbol.as_str()), Some("IBM"));
        assert_eq!(book.requested_count(), 1);
    }

    #[test]
    fn prepare_rejects_blank_target() {
        let workflow = workflow();
        let mut book = ResolutionBook::default();
        let err = workflow
            .prepare(RequestId::new(1), &ContractSpec::stock("  "), &mut book)
            .unwrap_err();

        assert!(matches!(err, WorkflowError::InvalidTarget(_)));
        assert_eq!(book.requested_count(), 0);
    }
}
