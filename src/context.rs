//! Shared state for one assistant instance.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::ParleyConfig;
use crate::dispatch::Dispatcher;
use crate::gate::AdmissionGate;
use crate::phase::PhaseStore;
use crate::pipeline::RequestState;
use crate::streaming::StreamingHub;

/// Everything the request core shares, passed explicitly by `Arc`.
///
/// The gate reports drops into the streaming hub, so refusals show up in
/// the current session's event log.
#[derive(Debug)]
pub struct RequestContext {
    config: ParleyConfig,
    phases: Arc<PhaseStore>,
    gate: Arc<AdmissionGate>,
    streaming: Arc<StreamingHub>,
    dispatcher: Dispatcher,
    conversation: Mutex<RequestState>,
}

impl RequestContext {
    pub fn new(config: ParleyConfig) -> Arc<Self> {
        let phases = Arc::new(PhaseStore::new());
        let streaming = Arc::new(StreamingHub::new());
        let gate = Arc::new(AdmissionGate::new().with_observer(streaming.clone()));
        Arc::new(Self {
            config,
            dispatcher: Dispatcher::new(phases.clone()),
            phases,
            gate,
            streaming,
            conversation: Mutex::new(RequestState::default()),
        })
    }

    pub fn config(&self) -> &ParleyConfig {
        &self.config
    }

    pub fn phases(&self) -> &Arc<PhaseStore> {
        &self.phases
    }

    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    pub fn streaming(&self) -> &Arc<StreamingHub> {
        &self.streaming
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn conversation(&self) -> MutexGuard<'_, RequestState> {
        self.conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;

    #[test]
    fn gate_drops_reach_current_session() {
        let ctx = RequestContext::new(ParleyConfig::default());
        let admitted = ctx.gate().try_claim(ctx.phases(), "first");
        let rid = admitted.into_result().unwrap().unwrap();
        let session = ctx.streaming().begin(&rid);

        assert!(!ctx.gate().try_claim(ctx.phases(), "second").allowed());
        assert_eq!(ctx.phases().current().phase, Phase::Sending);
        assert_eq!(session.run().gating_drop_sources["second"], 1);
    }
}
