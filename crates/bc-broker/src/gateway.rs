//! Broker Gateway — the single choke-point for all mutating broker calls.
//!
//! Every `place_order` / `modify_position` / `close_position` call evaluates
//! three gate verdicts in order and refuses with `GateRefusal` if any fails:
//!
//! 1. `integrity_armed`  — the system is armed, not disarmed or halted
//! 2. `risk_allowed`     — the risk evaluator approved this action
//! 3. `reconcile_clean`  — the tracker's last reconciliation was clean
//!
//! Callers (the trading loop) evaluate each verdict from its owning subsystem
//! and pass the result in; the gateway is the final policy enforcer and does
//! not itself know how a verdict was derived. Read-only calls
//! (`get_account`, `get_bars`, `get_positions`, ...) bypass the gate — they
//! cannot place the system at risk.

use crate::adapter::BrokerAdapter;
use crate::error::BrokerError;
use bc_schemas::{OrderRequest, OrderResult, Ticket};

#[derive(Debug, Clone, Copy)]
pub struct GateVerdicts {
    pub integrity_armed: bool,
    pub risk_allowed: bool,
    pub reconcile_clean: bool,
}

impl GateVerdicts {
    pub fn all_clear() -> Self {
        GateVerdicts {
            integrity_armed: true,
            risk_allowed: true,
            reconcile_clean: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRefusal {
    IntegrityDisarmed,
    RiskBlocked,
    ReconcileNotClean,
}

impl std::fmt::Display for GateRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateRefusal::IntegrityDisarmed => write!(f, "gate refused: integrity disarmed or halted"),
            GateRefusal::RiskBlocked => write!(f, "gate refused: risk evaluator did not allow"),
            GateRefusal::ReconcileNotClean => write!(f, "gate refused: reconcile is not clean"),
        }
    }
}

impl std::error::Error for GateRefusal {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatedError {
    Refused(GateRefusal),
    Broker(BrokerError),
}

impl std::fmt::Display for GatedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatedError::Refused(r) => write!(f, "{r}"),
            GatedError::Broker(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for GatedError {}

/// The single choke-point through which every mutating broker call flows.
/// Wraps a `Box<dyn BrokerAdapter>` so the trading loop can hold one gateway
/// regardless of which adapter is configured.
pub struct BrokerGateway {
    adapter: Box<dyn BrokerAdapter>,
}

impl BrokerGateway {
    pub fn new(adapter: Box<dyn BrokerAdapter>) -> Self {
        BrokerGateway { adapter }
    }

    fn enforce_gates(verdicts: &GateVerdicts) -> Result<(), GateRefusal> {
        if !verdicts.integrity_armed {
            return Err(GateRefusal::IntegrityDisarmed);
        }
        if !verdicts.risk_allowed {
            return Err(GateRefusal::RiskBlocked);
        }
        if !verdicts.reconcile_clean {
            return Err(GateRefusal::ReconcileNotClean);
        }
        Ok(())
    }

    pub fn place_order(
        &mut self,
        req: OrderRequest,
        timeout_ms: u64,
        verdicts: &GateVerdicts,
    ) -> Result<OrderResult, GatedError> {
        Self::enforce_gates(verdicts).map_err(GatedError::Refused)?;
        self.adapter.place_order(req, timeout_ms).map_err(GatedError::Broker)
    }

    pub fn modify_position(
        &mut self,
        ticket: Ticket,
        new_sl: Option<f64>,
        new_tp: Option<f64>,
        timeout_ms: u64,
        verdicts: &GateVerdicts,
    ) -> Result<(), GatedError> {
        Self::enforce_gates(verdicts).map_err(GatedError::Refused)?;
        self.adapter
            .modify_position(ticket, new_sl, new_tp, timeout_ms)
            .map_err(GatedError::Broker)
    }

    pub fn close_position(
        &mut self,
        ticket: Ticket,
        volume: Option<f64>,
        timeout_ms: u64,
        verdicts: &GateVerdicts,
    ) -> Result<OrderResult, GatedError> {
        Self::enforce_gates(verdicts).map_err(GatedError::Refused)?;
        self.adapter.close_position(ticket, volume, timeout_ms).map_err(GatedError::Broker)
    }

    /// Read-only calls bypass the gate.
    pub fn adapter(&self) -> &dyn BrokerAdapter {
        self.adapter.as_ref()
    }

    pub fn adapter_mut(&mut self) -> &mut dyn BrokerAdapter {
        self.adapter.as_mut()
    }
}

/// Derives the stable client-order id for a signal so retries of the same
/// signal never double-submit at the broker.
pub fn signal_id_to_client_order_id(signal_id: &bc_schemas::SignalId) -> String {
    signal_id.to_string()
}
