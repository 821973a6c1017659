//! The authoritative `ticket -> Position` map (§4.7) and its lifecycle state
//! machine: `NEW -> OPEN -> (MODIFYING <-> OPEN)* -> (PARTIALLY_CLOSED <->
//! OPEN)* -> CLOSING -> CLOSED`.
//!
//! The tracker never talks to the broker itself; callers (the trading loop)
//! issue broker calls and report the outcome back in with
//! `complete_modify`/`complete_close`/`reconcile`.

use std::collections::BTreeMap;

use bc_schemas::{LeaseOwner, LifecycleState, MutationLeaseRegistry, Position, Ticket};
use chrono::{DateTime, Utc};

use crate::types::{AttemptOutcome, PendingClose, PendingModify, ReconcileOutcome, TrackerConfig, TrackerEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    UnknownTicket(Ticket),
    WrongLifecycleState { ticket: Ticket, expected: &'static str, actual: LifecycleState },
    LeaseHeldByOther(Ticket),
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerError::UnknownTicket(t) => write!(f, "unknown ticket {t}"),
            TrackerError::WrongLifecycleState { ticket, expected, actual } => {
                write!(f, "ticket {ticket} expected lifecycle {expected}, was {actual:?}")
            }
            TrackerError::LeaseHeldByOther(t) => write!(f, "ticket {t} mutation lease held by another owner"),
        }
    }
}

impl std::error::Error for TrackerError {}

pub struct PositionTracker {
    positions: BTreeMap<Ticket, Position>,
    config: TrackerConfig,
    leases: MutationLeaseRegistry,
    pending_modify: BTreeMap<Ticket, PendingModify>,
    pending_close: BTreeMap<Ticket, PendingClose>,
    events: Vec<TrackerEvent>,
}

impl PositionTracker {
    pub fn new(config: TrackerConfig) -> Self {
        PositionTracker {
            positions: BTreeMap::new(),
            config,
            leases: MutationLeaseRegistry::new(),
            pending_modify: BTreeMap::new(),
            pending_close: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn get(&self, ticket: Ticket) -> Option<&Position> {
        self.positions.get(&ticket)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Ticket, &Position)> {
        self.positions.iter()
    }

    pub fn for_symbol(&self, symbol: &str) -> Vec<&Position> {
        self.positions.values().filter(|p| p.symbol == symbol).collect()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn drain_events(&mut self) -> Vec<TrackerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Inserts a position created right after `OrderRequest` submission,
    /// before fill confirmation (NEW).
    pub fn insert_new(&mut self, mut position: Position) -> Ticket {
        let ticket = position.ticket;
        position.lifecycle = LifecycleState::New;
        self.positions.insert(ticket, position);
        ticket
    }

    /// NEW -> OPEN on broker-confirmed fill.
    pub fn confirm_open(&mut self, ticket: Ticket) -> Result<(), TrackerError> {
        let pos = self.positions.get_mut(&ticket).ok_or(TrackerError::UnknownTicket(ticket))?;
        if pos.lifecycle != LifecycleState::New {
            return Err(TrackerError::WrongLifecycleState { ticket, expected: "NEW", actual: pos.lifecycle });
        }
        pos.lifecycle = LifecycleState::Open;
        self.events.push(TrackerEvent::Opened { ticket });
        Ok(())
    }

    // ---- Mutation leases ----

    pub fn acquire_lease(&mut self, ticket: Ticket, owner: LeaseOwner, now: DateTime<Utc>) -> bool {
        let deadline = now + chrono::Duration::seconds(self.config.lease_timeout_secs);
        self.leases.try_acquire(ticket, owner, now, deadline)
    }

    pub fn release_lease(&mut self, ticket: Ticket, owner: LeaseOwner) {
        self.leases.release(ticket, owner);
    }

    pub fn lease_held_by_other(&self, ticket: Ticket, asking: LeaseOwner, now: DateTime<Utc>) -> bool {
        self.leases.held_by_other(ticket, asking, now)
    }

    /// Read access to the lease registry for modifier subsystems
    /// (`bc-modifiers`, `bc-exits`) whose `evaluate` calls need to see the
    /// same lease state `begin_modify`/`begin_close` enforce.
    pub fn leases(&self) -> &MutationLeaseRegistry {
        &self.leases
    }

    // ---- Modify (SL/TP change) ----

    /// OPEN -> MODIFYING, guarded by the mutation lease. Callers issue the
    /// actual `modify_position` broker call after this returns `Ok`.
    pub fn begin_modify(&mut self, ticket: Ticket, owner: LeaseOwner, now: DateTime<Utc>) -> Result<(), TrackerError> {
        let pos = self.positions.get(&ticket).ok_or(TrackerError::UnknownTicket(ticket))?;
        if pos.lifecycle != LifecycleState::Open {
            return Err(TrackerError::WrongLifecycleState { ticket, expected: "OPEN", actual: pos.lifecycle });
        }
        if self.leases.held_by_other(ticket, owner, now) {
            return Err(TrackerError::LeaseHeldByOther(ticket));
        }
        self.acquire_lease(ticket, owner, now);
        self.positions.get_mut(&ticket).unwrap().lifecycle = LifecycleState::Modifying;
        Ok(())
    }

    /// Reports the outcome of a modify attempt. On success the position's
    /// SL/TP are updated and it returns to OPEN. On failure the attempt
    /// counter increments; once `modify_retries` is exhausted the modify is
    /// abandoned (back to OPEN, lease released, event emitted) rather than
    /// retried indefinitely (§4.7 "Failure semantics").
    pub fn complete_modify(
        &mut self,
        ticket: Ticket,
        owner: LeaseOwner,
        outcome: AttemptOutcome,
        new_sl: Option<f64>,
        new_tp: Option<f64>,
    ) -> Result<(), TrackerError> {
        let pos = self.positions.get_mut(&ticket).ok_or(TrackerError::UnknownTicket(ticket))?;
        if pos.lifecycle != LifecycleState::Modifying {
            return Err(TrackerError::WrongLifecycleState { ticket, expected: "MODIFYING", actual: pos.lifecycle });
        }
        match outcome {
            AttemptOutcome::Succeeded => {
                if let Some(sl) = new_sl {
                    pos.current_sl = sl;
                }
                if let Some(tp) = new_tp {
                    pos.current_tp = tp;
                }
                pos.lifecycle = LifecycleState::Open;
                self.pending_modify.remove(&ticket);
                self.release_lease(ticket, owner);
                Ok(())
            }
            AttemptOutcome::Failed => {
                let entry = self.pending_modify.entry(ticket).or_default();
                entry.attempts += 1;
                let attempts = entry.attempts;
                // Lifecycle does not change on failure (§4.7).
                if attempts >= self.config.modify_retries {
                    self.pending_modify.remove(&ticket);
                    self.positions.get_mut(&ticket).unwrap().lifecycle = LifecycleState::Open;
                    self.release_lease(ticket, owner);
                    self.events.push(TrackerEvent::ModifyAbandoned { ticket, attempts });
                }
                Ok(())
            }
        }
    }

    // ---- Partial close ----

    /// Records a partial close fill: OPEN|PARTIALLY_CLOSED -> PARTIALLY_CLOSED
    /// (or CLOSING if the entire remaining volume was closed).
    pub fn apply_partial_close(&mut self, ticket: Ticket, closed_volume: f64, volume_min: f64) -> Result<(), TrackerError> {
        let pos = self.positions.get_mut(&ticket).ok_or(TrackerError::UnknownTicket(ticket))?;
        if !matches!(pos.lifecycle, LifecycleState::Open | LifecycleState::PartiallyClosed) {
            return Err(TrackerError::WrongLifecycleState { ticket, expected: "OPEN or PARTIALLY_CLOSED", actual: pos.lifecycle });
        }
        pos.remaining_volume = (pos.remaining_volume - closed_volume).max(0.0);
        pos.lifecycle = if pos.remaining_volume < volume_min {
            LifecycleState::Closing
        } else {
            LifecycleState::PartiallyClosed
        };
        Ok(())
    }

    /// OPEN|PARTIALLY_CLOSED -> unchanged, guarded by the mutation lease.
    /// Unlike `begin_close`, a partial close never moves the lifecycle to
    /// CLOSING on its own — only `complete_partial_close` dropping the
    /// remainder below `volume_min` removes the ticket.
    pub fn begin_partial_close(&mut self, ticket: Ticket, owner: LeaseOwner, now: DateTime<Utc>) -> Result<(), TrackerError> {
        let pos = self.positions.get(&ticket).ok_or(TrackerError::UnknownTicket(ticket))?;
        if !matches!(pos.lifecycle, LifecycleState::Open | LifecycleState::PartiallyClosed) {
            return Err(TrackerError::WrongLifecycleState { ticket, expected: "OPEN or PARTIALLY_CLOSED", actual: pos.lifecycle });
        }
        if self.leases.held_by_other(ticket, owner, now) {
            return Err(TrackerError::LeaseHeldByOther(ticket));
        }
        self.acquire_lease(ticket, owner, now);
        Ok(())
    }

    /// Reports the outcome of a partial-close attempt begun with
    /// `begin_partial_close`. On success, reduces `remaining_volume` and
    /// returns to PARTIALLY_CLOSED; if the remainder drops below
    /// `volume_min` the ticket is removed entirely rather than left
    /// dangling with dust volume (the broker already closed it in full).
    /// The lease is released either way.
    pub fn complete_partial_close(
        &mut self,
        ticket: Ticket,
        owner: LeaseOwner,
        outcome: AttemptOutcome,
        closed_volume: f64,
        volume_min: f64,
    ) -> Result<(), TrackerError> {
        if outcome == AttemptOutcome::Succeeded {
            self.apply_partial_close(ticket, closed_volume, volume_min)?;
            if self.positions.get(&ticket).map(|p| p.lifecycle) == Some(LifecycleState::Closing) {
                self.positions.remove(&ticket);
            }
        }
        self.release_lease(ticket, owner);
        Ok(())
    }

    /// Appends a consumed profit-scaler tier to the position's record so it
    /// is never re-fired (§4.10(d): "records the tier as consumed"). A
    /// no-op if the ticket is unknown (already closed) or the tier was
    /// already recorded.
    pub fn record_tier_taken(&mut self, ticket: Ticket, tier_r_micro: i64) {
        if let Some(pos) = self.positions.get_mut(&ticket) {
            if !pos.tiers_taken.contains(&tier_r_micro) {
                pos.tiers_taken.push(tier_r_micro);
            }
        }
    }

    // ---- Full close ----

    /// OPEN|PARTIALLY_CLOSED -> CLOSING, guarded by the mutation lease.
    pub fn begin_close(&mut self, ticket: Ticket, owner: LeaseOwner, now: DateTime<Utc>) -> Result<(), TrackerError> {
        let pos = self.positions.get(&ticket).ok_or(TrackerError::UnknownTicket(ticket))?;
        if !matches!(pos.lifecycle, LifecycleState::Open | LifecycleState::PartiallyClosed) {
            return Err(TrackerError::WrongLifecycleState { ticket, expected: "OPEN or PARTIALLY_CLOSED", actual: pos.lifecycle });
        }
        if self.leases.held_by_other(ticket, owner, now) {
            return Err(TrackerError::LeaseHeldByOther(ticket));
        }
        self.acquire_lease(ticket, owner, now);
        self.positions.get_mut(&ticket).unwrap().lifecycle = LifecycleState::Closing;
        Ok(())
    }

    /// Reports the outcome of a close attempt in CLOSING state. On success
    /// the ticket is removed from the tracker entirely. On failure the
    /// attempt counter increments; once `close_retries` is exhausted the
    /// ticket remains CLOSING and an escalation event is emitted — it stays
    /// that way until manual intervention or the next reconnect
    /// reconciliation resolves it (§4.7 "Failure semantics").
    pub fn complete_close(&mut self, ticket: Ticket, owner: LeaseOwner, outcome: AttemptOutcome) -> Result<(), TrackerError> {
        let pos = self.positions.get(&ticket).ok_or(TrackerError::UnknownTicket(ticket))?;
        if pos.lifecycle != LifecycleState::Closing {
            return Err(TrackerError::WrongLifecycleState { ticket, expected: "CLOSING", actual: pos.lifecycle });
        }
        match outcome {
            AttemptOutcome::Succeeded => {
                self.positions.remove(&ticket);
                self.pending_close.remove(&ticket);
                self.release_lease(ticket, owner);
                Ok(())
            }
            AttemptOutcome::Failed => {
                let entry = self.pending_close.entry(ticket).or_default();
                entry.attempts += 1;
                let attempts = entry.attempts;
                if attempts >= self.config.close_retries {
                    self.events.push(TrackerEvent::CloseEscalated { ticket, attempts });
                }
                Ok(())
            }
        }
    }

    // ---- Reconciliation ----

    /// Compares the tracker's ticket set against the broker's reported
    /// positions (§4.7 "Reconciliation"). For tickets present on both
    /// sides, broker-reported price/SL/TP win over the tracker's own
    /// desired values.
    pub fn reconcile(&mut self, broker_positions: &[Position]) -> Vec<ReconcileOutcome> {
        let mut outcomes = Vec::new();
        let broker_by_ticket: BTreeMap<Ticket, &Position> = broker_positions.iter().map(|p| (p.ticket, p)).collect();

        let tracked_tickets: Vec<Ticket> = self.positions.keys().copied().collect();
        for ticket in tracked_tickets {
            match broker_by_ticket.get(&ticket) {
                Some(broker_pos) => {
                    let pos = self.positions.get_mut(&ticket).unwrap();
                    pos.current_price = broker_pos.current_price;
                    pos.current_sl = broker_pos.current_sl;
                    pos.current_tp = broker_pos.current_tp;
                    pos.unrealized_pnl = broker_pos.unrealized_pnl;
                    pos.remaining_volume = broker_pos.remaining_volume;
                    outcomes.push(ReconcileOutcome::Refreshed { ticket });
                }
                None => {
                    // Tracked but absent from the broker: closed out from
                    // under us. Realized P&L is whatever the last known
                    // unrealized P&L was, since no further fill record is
                    // available here.
                    let pos = self.positions.remove(&ticket).unwrap();
                    let realized_pnl = pos.unrealized_pnl;
                    self.events.push(TrackerEvent::ReconciledClosed { ticket, realized_pnl });
                    outcomes.push(ReconcileOutcome::ClosedByBroker { ticket, realized_pnl });
                }
            }
        }

        for broker_pos in broker_positions {
            if !self.positions.contains_key(&broker_pos.ticket) {
                self.events.push(TrackerEvent::AdoptionCandidate { ticket: broker_pos.ticket });
                outcomes.push(ReconcileOutcome::AdoptionCandidate { ticket: broker_pos.ticket });
            }
        }

        outcomes
    }

    /// Sum of signed volume (`remaining_volume * side.sign()`) across every
    /// tracked position, for the cross-check against the broker's own
    /// summed signed volume (§5, testable property 2).
    pub fn signed_volume_total(&self) -> f64 {
        self.positions.values().map(|p| p.remaining_volume * p.side.sign() as f64).sum()
    }

    /// `true` if every tracked position satisfies `remaining_volume >=
    /// volume_min OR lifecycle == CLOSING` (§4.3 invariant).
    pub fn volume_invariant_holds(&self, volume_min: f64) -> bool {
        self.positions.values().all(|p| p.remaining_volume >= volume_min || p.lifecycle == LifecycleState::Closing)
    }
}
