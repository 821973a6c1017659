//! Scenario: the gateway refuses on the first failing gate, checked in the
//! fixed order integrity -> risk -> reconcile (§4.1, §5 "Mutation leases").

use bc_broker::{BrokerAdapter, BrokerError, BrokerGateway, GateRefusal, GateVerdicts, GatedError};
use bc_schemas::{AccountSnapshot, Bar, Micros, OrderRequest, OrderResult, OrderStatus, OrderType, Position, Side, Spread, SymbolInfo, Ticket, Timeframe};
use chrono::Utc;

struct StubBroker;

impl BrokerAdapter for StubBroker {
    fn connect(&mut self) -> Result<(), BrokerError> {
        Ok(())
    }
    fn is_connected(&self) -> bool {
        true
    }
    fn get_account(&self) -> Result<AccountSnapshot, BrokerError> {
        Ok(AccountSnapshot {
            balance: Micros::new(1_000_000_000),
            equity: Micros::new(1_000_000_000),
            used_margin: Micros::ZERO,
            free_margin: Micros::new(1_000_000_000),
            margin_level_pct: 100.0,
            currency: "USD".into(),
            peak_balance: Micros::new(1_000_000_000),
            drawdown_pct: 0.0,
        })
    }
    fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError> {
        Ok(SymbolInfo {
            symbol: symbol.into(),
            point: 0.0001,
            volume_min: 0.1,
            volume_max: 10.0,
            volume_step: 0.1,
            stops_level_points: 5.0,
            digits: 5,
            contract_size: 100_000.0,
            trade_allowed: true,
        })
    }
    fn get_bars(&self, _s: &str, _tf: Timeframe, _c: usize, _t: u64) -> Result<Vec<Bar>, BrokerError> {
        Ok(vec![])
    }
    fn get_positions(&self, _s: Option<&str>) -> Result<Vec<Position>, BrokerError> {
        Ok(vec![])
    }
    fn place_order(&mut self, req: OrderRequest, _timeout_ms: u64) -> Result<OrderResult, BrokerError> {
        Ok(OrderResult {
            status: OrderStatus::Filled,
            filled_volume: req.volume,
            fill_price: req.trigger_price.unwrap_or(100.0),
            ticket: Some(1),
            server_ts_utc: Utc::now(),
            broker_error_code: None,
            broker_error_message: None,
        })
    }
    fn modify_position(&mut self, _t: Ticket, _sl: Option<f64>, _tp: Option<f64>, _to: u64) -> Result<(), BrokerError> {
        Ok(())
    }
    fn close_position(&mut self, _t: Ticket, _v: Option<f64>, _to: u64) -> Result<OrderResult, BrokerError> {
        unimplemented!()
    }
    fn spread(&self, _s: &str) -> Result<Spread, BrokerError> {
        Ok(Spread { points: 1.0, percent: 0.001 })
    }
    fn server_time(&self) -> Result<chrono::DateTime<Utc>, BrokerError> {
        Ok(Utc::now())
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

fn req() -> OrderRequest {
    OrderRequest {
        signal_id: uuid::Uuid::new_v4(),
        symbol: "X".into(),
        side: Side::Long,
        volume: 1.0,
        order_type: OrderType::Market,
        trigger_price: Some(100.0),
        sl: Some(95.0),
        tp: Some(110.0),
        timeout_ms: 10_000,
    }
}

#[test]
fn all_three_failing_reports_integrity_first() {
    let mut gw = BrokerGateway::new(Box::new(StubBroker));
    let verdicts = GateVerdicts { integrity_armed: false, risk_allowed: false, reconcile_clean: false };
    let err = gw.place_order(req(), 10_000, &verdicts).unwrap_err();
    assert_eq!(err, GatedError::Refused(GateRefusal::IntegrityDisarmed));
}

#[test]
fn integrity_and_risk_ok_but_reconcile_dirty_blocks() {
    let mut gw = BrokerGateway::new(Box::new(StubBroker));
    let verdicts = GateVerdicts { integrity_armed: true, risk_allowed: true, reconcile_clean: false };
    let err = gw.place_order(req(), 10_000, &verdicts).unwrap_err();
    assert_eq!(err, GatedError::Refused(GateRefusal::ReconcileNotClean));
}

#[test]
fn all_clear_places_order() {
    let mut gw = BrokerGateway::new(Box::new(StubBroker));
    let res = gw.place_order(req(), 10_000, &GateVerdicts::all_clear()).unwrap();
    assert_eq!(res.status, OrderStatus::Filled);
}
