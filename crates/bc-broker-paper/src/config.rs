//! Static symbol facts and fill behavior for the in-memory paper broker.

use bc_schemas::Micros;

#[derive(Debug, Clone, PartialEq)]
pub struct PaperBrokerConfig {
    pub symbol: String,
    pub point: f64,
    pub spread_points: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    pub stops_level_points: f64,
    pub digits: u32,
    pub contract_size: f64,
    pub starting_balance: Micros,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        PaperBrokerConfig {
            symbol: "EURUSD".into(),
            point: 0.0001,
            spread_points: 1.5,
            volume_min: 0.01,
            volume_max: 50.0,
            volume_step: 0.01,
            stops_level_points: 5.0,
            digits: 5,
            contract_size: 100_000.0,
            starting_balance: Micros::from_f64(10_000.0),
        }
    }
}
