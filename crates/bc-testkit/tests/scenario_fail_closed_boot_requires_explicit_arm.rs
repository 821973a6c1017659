//! A freshly built driver boots disarmed (§4.2 "Arm state" is fail-closed);
//! only an explicit `arm()` call flips it, and `disarm()` always reverts.

use bc_schemas::Timeframe;
use bc_testkit::Driver;
use chrono::Utc;

#[test]
fn boots_disarmed_and_responds_to_explicit_arm_disarm() {
    let mut driver = Driver::new("EURUSD", Timeframe::M15, Utc::now());
    assert!(!driver.is_armed(), "a fresh driver must boot disarmed");

    driver.arm();
    assert!(driver.is_armed());

    driver.disarm();
    assert!(!driver.is_armed());
}
