//! Feature tables for the stock Arduino sketches.
//!
//! | Sketch | Feature | Wire | Access |
//! |---|---|---|---|
//! | temperature sensor | `temperature` | `TEMP` → decimal °C | read-only |
//! | LED driver | `led` | `LED` → `0`/`1`, `LED <0\|1>` | read-write |

use inolink_types::{InoError, Unit};

use crate::feature::{Feature, FeatureTable};

pub const TEMPERATURE: &str = "temperature";
pub const LED: &str = "led";

pub fn temperature_feature() -> Feature {
    Feature::quantity(TEMPERATURE, "TEMP", Unit::DegC).read_only()
}

pub fn led_feature() -> Feature {
    Feature::boolean(LED, "LED")
}

/// The temperature-sensor sketch.
pub fn temperature_sensor() -> Result<FeatureTable, InoError> {
    FeatureTable::new(vec![temperature_feature()])
}

/// The LED sketch.
pub fn led_driver() -> Result<FeatureTable, InoError> {
    FeatureTable::new(vec![led_feature()])
}

/// A board flashed with both sketches merged, as served by the simulator.
pub fn combined_board() -> Result<FeatureTable, InoError> {
    FeatureTable::new(vec![temperature_feature(), led_feature()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Access;

    #[test]
    fn temperature_is_read_only_celsius() {
        let table = temperature_sensor().unwrap();
        let t = table.get(TEMPERATURE).unwrap();
        assert_eq!(t.access(), Access::ReadOnly);
        assert_eq!(t.unit(), Unit::DegC);
        assert_eq!(t.command(), "TEMP");
    }

    #[test]
    fn combined_board_has_both_features() {
        let table = combined_board().unwrap();
        assert!(table.get(TEMPERATURE).is_ok());
        assert!(table.get(LED).is_ok());
    }
}
