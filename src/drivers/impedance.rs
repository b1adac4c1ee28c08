//! Voltage-divider impedance solve.
//!
//! Each channel is a divider: the excitation rail drives the unknown
//! electrode impedance in series with a known reference resistor, and the
//! ADC sees the voltage across the reference. Solving for the electrode:
//!
//! `Z = R_ref * (V_exc - V_meas) / V_meas`
//!
//! The result is always finite and non-negative; anything the equation
//! cannot express is reported as [`OPEN_CIRCUIT_OHMS`].

use log::warn;

use crate::types::OPEN_CIRCUIT_OHMS;

/// Below this the divider output is indistinguishable from an open lead.
pub const MIN_DIVIDER_VOLTS: f64 = 0.01;

pub fn compute(measured_v: f64, reference_ohms: f64, excitation_v: f64) -> f64 {
    if measured_v.is_nan() || measured_v <= MIN_DIVIDER_VOLTS || measured_v >= excitation_v {
        return OPEN_CIRCUIT_OHMS;
    }
    let impedance = reference_ohms * (excitation_v - measured_v) / measured_v;
    if !impedance.is_finite() || impedance < 0.0 {
        return OPEN_CIRCUIT_OHMS;
    }
    impedance.min(OPEN_CIRCUIT_OHMS)
}

/// Picks the divider drive voltage: the live rail reading when it is
/// plausible, otherwise the configured nominal value.
pub fn excitation_voltage(rail_v: Option<f64>, plausibility_floor_v: f64, nominal_v: f64) -> f64 {
    match rail_v {
        Some(v) if v.is_finite() && v > plausibility_floor_v => v,
        Some(v) => {
            warn!("rail reads {v:.3} V (floor {plausibility_floor_v:.2} V); using nominal {nominal_v:.2} V");
            nominal_v
        }
        None => nominal_v,
    }
}

/// Calibration resistor per channel, indexed directly by channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceTable {
    ohms: Vec<f64>,
}

impl ReferenceTable {
    /// Values are validated by the config loader before they get here.
    pub fn new(ohms: Vec<f64>) -> Self {
        Self { ohms }
    }

    pub fn get(&self, channel: usize) -> Option<f64> {
        self.ohms.get(channel).copied()
    }

    pub fn len(&self) -> usize {
        self.ohms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ohms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn midpoint_equals_reference() {
        assert!(close(compute(1.65, 10_000.0, 3.3), 10_000.0));
    }

    #[test]
    fn matches_divider_equation_across_valid_range() {
        let excitation = 3.3;
        for reference in [4_700.0, 9_950.0, 27_000.0] {
            for step in 1..330 {
                let measured = f64::from(step) * 0.01;
                if measured <= MIN_DIVIDER_VOLTS || measured >= excitation {
                    continue;
                }
                let z = compute(measured, reference, excitation);
                let expected = reference * (excitation - measured) / measured;
                assert!(z.is_finite() && z >= 0.0);
                assert!(close(z, expected.min(OPEN_CIRCUIT_OHMS)), "{measured} V");
            }
        }
    }

    #[test]
    fn degenerate_inputs_return_sentinel() {
        assert_eq!(compute(0.0, 10_000.0, 3.3), OPEN_CIRCUIT_OHMS);
        assert_eq!(compute(0.01, 10_000.0, 3.3), OPEN_CIRCUIT_OHMS);
        assert_eq!(compute(-0.5, 10_000.0, 3.3), OPEN_CIRCUIT_OHMS);
        assert_eq!(compute(3.3, 10_000.0, 3.3), OPEN_CIRCUIT_OHMS);
        assert_eq!(compute(4.0, 10_000.0, 3.3), OPEN_CIRCUIT_OHMS);
        assert_eq!(compute(f64::NAN, 10_000.0, 3.3), OPEN_CIRCUIT_OHMS);
    }

    #[test]
    fn just_above_floor_stays_finite() {
        let z = compute(0.0101, 10_000.0, 3.3);
        assert!(z.is_finite());
        assert!(z <= OPEN_CIRCUIT_OHMS);
    }

    #[test]
    fn implausible_rail_falls_back_to_nominal() {
        assert_eq!(excitation_voltage(Some(3.28), 2.5, 3.3), 3.28);
        assert_eq!(excitation_voltage(Some(2.5), 2.5, 3.3), 3.3);
        assert_eq!(excitation_voltage(Some(0.0), 2.5, 3.3), 3.3);
        assert_eq!(excitation_voltage(Some(f64::NAN), 2.5, 3.3), 3.3);
        assert_eq!(excitation_voltage(None, 2.5, 3.3), 3.3);
    }

    #[test]
    fn reference_table_indexes_by_channel() {
        let table = ReferenceTable::new(vec![9950.0, 9890.0]);
        assert_eq!(table.get(1), Some(9890.0));
        assert_eq!(table.get(2), None);
        assert_eq!(table.len(), 2);
    }
}
