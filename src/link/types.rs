//! Device-link type definitions
//!
//! Defines the core types for representing actuator angles, the shared
//! state blackboard, the client roster, and the connection lifecycle.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lower bound for servo angles, in degrees
pub const SERVO_MIN_DEG: f64 = 0.0;
/// Upper bound for servo angles, in degrees
pub const SERVO_MAX_DEG: f64 = 160.0;

/// Kind of actuator driven by the UnoQ controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    /// Positional servo, range-limited to [0, 160] degrees
    Servo,
    /// Stepper motor, unbounded angle (integer degrees)
    Stepper,
}

impl ActuatorKind {
    /// All actuator kinds
    pub fn all() -> &'static [ActuatorKind] {
        &[ActuatorKind::Servo, ActuatorKind::Stepper]
    }

    /// Convert to the wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            ActuatorKind::Servo => "servo",
            ActuatorKind::Stepper => "stepper",
        }
    }
}

impl std::fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ActuatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "servo" => Ok(ActuatorKind::Servo),
            "stepper" => Ok(ActuatorKind::Stepper),
            other => Err(format!("unknown actuator kind: {other}")),
        }
    }
}

/// Connection lifecycle of the device link
///
/// `Connecting` and `Disconnecting` are transient and always resolve to a
/// steady state (`Connected`/`Disconnected`) or fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// Convert to the wire/display tag
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared key-value blackboard mirrored from the controller
///
/// Replaced wholesale on a `state` message; patched on `stateDiff`
/// (null values delete keys). Local writes are proposals only — the
/// mirror changes on server confirmation.
pub type SharedState = serde_json::Map<String, Value>;

/// Per-kind ordered angle sequences, in integer degrees
///
/// Index validity is bounded by the controller's reported actuator count
/// (the length of each sequence). A `None` slot marks an angle that was
/// dropped during sanitization (transmitted as `null`, ignored by the
/// controller) or is not yet known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AngleSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servo: Vec<Option<i32>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stepper: Vec<Option<i32>>,
}

impl AngleSet {
    /// Angle slots for one actuator kind
    pub fn kind(&self, kind: ActuatorKind) -> &[Option<i32>] {
        match kind {
            ActuatorKind::Servo => &self.servo,
            ActuatorKind::Stepper => &self.stepper,
        }
    }

    /// Mutable angle slots for one actuator kind
    pub fn kind_mut(&mut self, kind: ActuatorKind) -> &mut Vec<Option<i32>> {
        match kind {
            ActuatorKind::Servo => &mut self.servo,
            ActuatorKind::Stepper => &mut self.stepper,
        }
    }

    /// Last known angle for one actuator, if any
    pub fn get(&self, kind: ActuatorKind, index: usize) -> Option<i32> {
        self.kind(kind).get(index).copied().flatten()
    }

    /// Number of actuators reported for a kind
    pub fn count(&self, kind: ActuatorKind) -> usize {
        self.kind(kind).len()
    }

    /// True when no actuator of any kind is known
    pub fn is_empty(&self) -> bool {
        self.servo.is_empty() && self.stepper.is_empty()
    }
}

/// Unsanitized angle request, as supplied by callers of `set_angles`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAngleSet {
    #[serde(default)]
    pub servo: Vec<f64>,
    #[serde(default)]
    pub stepper: Vec<f64>,
}

impl RawAngleSet {
    /// Sanitize every entry for transmission
    ///
    /// Non-finite values become `None` (wire `null`, dropped by the
    /// controller); servo angles are clamped to [0, 160]; all angles
    /// round to the nearest integer degree.
    pub fn sanitize(&self) -> AngleSet {
        AngleSet {
            servo: self
                .servo
                .iter()
                .map(|a| sanitize_angle(ActuatorKind::Servo, *a))
                .collect(),
            stepper: self
                .stepper
                .iter()
                .map(|a| sanitize_angle(ActuatorKind::Stepper, *a))
                .collect(),
        }
    }
}

/// Sanitize one angle for transmission
///
/// Returns `None` for NaN/infinite input. Servo angles clamp to
/// [0, 160]; both kinds round to the nearest integer degree.
pub fn sanitize_angle(kind: ActuatorKind, angle: f64) -> Option<i32> {
    if !angle.is_finite() {
        return None;
    }
    let bounded = match kind {
        ActuatorKind::Servo => angle.clamp(SERVO_MIN_DEG, SERVO_MAX_DEG),
        ActuatorKind::Stepper => angle,
    };
    Some(bounded.round() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_servo_clamp() {
        assert_eq!(sanitize_angle(ActuatorKind::Servo, 999.0), Some(160));
        assert_eq!(sanitize_angle(ActuatorKind::Servo, -5.0), Some(0));
        assert_eq!(sanitize_angle(ActuatorKind::Servo, 90.4), Some(90));
    }

    #[test]
    fn test_stepper_unbounded() {
        assert_eq!(sanitize_angle(ActuatorKind::Stepper, 999.6), Some(1000));
        assert_eq!(sanitize_angle(ActuatorKind::Stepper, -720.0), Some(-720));
    }

    #[test]
    fn test_non_finite_dropped() {
        assert_eq!(sanitize_angle(ActuatorKind::Servo, f64::NAN), None);
        assert_eq!(sanitize_angle(ActuatorKind::Stepper, f64::INFINITY), None);
        assert_eq!(sanitize_angle(ActuatorKind::Stepper, f64::NEG_INFINITY), None);
    }

    #[test]
    fn test_raw_set_sanitize() {
        let raw = RawAngleSet {
            servo: vec![999.0, f64::NAN, 45.2],
            stepper: vec![-10.7],
        };
        let set = raw.sanitize();
        assert_eq!(set.servo, vec![Some(160), None, Some(45)]);
        assert_eq!(set.stepper, vec![Some(-11)]);
    }

    #[test]
    fn test_angle_set_accessors() {
        let mut set = AngleSet::default();
        set.kind_mut(ActuatorKind::Servo).extend([Some(10), None]);
        assert_eq!(set.count(ActuatorKind::Servo), 2);
        assert_eq!(set.get(ActuatorKind::Servo, 0), Some(10));
        assert_eq!(set.get(ActuatorKind::Servo, 1), None);
        assert_eq!(set.get(ActuatorKind::Servo, 5), None);
        assert_eq!(set.count(ActuatorKind::Stepper), 0);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("servo".parse::<ActuatorKind>(), Ok(ActuatorKind::Servo));
        assert_eq!("stepper".parse::<ActuatorKind>(), Ok(ActuatorKind::Stepper));
        assert!("dc-motor".parse::<ActuatorKind>().is_err());
    }

    proptest! {
        #[test]
        fn prop_servo_always_in_range(angle in proptest::num::f64::ANY) {
            if let Some(deg) = sanitize_angle(ActuatorKind::Servo, angle) {
                prop_assert!((0..=160).contains(&deg));
            }
        }

        #[test]
        fn prop_finite_input_always_kept(angle in -1_000_000.0f64..1_000_000.0) {
            prop_assert!(sanitize_angle(ActuatorKind::Stepper, angle).is_some());
            let rounded = sanitize_angle(ActuatorKind::Stepper, angle).unwrap();
            prop_assert!((f64::from(rounded) - angle).abs() <= 0.5);
        }
    }
}
