use taffy::style::AvailableSpace;

/// Tolerance used when comparing sizes coming out of the layout engine.
const DELTA: f32 = 0.5;

/// A measurement constraint along one axis.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SizeSpec {
    /// The node must be exactly this size.
    Exactly(f32),
    /// The node may be as large as it wants up to this size.
    AtMost(f32),
    /// No constraint.
    Unspecified,
}

impl SizeSpec {
    /// Folds the engine's known dimension and available space into one spec.
    pub fn from_engine(known: Option<f32>, available: AvailableSpace) -> Self {
        if let Some(v) = known {
            return SizeSpec::Exactly(v);
        }
        match available {
            AvailableSpace::Definite(v) => SizeSpec::AtMost(v),
            AvailableSpace::MinContent | AvailableSpace::MaxContent => SizeSpec::Unspecified,
        }
    }

    pub fn to_available_space(self) -> AvailableSpace {
        match self {
            SizeSpec::Exactly(v) | SizeSpec::AtMost(v) => AvailableSpace::Definite(v),
            SizeSpec::Unspecified => AvailableSpace::MaxContent,
        }
    }

    pub fn size(self) -> Option<f32> {
        match self {
            SizeSpec::Exactly(v) | SizeSpec::AtMost(v) => Some(v),
            SizeSpec::Unspecified => None,
        }
    }

    /// Applies this spec to a size a measure function asked for.
    pub fn resolve(self, desired: f32) -> f32 {
        match self {
            SizeSpec::Exactly(v) => v,
            SizeSpec::AtMost(v) => desired.min(v),
            SizeSpec::Unspecified => desired,
        }
    }

    /// Whether a measurement taken under `old` (yielding `old_measured`) is
    /// still valid under `new`.
    pub fn is_compatible(old: SizeSpec, new: SizeSpec, old_measured: f32) -> bool {
        if old.same_as(new) {
            return true;
        }
        match (old, new) {
            (_, SizeSpec::Exactly(n)) => (n - old_measured).abs() < DELTA,
            (SizeSpec::Unspecified, SizeSpec::AtMost(n)) => n >= old_measured,
            (SizeSpec::AtMost(o), SizeSpec::AtMost(n)) => o > n && old_measured <= n,
            _ => false,
        }
    }

    fn same_as(self, other: SizeSpec) -> bool {
        match (self, other) {
            (SizeSpec::Exactly(a), SizeSpec::Exactly(b))
            | (SizeSpec::AtMost(a), SizeSpec::AtMost(b)) => (a - b).abs() < DELTA,
            (SizeSpec::Unspecified, SizeSpec::Unspecified) => true,
            _ => false,
        }
    }

    /// Exact, hashable identity of a spec (no tolerance).
    pub(crate) fn cache_key(self) -> (u8, u32) {
        match self {
            SizeSpec::Exactly(v) => (0, v.to_bits()),
            SizeSpec::AtMost(v) => (1, v.to_bits()),
            SizeSpec::Unspecified => (2, 0),
        }
    }
}

impl std::fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeSpec::Exactly(v) => write!(f, "EXACTLY {v}"),
            SizeSpec::AtMost(v) => write!(f, "AT_MOST {v}"),
            SizeSpec::Unspecified => write!(f, "UNSPECIFIED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_spec_is_compatible() {
        assert!(SizeSpec::is_compatible(
            SizeSpec::AtMost(100.0),
            SizeSpec::AtMost(100.2),
            40.0
        ));
        assert!(SizeSpec::is_compatible(
            SizeSpec::Unspecified,
            SizeSpec::Unspecified,
            40.0
        ));
    }

    #[test]
    fn exact_spec_matches_previous_measurement() {
        assert!(SizeSpec::is_compatible(
            SizeSpec::AtMost(100.0),
            SizeSpec::Exactly(40.0),
            40.0
        ));
        assert!(!SizeSpec::is_compatible(
            SizeSpec::AtMost(100.0),
            SizeSpec::Exactly(50.0),
            40.0
        ));
    }

    #[test]
    fn at_most_accepts_unspecified_measurement_that_fits() {
        assert!(SizeSpec::is_compatible(
            SizeSpec::Unspecified,
            SizeSpec::AtMost(80.0),
            40.0
        ));
        assert!(!SizeSpec::is_compatible(
            SizeSpec::Unspecified,
            SizeSpec::AtMost(30.0),
            40.0
        ));
    }

    #[test]
    fn stricter_at_most_only_when_measurement_fits() {
        assert!(SizeSpec::is_compatible(
            SizeSpec::AtMost(100.0),
            SizeSpec::AtMost(60.0),
            40.0
        ));
        // A looser bound may let the content grow.
        assert!(!SizeSpec::is_compatible(
            SizeSpec::AtMost(60.0),
            SizeSpec::AtMost(100.0),
            40.0
        ));
    }

    #[test]
    fn engine_constraints_fold_into_specs() {
        assert_eq!(
            SizeSpec::from_engine(Some(10.0), AvailableSpace::Definite(50.0)),
            SizeSpec::Exactly(10.0)
        );
        assert_eq!(
            SizeSpec::from_engine(None, AvailableSpace::Definite(50.0)),
            SizeSpec::AtMost(50.0)
        );
        assert_eq!(
            SizeSpec::from_engine(None, AvailableSpace::MaxContent),
            SizeSpec::Unspecified
        );
        assert_eq!(SizeSpec::AtMost(20.0).resolve(35.0), 20.0);
        assert_eq!(SizeSpec::Exactly(20.0).resolve(5.0), 20.0);
    }
}
