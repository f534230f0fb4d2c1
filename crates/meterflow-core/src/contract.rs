//! Capability contracts for processing stages.
//!
//! Every stage declares a precondition contract (what must already hold for
//! a chunk before the stage can run) and a postcondition contract (what the
//! stage guarantees once it has run). Capabilities come from a closed
//! vocabulary, [`Capability`], and always carry a boolean value.
//!
//! Contracts built from untyped `(name, value)` pairs are validated against
//! [`CONTRACT_SCHEMA`] and fail exactly like [`Schema::validate`].

use std::fmt;
use std::sync::LazyLock;

use crate::schema::{Schema, SchemaError, TypeMismatchSnafu, UnknownCapabilitySnafu, Value, ValueKind};

/// The closed vocabulary of stage capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// Every gap in the recording is preceded and followed by a zero sample.
    GapsBookendedWithZeros,
    /// Gaps in the recording have been located.
    GapsLocated,
    /// Energy has been computed for the chunk.
    EnergyComputed,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 3] = [
        Capability::GapsBookendedWithZeros,
        Capability::GapsLocated,
        Capability::EnergyComputed,
    ];

    /// The snake_case name used in schemas and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::GapsBookendedWithZeros => "gaps_bookended_with_zeros",
            Capability::GapsLocated => "gaps_located",
            Capability::EnergyComputed => "energy_computed",
        }
    }

    /// Look up a capability by its snake_case name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|cap| cap.as_str() == name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema every contract must conform to: all capabilities are booleans.
pub static CONTRACT_SCHEMA: LazyLock<Schema> =
    LazyLock::new(|| Schema::new(Capability::ALL.map(|cap| (cap.as_str(), ValueKind::Bool))));

/// An ordered set of `capability = value` assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contract {
    conditions: Vec<(Capability, bool)>,
}

impl Contract {
    /// A contract asserting nothing.
    pub const fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Builder form of [`Contract::set`].
    pub fn with(mut self, capability: Capability, value: bool) -> Self {
        self.set(capability, value);
        self
    }

    /// Assert `capability = value`, replacing any earlier assertion for the
    /// same capability in place.
    pub fn set(&mut self, capability: Capability, value: bool) {
        match self
            .conditions
            .iter_mut()
            .find(|(existing, _)| *existing == capability)
        {
            Some(slot) => slot.1 = value,
            None => self.conditions.push((capability, value)),
        }
    }

    /// Build a contract from untyped conditions, validating them against
    /// [`CONTRACT_SCHEMA`].
    pub fn from_conditions<'a, I>(conditions: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let conditions: Vec<(&str, Value)> = conditions.into_iter().collect();
        CONTRACT_SCHEMA.validate(conditions.iter().map(|(name, value)| (*name, value)))?;

        let mut contract = Contract::new();
        for (name, value) in conditions {
            let capability = Capability::from_name(name).ok_or_else(|| {
                UnknownCapabilitySnafu { name }.build()
            })?;
            let flag = match value {
                Value::Bool(flag) => flag,
                other => {
                    return TypeMismatchSnafu {
                        name,
                        value: other.to_string(),
                        expected: ValueKind::Bool,
                        actual: other.kind(),
                    }
                    .fail();
                }
            };
            contract.set(capability, flag);
        }
        Ok(contract)
    }

    /// Value asserted for `capability`, if any.
    pub fn get(&self, capability: Capability) -> Option<bool> {
        self.conditions
            .iter()
            .find(|(existing, _)| *existing == capability)
            .map(|(_, value)| *value)
    }

    /// Assertions in declaration order.
    pub fn conditions(&self) -> impl Iterator<Item = (Capability, bool)> + '_ {
        self.conditions.iter().copied()
    }

    /// Number of assertions.
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// True when the contract asserts nothing.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Describe every assertion of `self` that `available` does not meet.
    ///
    /// One entry per unmet capability, in declaration order. An empty vector
    /// means `available` fully satisfies this contract.
    pub fn unsatisfied(&self, available: &Contract) -> Vec<String> {
        self.conditions
            .iter()
            .filter_map(|&(capability, required)| match available.get(capability) {
                None => Some(format!(
                    "Requires '{capability}={required}' but '{capability}' not in conditions."
                )),
                Some(actual) if actual != required => Some(format!(
                    "Requires '{capability}={required}' not '{capability}={actual}'."
                )),
                Some(_) => None,
            })
            .collect()
    }

    /// Overlay `other` onto `self`; values from `other` win.
    pub fn absorb(&mut self, other: &Contract) {
        for (capability, value) in other.conditions() {
            self.set(capability, value);
        }
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Contract {")?;
        for (i, (capability, value)) in self.conditions.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{capability}={value}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_from_conditions_is_validated() {
        Contract::from_conditions([("gaps_located", Value::from(true))]).expect("valid");
        Contract::from_conditions([("energy_computed", Value::from(true))]).expect("valid");

        let err = Contract::from_conditions([("energy_computed", Value::from("a"))])
            .expect_err("non-boolean value");
        assert!(matches!(err, SchemaError::TypeMismatch { .. }));

        let err = Contract::from_conditions([("blah", Value::from(1_i64))])
            .expect_err("unknown capability");
        assert!(matches!(err, SchemaError::UnknownCapability { .. }));
    }

    #[test]
    fn unsatisfied_reports_missing_capability_by_name() {
        let required = Contract::new()
            .with(Capability::GapsLocated, true)
            .with(Capability::EnergyComputed, true);
        let available = Contract::new().with(Capability::GapsLocated, true);

        let unmet = required.unsatisfied(&available);
        assert_eq!(unmet.len(), 1);
        assert!(unmet[0].contains("energy_computed"));
    }

    #[test]
    fn unsatisfied_counts_every_mismatch() {
        let required = Contract::new()
            .with(Capability::GapsLocated, true)
            .with(Capability::EnergyComputed, true);

        let available = Contract::new()
            .with(Capability::GapsLocated, true)
            .with(Capability::EnergyComputed, false);
        assert_eq!(required.unsatisfied(&available).len(), 1);

        let available = Contract::new()
            .with(Capability::GapsLocated, false)
            .with(Capability::EnergyComputed, false);
        let unmet = required.unsatisfied(&available);
        assert_eq!(unmet.len(), 2);
        assert!(unmet[0].contains("gaps_located"));
        assert!(unmet[1].contains("energy_computed"));

        assert_eq!(required.unsatisfied(&Contract::new()).len(), 2);

        let available = Contract::new()
            .with(Capability::EnergyComputed, true)
            .with(Capability::GapsLocated, true);
        assert!(required.unsatisfied(&available).is_empty());
    }

    #[test]
    fn absorb_overrides_in_place() {
        let mut contract = Contract::new()
            .with(Capability::GapsLocated, false)
            .with(Capability::EnergyComputed, true);
        contract.absorb(&Contract::new().with(Capability::GapsLocated, true));

        assert_eq!(contract.get(Capability::GapsLocated), Some(true));
        assert_eq!(contract.len(), 2);
        assert_eq!(
            contract.to_string(),
            "Contract {gaps_located=true, energy_computed=true}"
        );
    }

    #[test]
    fn schema_lists_whole_vocabulary() {
        let names: Vec<&str> = CONTRACT_SCHEMA.names().collect();
        assert_eq!(
            names,
            vec!["energy_computed", "gaps_bookended_with_zeros", "gaps_located"]
        );
    }
}
