//! ABO/Rh blood types and the static compatibility table.
//!
//! This is the single source of truth for transfusion compatibility. Both
//! directions of the relation are encoded as consts so lookups are free and
//! provably total:
//!
//! * [`BloodType::compatible_recipients`] — who a donor of this type may give to.
//! * [`BloodType::compatible_donor_types`] — who may give to a recipient of
//!   this type (the inverse relation, the one the matching engine uses).

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};

/// The eight ABO/Rh blood types. Closed set; every entity column holding a
/// blood type must parse into one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BloodType {
    #[serde(rename = "A+")]
    APos,
    #[serde(rename = "A-")]
    ANeg,
    #[serde(rename = "B+")]
    BPos,
    #[serde(rename = "B-")]
    BNeg,
    #[serde(rename = "AB+")]
    AbPos,
    #[serde(rename = "AB-")]
    AbNeg,
    #[serde(rename = "O+")]
    OPos,
    #[serde(rename = "O-")]
    ONeg,
}

/// All eight types, in the order used for per-type summaries.
pub const ALL_BLOOD_TYPES: [BloodType; 8] = [
    BloodType::APos,
    BloodType::ANeg,
    BloodType::BPos,
    BloodType::BNeg,
    BloodType::AbPos,
    BloodType::AbNeg,
    BloodType::OPos,
    BloodType::ONeg,
];

/// How a donor relates to the matching pool at large.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DonorCategory {
    #[serde(rename = "Universal Donor")]
    UniversalDonor,
    #[serde(rename = "Universal Recipient")]
    UniversalRecipient,
    Standard,
}

impl BloodType {
    /// Storage / display form, e.g. `"AB-"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::APos => "A+",
            Self::ANeg => "A-",
            Self::BPos => "B+",
            Self::BNeg => "B-",
            Self::AbPos => "AB+",
            Self::AbNeg => "AB-",
            Self::OPos => "O+",
            Self::ONeg => "O-",
        }
    }

    /// Strict parse of the canonical form. Anything else is rejected before a
    /// query ever runs.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "A+" => Ok(Self::APos),
            "A-" => Ok(Self::ANeg),
            "B+" => Ok(Self::BPos),
            "B-" => Ok(Self::BNeg),
            "AB+" => Ok(Self::AbPos),
            "AB-" => Ok(Self::AbNeg),
            "O+" => Ok(Self::OPos),
            "O-" => Ok(Self::ONeg),
            other => Err(EngineError::InvalidBloodType(other.to_string())),
        }
    }

    /// Recipient types a donor of this type may give to (forward relation).
    pub fn compatible_recipients(&self) -> &'static [BloodType] {
        use BloodType::*;
        match self {
            ONeg => &ALL_BLOOD_TYPES,
            OPos => &[OPos, APos, BPos, AbPos],
            ANeg => &[ANeg, APos, AbNeg, AbPos],
            APos => &[APos, AbPos],
            BNeg => &[BNeg, BPos, AbNeg, AbPos],
            BPos => &[BPos, AbPos],
            AbNeg => &[AbNeg, AbPos],
            AbPos => &[AbPos],
        }
    }

    /// Donor types acceptable for a recipient of this type (inverse relation).
    pub fn compatible_donor_types(&self) -> &'static [BloodType] {
        use BloodType::*;
        match self {
            ONeg => &[ONeg],
            OPos => &[ONeg, OPos],
            ANeg => &[ONeg, ANeg],
            APos => &[ONeg, OPos, ANeg, APos],
            BNeg => &[ONeg, BNeg],
            BPos => &[ONeg, OPos, BNeg, BPos],
            AbNeg => &[ONeg, ANeg, BNeg, AbNeg],
            AbPos => &ALL_BLOOD_TYPES,
        }
    }

    /// Whether blood of type `self` may be transfused into `recipient`.
    pub fn can_donate_to(&self, recipient: BloodType) -> bool {
        self.compatible_recipients().contains(&recipient)
    }

    pub fn category(&self) -> DonorCategory {
        match self {
            Self::ONeg => DonorCategory::UniversalDonor,
            Self::AbPos => DonorCategory::UniversalRecipient,
            _ => DonorCategory::Standard,
        }
    }
}

impl std::fmt::Display for BloodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_total_and_self_compatible() {
        for ty in ALL_BLOOD_TYPES {
            let donors = ty.compatible_donor_types();
            assert!(!donors.is_empty(), "{ty} has no compatible donors");
            assert!(donors.contains(&ty), "{ty} is not self-compatible");
        }
    }

    #[test]
    fn o_neg_donates_to_everyone() {
        for ty in ALL_BLOOD_TYPES {
            assert!(
                ty.compatible_donor_types().contains(&BloodType::ONeg),
                "O- missing from donors for {ty}"
            );
        }
        assert_eq!(BloodType::ONeg.compatible_recipients().len(), 8);
    }

    #[test]
    fn ab_pos_receives_from_everyone_and_donates_only_to_itself() {
        assert_eq!(BloodType::AbPos.compatible_donor_types().len(), 8);
        for ty in ALL_BLOOD_TYPES {
            if ty != BloodType::AbPos {
                assert!(!BloodType::AbPos.can_donate_to(ty));
            }
        }
    }

    #[test]
    fn relations_are_inverses_of_each_other() {
        for donor in ALL_BLOOD_TYPES {
            for recipient in ALL_BLOOD_TYPES {
                let forward = donor.can_donate_to(recipient);
                let inverse = recipient.compatible_donor_types().contains(&donor);
                assert_eq!(forward, inverse, "{donor} -> {recipient} mismatch");
            }
        }
    }

    #[test]
    fn rh_negative_never_receives_from_rh_positive() {
        use BloodType::*;
        for recipient in [ANeg, BNeg, AbNeg, ONeg] {
            for donor in recipient.compatible_donor_types() {
                assert!(
                    donor.as_str().ends_with('-'),
                    "Rh+ donor {donor} listed for Rh- recipient {recipient}"
                );
            }
        }
    }

    #[test]
    fn parse_round_trips_and_rejects_garbage() {
        for ty in ALL_BLOOD_TYPES {
            assert_eq!(BloodType::parse(ty.as_str()).unwrap(), ty);
        }
        assert!(BloodType::parse("C+").is_err());
        assert!(BloodType::parse("a+").is_err());
        assert!(BloodType::parse("").is_err());
    }

    #[test]
    fn categories() {
        assert_eq!(BloodType::ONeg.category(), DonorCategory::UniversalDonor);
        assert_eq!(BloodType::AbPos.category(), DonorCategory::UniversalRecipient);
        assert_eq!(BloodType::APos.category(), DonorCategory::Standard);
    }
}
