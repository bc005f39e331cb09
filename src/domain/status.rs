//! Fit status taxonomy.
//!
//! Every output record carries exactly one of these codes. The integer values
//! are part of the archived data format and must never be renumbered.
//!
//! Code 12 has two meanings: too few distinct angular bins before the fit,
//! and a degenerate (too narrow) fitted thermal speed afterwards. Both are
//! kept on the same code so existing archives stay comparable.

use crate::error::AppError;

/// A status column value: the detailed `FitStatus` or the archived
/// `ArchivalStatus`. Fit tables are read, written and summarised through this.
pub trait TableStatus: Copy + Ord + std::fmt::Debug + TryFrom<i64, Error = AppError> {
    fn code(self) -> i64;
    fn message(self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FitStatus {
    /// Fit succeeded with magnetic field context.
    Success,
    /// Fit succeeded, but no magnetic field data were available.
    NoMagneticField,
    /// Magnetic field too variable for a reliable fit. Part of the
    /// taxonomy; the driver itself never emits it.
    FieldUnstable,
    /// Fitted bulk velocity lies outside the sampled velocity range.
    BulkVelocityOutOfBounds,
    /// Too few samples left after velocity truncation.
    InsufficientPoints,
    /// The least-squares solver did not converge.
    LeastSquaresFailed,
    /// The 1-D fit saw more than one distribution, or counts were negative.
    AmbiguousDistribution,
    /// The proton peak is not covered by the 3-D distribution.
    ProtonPeakMissing,
    /// Fitted amplitude is far from the observed peak density.
    UnrealisticDensity,
    /// Fewer than 3 distinct azimuth/elevation bins, or a fitted thermal
    /// speed below the minimum.
    InsufficientAngularBins,
    /// Temperature physically unrealistic. Reserved for archival data.
    UnrealisticTemperature,
}

impl FitStatus {
    pub const ALL: [FitStatus; 11] = [
        FitStatus::Success,
        FitStatus::NoMagneticField,
        FitStatus::FieldUnstable,
        FitStatus::BulkVelocityOutOfBounds,
        FitStatus::InsufficientPoints,
        FitStatus::LeastSquaresFailed,
        FitStatus::AmbiguousDistribution,
        FitStatus::ProtonPeakMissing,
        FitStatus::UnrealisticDensity,
        FitStatus::InsufficientAngularBins,
        FitStatus::UnrealisticTemperature,
    ];

    /// Integer code used in output tables.
    pub fn code(self) -> i64 {
        match self {
            FitStatus::Success => 1,
            FitStatus::NoMagneticField => 2,
            FitStatus::FieldUnstable => 3,
            FitStatus::BulkVelocityOutOfBounds => 4,
            FitStatus::InsufficientPoints => 5,
            FitStatus::LeastSquaresFailed => 6,
            FitStatus::AmbiguousDistribution => 9,
            FitStatus::ProtonPeakMissing => 10,
            FitStatus::UnrealisticDensity => 11,
            FitStatus::InsufficientAngularBins => 12,
            FitStatus::UnrealisticTemperature => 13,
        }
    }

    /// Human-readable explanation of the code.
    pub fn message(self) -> &'static str {
        match self {
            FitStatus::Success => "Fitting successful",
            FitStatus::NoMagneticField => "No magnetic field data available",
            FitStatus::FieldUnstable => "Magnetic field varies too much for a reliable fit",
            FitStatus::BulkVelocityOutOfBounds => {
                "Fitted bulk velocity outside distribution velocity bounds"
            }
            FitStatus::InsufficientPoints => "Less than 7 points available for fitting",
            FitStatus::LeastSquaresFailed => "Least square fitting failed",
            FitStatus::AmbiguousDistribution => "Think there is more than one distribution in file",
            FitStatus::ProtonPeakMissing => "Proton peak not present in 3D distribution",
            FitStatus::UnrealisticDensity => "Number density physically unrealistic",
            FitStatus::InsufficientAngularBins => {
                "Less than 3 angular bins available in either direction, or fitted thermal speed too small"
            }
            FitStatus::UnrealisticTemperature => "Temperature physically unrealistic",
        }
    }

    /// Collapse a detailed code into the three-way archival scheme:
    /// unstable-field fits still carry velocities and count as fitted, every
    /// other failure becomes `Failed`.
    pub fn archival(self) -> ArchivalStatus {
        match self {
            FitStatus::Success | FitStatus::FieldUnstable => ArchivalStatus::Fitted,
            FitStatus::NoMagneticField => ArchivalStatus::NoField,
            _ => ArchivalStatus::Failed,
        }
    }
}

impl TableStatus for FitStatus {
    fn code(self) -> i64 {
        FitStatus::code(self)
    }

    fn message(self) -> &'static str {
        FitStatus::message(self)
    }
}

impl TryFrom<i64> for FitStatus {
    type Error = AppError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        FitStatus::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or_else(|| AppError::input(format!("Unknown fit status code: {code}")))
    }
}

impl std::fmt::Display for FitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Status codes of an archived fit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArchivalStatus {
    /// Fit with magnetic field context (1).
    Fitted,
    /// Fit without magnetic field data (2).
    NoField,
    /// Any rejected distribution (3).
    Failed,
}

impl ArchivalStatus {
    pub const ALL: [ArchivalStatus; 3] = [ArchivalStatus::Fitted, ArchivalStatus::NoField, ArchivalStatus::Failed];

    pub fn code(self) -> i64 {
        match self {
            ArchivalStatus::Fitted => 1,
            ArchivalStatus::NoField => 2,
            ArchivalStatus::Failed => 3,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ArchivalStatus::Fitted => "Fitting successful",
            ArchivalStatus::NoField => "No magnetic field data available",
            ArchivalStatus::Failed => "Fit failed",
        }
    }
}

impl TableStatus for ArchivalStatus {
    fn code(self) -> i64 {
        ArchivalStatus::code(self)
    }

    fn message(self) -> &'static str {
        ArchivalStatus::message(self)
    }
}

impl TryFrom<i64> for ArchivalStatus {
    type Error = AppError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        ArchivalStatus::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or_else(|| AppError::input(format!("Unknown archival status code: {code}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique_and_round_trip() {
        let mut codes: Vec<i64> = FitStatus::ALL.iter().map(|s| s.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), FitStatus::ALL.len());

        for status in FitStatus::ALL {
            assert_eq!(FitStatus::try_from(status.code()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(FitStatus::try_from(7).is_err());
        assert!(FitStatus::try_from(0).is_err());
    }

    #[test]
    fn archival_collapses_failures_to_three() {
        assert_eq!(FitStatus::FieldUnstable.archival(), ArchivalStatus::Fitted);
        assert_eq!(FitStatus::Success.archival().code(), 1);
        assert_eq!(FitStatus::NoMagneticField.archival().code(), 2);
        assert_eq!(FitStatus::ProtonPeakMissing.archival(), ArchivalStatus::Failed);
        assert_eq!(FitStatus::UnrealisticTemperature.archival().code(), 3);
    }

    #[test]
    fn archived_code_three_means_failed_fit() {
        let failed = ArchivalStatus::try_from(3).unwrap();
        assert_eq!(failed, ArchivalStatus::Failed);
        assert_eq!(failed.message(), "Fit failed");
        assert_ne!(failed.message(), FitStatus::FieldUnstable.message());
        assert!(ArchivalStatus::try_from(4).is_err());
    }

    #[test]
    fn every_status_has_a_message() {
        for status in FitStatus::ALL {
            assert!(!status.message().is_empty());
        }
    }
}
