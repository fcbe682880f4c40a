//! Configuration errors.
//!
//! These are the only failures that escape the indexer: without a valid unit
//! cell and space group no lattice table can be built, so nothing is searched.
//! Everything that goes wrong *during* a search is reported through
//! [`TrialStatus`](crate::indexer::TrialStatus) and [`StopReason`](crate::indexer::StopReason).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("no target unit cell was supplied")]
    MissingUnitCell,

    #[error("invalid unit cell {cell:?}: {reason}")]
    InvalidUnitCell { cell: [f64; 6], reason: String },

    #[error("no space group number was supplied")]
    MissingSpaceGroup,

    #[error("space group {0} is not a supported chiral space group")]
    UnsupportedSpaceGroup(u16),

    #[error("unit cell {cell:?} is not compatible with the {system} system of space group {space_group}")]
    IncompatibleCell {
        cell: [f64; 6],
        space_group: u16,
        system: &'static str,
    },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}
