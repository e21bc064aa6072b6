//! A small deterministic MD engine: BAOAB Langevin dynamics, an isotropic
//! Monte-Carlo barostat, and a [`context::Context`] that binds them to a set of
//! potentials.

pub mod barostat;
pub mod context;
pub mod integrator;

pub use barostat::MonteCarloBarostat;
pub use context::Context;
pub use integrator::LangevinIntegrator;

use super::potentials::PotentialError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MdError {
    #[error("Potential evaluation failed: {source}")]
    Potential {
        #[from]
        source: PotentialError,
    },

    #[error("{what} has {found} entries but the system has {n_atoms} atoms")]
    AtomCountMismatch {
        what: &'static str,
        found: usize,
        n_atoms: usize,
    },

    #[error("Invalid value for '{name}': {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("Barostat group references atom {index} but the system has {n_atoms} atoms")]
    GroupIndexOutOfRange { index: usize, n_atoms: usize },
}
