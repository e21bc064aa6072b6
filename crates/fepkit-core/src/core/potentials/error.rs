use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PotentialError {
    #[error("{term}: atom index {index} is out of range for a system of {n_atoms} atoms")]
    AtomIndexOutOfRange {
        term: &'static str,
        index: usize,
        n_atoms: usize,
    },

    #[error("{term}: {indices} index tuples but {params} parameter sets")]
    ParameterCountMismatch {
        term: &'static str,
        indices: usize,
        params: usize,
    },

    #[error("Cannot interpolate between {left} and {right}")]
    IncompatibleTerms {
        left: &'static str,
        right: &'static str,
    },

    #[error("{term}: end states have different topology ({detail})")]
    TopologyMismatch { term: &'static str, detail: String },

    #[error("Lambda must lie in [0, 1], got {0}")]
    InvalidLambda(f64),

    #[error("No {0} term is bound to this state")]
    MissingTerm(&'static str),

    #[error("Periodic box must be orthorhombic with positive edges for {term}")]
    InvalidBox { term: &'static str },
}
