//! The `mbam_core` crate drives model reduction with the Manifold Boundary
//! Approximation Method: it watches a geodesic for parameters running off to
//! zero or infinity, then rewrites the model so those limits can be taken.
//!
//! Key components:
//! - **Symbolic**: expression trees, parsing, simplification, solving and
//!   limits behind the `Algebra` trait.
//! - **Geodesic**: integrator sessions and online limit detection.
//! - **Reparameterize / Ftilde**: candidate reparameterizations from the
//!   template library and their inversion.
//! - **Singular**: the fallback procedure for limits that leave epsilon in
//!   the equations.
//! - **Iteration / Engine**: one reduction step and repeated steps.

pub mod algebra;
pub mod engine;
pub mod error;
pub mod ftilde;
pub mod geodesic;
pub mod iteration;
pub mod model;
pub mod reparameterize;
pub mod settings;
pub mod singular;
pub mod store;
pub mod symbolic;
pub mod template;

pub use algebra::{Algebra, Substitution, Symbolic};
pub use engine::{Engine, RunSummary, StepSummary};
pub use error::ReductionError;
pub use iteration::{Iteration, IterationRecord, StepState};
pub use model::{Model, ModelDocument};
pub use settings::ReductionSettings;
pub use store::{MemoryStore, Store, StoreError};
pub use template::{LimitMap, LimitType};
