pub mod cluster;
pub mod driver;
pub mod error;
pub mod experiment;
pub mod initial;
pub mod integrator;
pub mod model;
pub mod perturbation;
pub mod trajectory;
pub mod worker;

#[cfg(feature = "python")]
mod python;

pub use driver::{RunOutput, Settings, start_perturbations, start_run};
pub use error::SimError;
pub use experiment::{CellTable, ExperimentResult, ExperimentSettings, run_experiment};
pub use initial::{IcsOverride, InitialConditions};
pub use integrator::{EulerMaruyama, Integrator};
pub use model::{ExpressionModel, GeneratedModel, ModelSpec, OdeModel};
pub use perturbation::{PerturbationArity, PerturbationOutcome};
pub use trajectory::Trajectory;
