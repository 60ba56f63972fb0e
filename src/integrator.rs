use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::error::SimError;
use crate::model::OdeModel;
use crate::trajectory::Trajectory;

pub trait Integrator: Sync {
    fn integrate<M: OdeModel + ?Sized>(
        &self,
        model: &M,
        y0: &[f64],
        pars: &[f64],
        stochastic: bool,
        tspan: &[f64],
        seed: u64,
    ) -> Result<Trajectory, SimError>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EulerMaruyama {
    pub noise_strength: f64,
    pub substeps: usize,
}

impl Default for EulerMaruyama {
    fn default() -> Self {
        Self {
            noise_strength: 1.0,
            substeps: 1,
        }
    }
}

impl EulerMaruyama {
    pub fn new(noise_strength: f64) -> Self {
        Self {
            noise_strength,
            ..Self::default()
        }
    }
}

impl Integrator for EulerMaruyama {
    fn integrate<M: OdeModel + ?Sized>(
        &self,
        model: &M,
        y0: &[f64],
        pars: &[f64],
        stochastic: bool,
        tspan: &[f64],
        seed: u64,
    ) -> Result<Trajectory, SimError> {
        let n_species = model.n_species();
        if y0.len() != n_species {
            return Err(SimError::Shape(format!(
                "initial condition length {} does not match number of species {}",
                y0.len(),
                n_species
            )));
        }
        if pars.len() != model.n_parameters() {
            return Err(SimError::Shape(format!(
                "parameter vector length {} does not match model parameter count {}",
                pars.len(),
                model.n_parameters()
            )));
        }
        if tspan.is_empty() {
            return Err(SimError::InvalidArgument("tspan must not be empty".into()));
        }
        if self.substeps == 0 {
            return Err(SimError::InvalidArgument("substeps must be positive".into()));
        }
        check_finite(y0, 0)?;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut trajectory = Trajectory::zeros(n_species, tspan.len());
        let mut state = y0.to_vec();
        let mut production = vec![0.0; n_species];
        let mut degradation = vec![0.0; n_species];
        trajectory.set_column(0, &state);

        for (interval, window) in tspan.windows(2).enumerate() {
            let time_index = interval + 1;
            let span = window[1] - window[0];
            if !(span > 0.0) {
                return Err(SimError::InvalidArgument(
                    "tspan must be strictly increasing".into(),
                ));
            }
            let dt = span / self.substeps as f64;
            let sqrt_dt = dt.sqrt();
            for _ in 0..self.substeps {
                model.propensities(&state, pars, &mut production, &mut degradation);
                for species in 0..n_species {
                    let p = production[species];
                    let d = degradation[species];
                    let mut next = state[species] + (p - d) * dt;
                    if stochastic {
                        let w1: f64 = rng.sample(StandardNormal);
                        let w2: f64 = rng.sample(StandardNormal);
                        next += self.noise_strength
                            * (p.max(0.0).sqrt() * w1 - d.max(0.0).sqrt() * w2)
                            * sqrt_dt;
                    }
                    // f64::max would swallow a NaN, so check before clamping.
                    if !next.is_finite() {
                        return Err(SimError::Numerical {
                            time_index,
                            species,
                        });
                    }
                    state[species] = next.max(0.0);
                }
            }
            trajectory.set_column(time_index, &state);
        }
        Ok(trajectory)
    }
}

fn check_finite(values: &[f64], time_index: usize) -> Result<(), SimError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(species) => Err(SimError::Numerical {
            time_index,
            species,
        }),
        None => Ok(()),
    }
}
