use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::SimError;
use crate::experiment::{ExperimentResult, ExperimentSettings, run_experiment};
use crate::initial::InitialConditions;
use crate::integrator::Integrator;
use crate::model::{GENE_PREFIX, ModelSpec, OdeModel};
use crate::trajectory::Trajectory;

pub const DEFAULT_PERTURBATION_LEVEL: f64 = 2.0;
pub const PERTURBATION_SEED: u64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PerturbationArity {
    Single,
    Pairs,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PerturbationRun {
    pub genes: Vec<usize>,
    pub outprefix: PathBuf,
    pub result: ExperimentResult,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PerturbationOutcome {
    pub gene_ids: Vec<usize>,
    pub runs: Vec<PerturbationRun>,
    pub final_states: BTreeMap<String, Vec<Vec<f64>>>,
    pub avg_trajs: BTreeMap<PathBuf, Trajectory>,
}

pub fn gene_ids(spec: &ModelSpec) -> Result<Vec<usize>, SimError> {
    let prefix = format!("{GENE_PREFIX}g");
    spec.varmapper
        .iter()
        .filter(|name| name.starts_with(GENE_PREFIX))
        .map(|name| {
            name.strip_prefix(prefix.as_str())
                .and_then(|digits| digits.parse::<usize>().ok())
                .ok_or_else(|| {
                    SimError::InvalidArgument(format!(
                        "gene variable {name} does not follow the {prefix}<id> convention"
                    ))
                })
        })
        .collect()
}

pub fn perturbation_combinations(gene_ids: &[usize], arity: PerturbationArity) -> Vec<Vec<usize>> {
    match arity {
        PerturbationArity::Single => gene_ids.iter().map(|&g| vec![g]).collect(),
        PerturbationArity::Pairs => gene_ids
            .iter()
            .enumerate()
            .flat_map(|(i, &first)| {
                gene_ids[i + 1..]
                    .iter()
                    .map(move |&second| vec![first, second])
            })
            .collect(),
    }
}

pub fn decay_parameter_name(gene: usize) -> String {
    format!("m_g{gene}")
}

pub fn combination_label(genes: &[usize]) -> String {
    let parts: Vec<String> = genes.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

fn combination_suffix(genes: &[usize]) -> String {
    let parts: Vec<String> = genes.iter().map(ToString::to_string).collect();
    format!("Perturbation_{}", parts.join("_"))
}

pub fn perturbation_outprefix(base: &Path, genes: &[usize]) -> PathBuf {
    base.join(combination_suffix(genes))
}

fn dynamics_plot_path(base: &Path, genes: &[usize]) -> PathBuf {
    base.join("dynamics")
        .join(format!("{}.png", combination_suffix(genes)))
}

pub fn apply_perturbation(spec: &mut ModelSpec, genes: &[usize], level: f64) {
    for &gene in genes {
        let name = decay_parameter_name(gene);
        match spec.pars.get_mut(&name) {
            Some(value) => {
                let before = *value;
                *value *= level;
                debug!(parameter = %name, before, after = *value, "perturbed parameter");
            }
            None => warn!(parameter = %name, "no such parameter, gene left unperturbed"),
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn start_perturbations<M, I>(
    spec: &mut ModelSpec,
    model: &M,
    integrator: &I,
    tspan: &[f64],
    settings: &ExperimentSettings,
    previous_final_states: &[Vec<f64>],
    level: f64,
    arity: PerturbationArity,
) -> Result<PerturbationOutcome, SimError>
where
    M: OdeModel + ?Sized,
    I: Integrator,
{
    let gene_ids = gene_ids(spec)?;
    let combinations = perturbation_combinations(&gene_ids, arity);
    info!(count = combinations.len(), ?arity, "starting perturbations");

    let baseline = match arity {
        PerturbationArity::Single => vec![0],
        PerturbationArity::Pairs => vec![0, 0],
    };
    let mut final_states = BTreeMap::new();
    final_states.insert(combination_label(&baseline), previous_final_states.to_vec());
    let mut avg_trajs = BTreeMap::new();
    let mut runs = Vec::with_capacity(combinations.len());
    let ics = InitialConditions::PerCell(previous_final_states.to_vec());
    let base_outprefix = settings.outprefix.clone();

    for genes in combinations {
        let original = spec.pars.clone();
        apply_perturbation(spec, &genes, level);

        let run_settings = ExperimentSettings {
            outprefix: perturbation_outprefix(&base_outprefix, &genes),
            ..settings.clone()
        };
        info!(
            genes = %combination_label(&genes),
            outprefix = %run_settings.outprefix.display(),
            "running perturbation"
        );
        let result = run_experiment(
            spec,
            model,
            integrator,
            tspan,
            &run_settings,
            &ics,
            PERTURBATION_SEED,
        );
        // Restored before `?` so an error never leaves parameters scaled.
        spec.pars = original;
        let result = result?;

        final_states.insert(combination_label(&genes), result.final_states.clone());
        avg_trajs.insert(
            dynamics_plot_path(&base_outprefix, &genes),
            result.avg_traj.clone(),
        );
        runs.push(PerturbationRun {
            genes,
            outprefix: run_settings.outprefix,
            result,
        });
    }

    Ok(PerturbationOutcome {
        gene_ids,
        runs,
        final_states,
        avg_trajs,
    })
}
