use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::SimError;
use crate::initial::adjust_initial_condition;
use crate::integrator::Integrator;
use crate::model::{ModelSpec, OdeModel};
use crate::trajectory::Trajectory;

pub const SEED_STRIDE: u64 = 1000;
pub const REJECTION_FRACTION: f64 = 0.1;

pub struct SharedRun<'a, M: ?Sized, I> {
    pub spec: &'a ModelSpec,
    pub model: &'a M,
    pub integrator: &'a I,
    pub pars: Vec<f64>,
    pub tspan: &'a [f64],
    pub gene_rows: Vec<usize>,
    pub sample_rows: Vec<usize>,
    pub simulations_dir: PathBuf,
    pub x_max: f64,
    pub adjust_initial: bool,
    pub stochastic: bool,
    pub max_attempts: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellTask {
    pub cell_id: usize,
    pub seed: u64,
    pub initial: Vec<f64>,
    pub sample_time: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SampledCell {
    pub time_index: usize,
    pub values: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellOutcome {
    pub cell_id: usize,
    pub final_state: Vec<f64>,
    pub trajectory: Trajectory,
    pub sample: Option<SampledCell>,
    pub attempts: usize,
    pub seed: u64,
}

pub fn cell_label(cell_id: usize) -> String {
    format!("E{cell_id}")
}

pub fn trajectory_path(simulations_dir: &Path, cell_id: usize) -> PathBuf {
    simulations_dir.join(format!("E{cell_id}.csv"))
}

pub fn sample_path(simulations_dir: &Path, cell_id: usize) -> PathBuf {
    simulations_dir.join(format!("E{cell_id}-cell.csv"))
}

pub fn is_degenerate(genes: &Trajectory, x_max: f64) -> bool {
    if genes.n_species() == 0 {
        return false;
    }
    let threshold = REJECTION_FRACTION * x_max;
    (0..genes.n_times()).any(|t| {
        let column_max = (0..genes.n_species())
            .map(|s| genes.get(s, t))
            .fold(f64::NEG_INFINITY, f64::max);
        column_max < threshold
    })
}

pub fn simulate_and_sample<M, I>(
    shared: &SharedRun<'_, M, I>,
    task: &CellTask,
) -> Result<CellOutcome, SimError>
where
    M: OdeModel + ?Sized,
    I: Integrator,
{
    let n_times = shared.tspan.len();
    let named_genes = shared.spec.named_gene_rows();
    let label = cell_label(task.cell_id);
    let headers: Vec<String> = (1..n_times).map(|t| format!("{label}_{t}")).collect();

    let mut seed = task.seed;
    let mut attempts = 0usize;
    loop {
        if attempts >= shared.max_attempts {
            return Err(SimError::NoConvergence {
                cell: task.cell_id,
                attempts,
            });
        }
        // Advanced before every attempt, including the first.
        seed = seed.wrapping_add(SEED_STRIDE);
        attempts += 1;

        let y0 = if shared.adjust_initial {
            adjust_initial_condition(shared.spec, &task.initial)
        } else {
            task.initial.clone()
        };
        let full = shared
            .integrator
            .integrate(
                shared.model,
                &y0,
                &shared.pars,
                shared.stochastic,
                shared.tspan,
                seed,
            )
            .inspect_err(|err| warn!(cell = task.cell_id, seed, %err, "integration failed"))?;
        if full.n_times() != n_times || full.n_species() != shared.spec.n_species() {
            return Err(SimError::Shape(format!(
                "integrator returned a {}x{} trajectory, expected {}x{}",
                full.n_species(),
                full.n_times(),
                shared.spec.n_species(),
                n_times
            )));
        }
        let trajectory = full.after_start();
        let genes = trajectory.select(&shared.gene_rows, 0..trajectory.n_times());
        let rejected = is_degenerate(&genes, shared.x_max);

        write_labelled_rows(
            &trajectory_path(&shared.simulations_dir, task.cell_id),
            &headers,
            named_genes
                .iter()
                .map(|&(name, species)| (name, trajectory.row(species))),
        )?;

        let sample = match task.sample_time {
            Some(time_index) => {
                if time_index >= n_times {
                    return Err(SimError::InvalidArgument(format!(
                        "sample time index {} is outside the {} simulated time points",
                        time_index, n_times
                    )));
                }
                let values: Vec<f64> = shared
                    .sample_rows
                    .iter()
                    .map(|&s| full.get(s, time_index))
                    .collect();
                write_labelled_rows(
                    &sample_path(&shared.simulations_dir, task.cell_id),
                    &[format!("{label}_{time_index}")],
                    shared
                        .sample_rows
                        .iter()
                        .zip(values.iter())
                        .map(|(&s, value)| {
                            (shared.spec.varmapper[s].as_str(), std::slice::from_ref(value))
                        }),
                )?;
                Some(SampledCell { time_index, values })
            }
            None => None,
        };

        if rejected {
            debug!(
                cell = task.cell_id,
                attempt = attempts,
                seed,
                "rejecting degenerate trajectory"
            );
            continue;
        }
        if attempts > 1 {
            warn!(cell = task.cell_id, attempts, "cell needed more than one attempt");
        }
        return Ok(CellOutcome {
            cell_id: task.cell_id,
            final_state: full.last_column(),
            trajectory,
            sample,
            attempts,
            seed,
        });
    }
}

pub(crate) fn write_labelled_rows<'r, L, R>(
    path: &Path,
    columns: &[String],
    rows: R,
) -> Result<(), SimError>
where
    L: AsRef<str>,
    R: IntoIterator<Item = (L, &'r [f64])>,
{
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = Vec::with_capacity(columns.len() + 1);
    header.push(String::new());
    header.extend(columns.iter().cloned());
    writer.write_record(&header)?;
    for (label, values) in rows {
        let mut record = Vec::with_capacity(values.len() + 1);
        record.push(label.as_ref().to_string());
        record.extend(values.iter().map(f64::to_string));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
