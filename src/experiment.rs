use std::path::{Path, PathBuf};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::info;

use crate::cluster::{kmeans, write_cluster_ids};
use crate::error::SimError;
use crate::initial::InitialConditions;
use crate::integrator::Integrator;
use crate::model::{GENE_PREFIX, ModelSpec, OdeModel};
use crate::trajectory::Trajectory;
use crate::worker::{CellOutcome, CellTask, SharedRun, cell_label, simulate_and_sample};

pub const SIMULATIONS_DIR: &str = "simulations";
pub const CLUSTER_IDS_FILE: &str = "ClusterIds.csv";
pub const DEFAULT_MAX_ATTEMPTS: usize = 1000;

#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentSettings {
    pub outprefix: PathBuf,
    pub num_cells: usize,
    pub do_parallel: bool,
    pub n_threads: Option<usize>,
    pub n_clusters: usize,
    pub sample_cells: bool,
    pub write_protein: bool,
    pub normalize_trajectory: bool,
    pub max_attempts: usize,
    pub stochastic: bool,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            outprefix: PathBuf::from("."),
            num_cells: 100,
            do_parallel: false,
            n_threads: None,
            n_clusters: 1,
            sample_cells: false,
            write_protein: false,
            normalize_trajectory: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            stochastic: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellTable {
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    data: Vec<f64>,
}

impl CellTable {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let width = self.columns.len();
        &self.data[row * width..(row + 1) * width]
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }

    fn normalize_rows(&mut self) {
        let width = self.columns.len();
        if width == 0 {
            return;
        }
        for row in self.data.chunks_mut(width) {
            let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if max > 0.0 {
                row.iter_mut().for_each(|v| *v /= max);
            }
        }
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), SimError> {
        crate::worker::write_labelled_rows(
            path,
            &self.columns,
            self.rows.iter().enumerate().map(|(idx, label)| (label, self.row(idx))),
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentResult {
    pub table: CellTable,
    pub final_states: Vec<Vec<f64>>,
    pub avg_traj: Trajectory,
    pub cluster_ids: Option<Vec<usize>>,
}

pub fn run_experiment<M, I>(
    spec: &ModelSpec,
    model: &M,
    integrator: &I,
    tspan: &[f64],
    settings: &ExperimentSettings,
    ics: &InitialConditions,
    init_seed: u64,
) -> Result<ExperimentResult, SimError>
where
    M: OdeModel + ?Sized,
    I: Integrator,
{
    let num_cells = settings.num_cells;
    if num_cells == 0 {
        return Err(SimError::InvalidArgument(
            "number of cells must be greater than zero".into(),
        ));
    }
    if tspan.len() < 2 {
        return Err(SimError::InvalidArgument(
            "tspan must contain at least two time points".into(),
        ));
    }
    if settings.n_clusters > num_cells {
        return Err(SimError::InvalidArgument(format!(
            "cannot form {} clusters from {} cells",
            settings.n_clusters, num_cells
        )));
    }
    if model.n_species() != spec.n_species() {
        return Err(SimError::Shape(format!(
            "model has {} species but the variable map lists {}",
            model.n_species(),
            spec.n_species()
        )));
    }
    ics.validate(spec.n_species(), num_cells)?;

    let simulations_dir = settings.outprefix.join(SIMULATIONS_DIR);
    if !simulations_dir.exists() {
        info!(path = %simulations_dir.display(), "creating simulations directory");
        std::fs::create_dir_all(&simulations_dir)?;
    }

    let gene_rows = spec.rna_indices();
    let protein_rows = spec.protein_indices();
    let sample_rows: Vec<usize> = if settings.write_protein {
        protein_rows.iter().chain(gene_rows.iter()).copied().collect()
    } else {
        gene_rows.clone()
    };
    let shared = SharedRun {
        spec,
        model,
        integrator,
        pars: spec.par_vector(),
        tspan,
        gene_rows: gene_rows.clone(),
        sample_rows: sample_rows.clone(),
        simulations_dir,
        x_max: spec.x_max,
        adjust_initial: !ics.is_multi_steady_state(),
        stochastic: settings.stochastic,
        max_attempts: settings.max_attempts,
    };

    // Sample times are fixed up front so every run with the same seed samples
    // the same cells at the same points.
    let sample_times: Option<Vec<usize>> = settings.sample_cells.then(|| {
        let mut rng = ChaCha8Rng::seed_from_u64(init_seed);
        (0..num_cells).map(|_| rng.gen_range(0..tspan.len())).collect()
    });
    let tasks: Vec<CellTask> = (0..num_cells)
        .map(|cell_id| CellTask {
            cell_id,
            seed: init_seed.wrapping_add(cell_id as u64),
            initial: ics.for_cell(cell_id).to_vec(),
            sample_time: sample_times.as_ref().map(|times| times[cell_id]),
        })
        .collect();

    info!(cells = num_cells, parallel = settings.do_parallel, "starting simulations");
    let start = Instant::now();
    let outcomes = dispatch(&shared, &tasks, settings)?;
    info!(seconds = start.elapsed().as_secs_f64(), "simulations finished");

    let final_states: Vec<Vec<f64>> = outcomes.iter().map(|o| o.final_state.clone()).collect();
    let avg_traj = mean_trajectory(&outcomes, num_cells)?;

    let start = Instant::now();
    let mut table = if settings.sample_cells {
        sampled_table(spec, &sample_rows, &outcomes)?
    } else {
        trajectory_table(spec, &gene_rows, &outcomes)
    };
    if settings.normalize_trajectory {
        table.normalize_rows();
    }
    info!(seconds = start.elapsed().as_secs_f64(), "assembled cell table");

    let cluster_ids = if settings.n_clusters > 1 {
        info!(clusters = settings.n_clusters, "starting k-means clustering");
        let start = Instant::now();
        let features = cluster_features(spec, &gene_rows, &outcomes);
        let labels = kmeans(&features, settings.n_clusters, init_seed)?;
        write_cluster_ids(&settings.outprefix.join(CLUSTER_IDS_FILE), &labels)?;
        info!(seconds = start.elapsed().as_secs_f64(), "clustering finished");
        Some(labels)
    } else {
        info!("requested n_clusters=1, not performing k-means clustering");
        None
    };

    Ok(ExperimentResult {
        table,
        final_states,
        avg_traj,
        cluster_ids,
    })
}

fn dispatch<M, I>(
    shared: &SharedRun<'_, M, I>,
    tasks: &[CellTask],
    settings: &ExperimentSettings,
) -> Result<Vec<CellOutcome>, SimError>
where
    M: OdeModel + ?Sized,
    I: Integrator,
{
    // Indexed by cell id, whatever order tasks complete in.
    let mut slots: Vec<Option<CellOutcome>> = std::iter::repeat_with(|| None)
        .take(tasks.len())
        .collect();

    if settings.do_parallel {
        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.n_threads.unwrap_or(0))
            .build()
            .map_err(|e| SimError::ThreadPool(e.to_string()))?;
        pool.install(|| {
            slots
                .par_iter_mut()
                .zip(tasks.par_iter())
                .try_for_each(|(slot, task)| {
                    *slot = Some(simulate_and_sample(shared, task)?);
                    Ok::<(), SimError>(())
                })
        })?;
    } else {
        let progress = ProgressBar::new(tasks.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .map_err(|e| SimError::InvalidArgument(e.to_string()))?
                .progress_chars("#>-"),
        );
        for (slot, task) in slots.iter_mut().zip(tasks.iter()) {
            *slot = Some(simulate_and_sample(shared, task)?);
            progress.inc(1);
        }
        progress.finish_and_clear();
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(cell_id, slot)| {
            slot.ok_or_else(|| {
                SimError::InvalidArgument(format!("cell {cell_id} produced no result"))
            })
        })
        .collect()
}

fn mean_trajectory(outcomes: &[CellOutcome], num_cells: usize) -> Result<Trajectory, SimError> {
    let mut avg: Option<Trajectory> = None;
    let weight = 1.0 / num_cells as f64;
    for outcome in outcomes {
        let sampled = outcome.trajectory.every_other_time();
        match avg.as_mut() {
            Some(acc) => acc.add_scaled(&sampled, weight)?,
            None => {
                let mut acc = Trajectory::zeros(sampled.n_species(), sampled.n_times());
                acc.add_scaled(&sampled, weight)?;
                avg = Some(acc);
            }
        }
    }
    Ok(avg.unwrap_or_else(|| Trajectory::zeros(0, 0)))
}

fn sorted_rows(spec: &ModelSpec, rows: &[usize]) -> Vec<(String, usize)> {
    let mut labelled: Vec<(String, usize)> = rows
        .iter()
        .map(|&idx| (spec.varmapper[idx].clone(), idx))
        .collect();
    labelled.sort();
    labelled
}

fn strip_gene_prefix(label: &str) -> String {
    label.strip_prefix(GENE_PREFIX).unwrap_or(label).to_string()
}

fn trajectory_table(spec: &ModelSpec, gene_rows: &[usize], outcomes: &[CellOutcome]) -> CellTable {
    let rows = sorted_rows(spec, gene_rows);
    let n_times = outcomes.first().map_or(0, |o| o.trajectory.n_times());
    let columns: Vec<String> = outcomes
        .iter()
        .flat_map(|o| {
            let label = cell_label(o.cell_id);
            (1..=n_times).map(move |t| format!("{label}_{t}"))
        })
        .collect();
    let mut data = Vec::with_capacity(rows.len() * columns.len());
    for (_, species) in &rows {
        for outcome in outcomes {
            data.extend_from_slice(outcome.trajectory.row(*species));
        }
    }
    CellTable {
        rows: rows.iter().map(|(label, _)| strip_gene_prefix(label)).collect(),
        columns,
        data,
    }
}

fn sampled_table(
    spec: &ModelSpec,
    sample_rows: &[usize],
    outcomes: &[CellOutcome],
) -> Result<CellTable, SimError> {
    let samples = outcomes
        .iter()
        .map(|o| {
            o.sample.as_ref().ok_or_else(|| {
                SimError::Shape(format!("cell {} carries no sampled time point", o.cell_id))
            })
        })
        .collect::<Result<Vec<_>, SimError>>()?;
    if let Some(sample) = samples.iter().find(|s| s.values.len() != sample_rows.len()) {
        return Err(SimError::Shape(format!(
            "sampled cell has {} values, expected {}",
            sample.values.len(),
            sample_rows.len()
        )));
    }

    // (label, position within the sampled values), sorted by label.
    let mut rows: Vec<(String, usize)> = sample_rows
        .iter()
        .enumerate()
        .map(|(offset, &species)| (spec.varmapper[species].clone(), offset))
        .collect();
    rows.sort();
    let columns: Vec<String> = outcomes
        .iter()
        .zip(samples.iter())
        .map(|(o, sample)| format!("{}_{}", cell_label(o.cell_id), sample.time_index))
        .collect();
    let mut data = Vec::with_capacity(rows.len() * columns.len());
    for (_, offset) in &rows {
        data.extend(samples.iter().map(|sample| sample.values[*offset]));
    }
    Ok(CellTable {
        rows: rows.iter().map(|(label, _)| strip_gene_prefix(label)).collect(),
        columns,
        data,
    })
}

fn cluster_features(
    spec: &ModelSpec,
    gene_rows: &[usize],
    outcomes: &[CellOutcome],
) -> Vec<Vec<f64>> {
    let rows = sorted_rows(spec, gene_rows);
    outcomes
        .iter()
        .map(|outcome| {
            rows.iter()
                .flat_map(|(_, species)| outcome.trajectory.row(*species).iter().copied())
                .collect()
        })
        .collect()
}
