use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::SimError;
use crate::experiment::{DEFAULT_MAX_ATTEMPTS, ExperimentResult, ExperimentSettings, run_experiment};
use crate::initial::{IcsOverride, InitialConditions};
use crate::integrator::EulerMaruyama;
use crate::model::GeneratedModel;
use crate::perturbation::{PerturbationArity, PerturbationOutcome};

pub const EXPRESSION_DATA_FILE: &str = "ExpressionData.csv";
pub const PSEUDOTIME_FILE: &str = "PseudoTime.csv";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub name: String,
    pub model_path: PathBuf,
    pub outprefix: PathBuf,
    #[serde(default)]
    pub ics_path: Option<PathBuf>,
    #[serde(default = "default_simulation_time")]
    pub simulation_time: f64,
    #[serde(default = "default_integration_step_size")]
    pub integration_step_size: f64,
    #[serde(default = "default_num_cells")]
    pub num_cells: usize,
    #[serde(default)]
    pub do_parallel: bool,
    #[serde(default)]
    pub n_threads: Option<usize>,
    #[serde(default = "default_n_clusters")]
    pub n_clusters: usize,
    #[serde(default)]
    pub sample_cells: bool,
    #[serde(default)]
    pub write_protein: bool,
    #[serde(default)]
    pub normalize_trajectory: bool,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_noise_strength")]
    pub noise_strength: f64,
}

fn default_simulation_time() -> f64 {
    20.0
}

fn default_integration_step_size() -> f64 {
    0.01
}

fn default_num_cells() -> usize {
    100
}

fn default_n_clusters() -> usize {
    1
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn default_noise_strength() -> f64 {
    1.0
}

impl Settings {
    pub fn from_toml_str(source: &str) -> Result<Self, SimError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, SimError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn tspan(&self) -> Result<Vec<f64>, SimError> {
        if !(self.simulation_time > 0.0) || !(self.integration_step_size > 0.0) {
            return Err(SimError::InvalidArgument(
                "simulation_time and integration_step_size must be positive".into(),
            ));
        }
        let n_points = (self.simulation_time / self.integration_step_size) as usize;
        Ok(linspace(0.0, self.simulation_time, n_points))
    }

    pub fn experiment_settings(&self) -> ExperimentSettings {
        ExperimentSettings {
            outprefix: self.outprefix.clone(),
            num_cells: self.num_cells,
            do_parallel: self.do_parallel,
            n_threads: self.n_threads,
            n_clusters: self.n_clusters,
            sample_cells: self.sample_cells,
            write_protein: self.write_protein,
            normalize_trajectory: self.normalize_trajectory,
            max_attempts: self.max_attempts,
            stochastic: true,
        }
    }

    pub fn integrator(&self) -> EulerMaruyama {
        EulerMaruyama::new(self.noise_strength)
    }
}

pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

pub fn load_ics_table(path: Option<&Path>) -> Result<Option<IcsOverride>, SimError> {
    let Some(path) = path else {
        return Ok(None);
    };
    if !path.exists() {
        warn!(path = %path.display(), "initial condition file not found, using defaults");
        return Ok(None);
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
            SimError::Input(format!("{} has no '{}' column", path.display(), name))
        })
    };
    let genes_col = column("Genes")?;
    let values_col = column("Values")?;
    let Some(record) = reader.records().next() else {
        return Ok(None);
    };
    let record = record?;
    let field = |idx: usize| {
        record
            .get(idx)
            .ok_or_else(|| SimError::Input(format!("{} row 0 is truncated", path.display())))
    };
    let names: Vec<String> = parse_list_literal(field(genes_col)?)?
        .into_iter()
        .map(|item| item.trim_matches(|c| c == '\'' || c == '"').to_string())
        .collect();
    let values = parse_list_literal(field(values_col)?)?
        .into_iter()
        .map(|item| {
            item.parse::<f64>()
                .map_err(|_| SimError::Input(format!("'{item}' is not a number")))
        })
        .collect::<Result<Vec<f64>, SimError>>()?;
    IcsOverride::from_pairs(names, values).map(Some)
}

fn parse_list_literal(source: &str) -> Result<Vec<&str>, SimError> {
    let inner = source
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| SimError::Input(format!("'{source}' is not a list literal")))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(inner.split(',').map(str::trim).collect())
}

#[derive(Clone, Debug)]
pub struct RunOutput {
    pub generated: GeneratedModel,
    pub tspan: Vec<f64>,
    pub result: ExperimentResult,
}

pub fn start_run(settings: &Settings) -> Result<RunOutput, SimError> {
    let start_full = Instant::now();
    if !settings.outprefix.exists() {
        info!(path = %settings.outprefix.display(), "creating output directory");
        std::fs::create_dir_all(&settings.outprefix)?;
    }

    let overrides = load_ics_table(settings.ics_path.as_deref())?;
    let tspan = settings.tspan()?;
    info!(model = %settings.model_path.display(), "loading model");
    let generated = GeneratedModel::load(&settings.model_path)?;
    let ics = InitialConditions::from_override(&generated.spec, overrides.as_ref())?;

    let result = run_experiment(
        &generated.spec,
        &generated.model,
        &settings.integrator(),
        &tspan,
        &settings.experiment_settings(),
        &ics,
        settings.seed,
    )?;

    let start = Instant::now();
    write_ground_truth(&result, &tspan, &settings.outprefix)?;
    info!(seconds = start.elapsed().as_secs_f64(), "ground truth files written");
    info!(
        name = %settings.name,
        seconds = start_full.elapsed().as_secs_f64(),
        "run finished"
    );
    Ok(RunOutput {
        generated,
        tspan,
        result,
    })
}

pub fn start_perturbations(
    settings: &Settings,
    previous: &mut RunOutput,
    level: f64,
    arity: PerturbationArity,
) -> Result<PerturbationOutcome, SimError> {
    let RunOutput {
        generated,
        tspan,
        result,
    } = previous;
    crate::perturbation::start_perturbations(
        &mut generated.spec,
        &generated.model,
        &settings.integrator(),
        tspan,
        &settings.experiment_settings(),
        &result.final_states,
        level,
        arity,
    )
}

pub fn write_ground_truth(
    result: &ExperimentResult,
    tspan: &[f64],
    outprefix: &Path,
) -> Result<(), SimError> {
    result
        .table
        .write_csv(&outprefix.join(EXPRESSION_DATA_FILE))?;

    let tmax = tspan.last().copied().unwrap_or(0.0);
    let mut writer = csv::Writer::from_path(outprefix.join(PSEUDOTIME_FILE))?;
    writer.write_record(["", "PseudoTime"])?;
    for column in &result.table.columns {
        let time_index = column
            .rsplit_once('_')
            .and_then(|(_, t)| t.parse::<usize>().ok())
            .ok_or_else(|| SimError::Input(format!("column {column} carries no time index")))?;
        let time = tspan.get(time_index).copied().unwrap_or(tmax);
        let pseudotime = if tmax > 0.0 { time / tmax } else { 0.0 };
        writer.write_record([column.clone(), pseudotime.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}
