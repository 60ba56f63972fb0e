use std::path::Path;

use numpy::PyArray2;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::driver::{self, Settings};
use crate::error::SimError;
use crate::experiment::ExperimentResult;
use crate::perturbation::PerturbationArity;

impl From<SimError> for PyErr {
    fn from(err: SimError) -> Self {
        PyValueError::new_err(err.to_string())
    }
}

fn matrix_to_py<'py>(py: Python<'py>, rows: &[Vec<f64>]) -> PyResult<Bound<'py, PyArray2<f64>>> {
    PyArray2::from_vec2(py, rows).map_err(|e| PyValueError::new_err(e.to_string()))
}

fn result_to_py(py: Python<'_>, result: &ExperimentResult) -> PyResult<Py<PyAny>> {
    let table_rows: Vec<Vec<f64>> = (0..result.table.n_rows())
        .map(|r| result.table.row(r).to_vec())
        .collect();
    let dict = PyDict::new(py);
    dict.set_item("genes", result.table.rows.clone())?;
    dict.set_item("cells", result.table.columns.clone())?;
    dict.set_item("data", matrix_to_py(py, &table_rows)?)?;
    dict.set_item("final_states", matrix_to_py(py, &result.final_states)?)?;
    dict.set_item(
        "avg_traj",
        matrix_to_py(py, &result.avg_traj.clone().into_rows())?,
    )?;
    dict.set_item("cluster_ids", result.cluster_ids.clone())?;
    Ok(dict.into_any().unbind())
}

#[pyfunction(signature = (config_path))]
pub fn start_run(py: Python<'_>, config_path: &str) -> PyResult<Py<PyAny>> {
    let settings = Settings::load(Path::new(config_path))?;
    let output = py.detach(move || driver::start_run(&settings))?;
    result_to_py(py, &output.result)
}

#[pyfunction(signature = (config_path, perturbation_level=2.0, single=true))]
pub fn start_perturbations(
    py: Python<'_>,
    config_path: &str,
    perturbation_level: f64,
    single: bool,
) -> PyResult<Py<PyAny>> {
    let settings = Settings::load(Path::new(config_path))?;
    let arity = if single {
        PerturbationArity::Single
    } else {
        PerturbationArity::Pairs
    };
    let outcome = py.detach(move || -> Result<_, SimError> {
        let mut previous = driver::start_run(&settings)?;
        driver::start_perturbations(&settings, &mut previous, perturbation_level, arity)
    })?;
    let runs = PyDict::new(py);
    for run in &outcome.runs {
        runs.set_item(
            run.outprefix.display().to_string(),
            result_to_py(py, &run.result)?,
        )?;
    }
    let final_states = PyDict::new(py);
    for (label, states) in &outcome.final_states {
        final_states.set_item(label, matrix_to_py(py, states)?)?;
    }
    let avg_trajs = PyDict::new(py);
    for (path, traj) in &outcome.avg_trajs {
        avg_trajs.set_item(
            path.display().to_string(),
            matrix_to_py(py, &traj.clone().into_rows())?,
        )?;
    }
    let dict = PyDict::new(py);
    dict.set_item("gid", outcome.gene_ids.clone())?;
    dict.set_item("final_states", final_states)?;
    dict.set_item("avg_trajs", avg_trajs)?;
    dict.set_item("runs", runs)?;
    Ok(dict.into_any().unbind())
}

#[pymodule]
fn boolode(_py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_function(wrap_pyfunction!(start_run, module)?)?;
    module.add_function(wrap_pyfunction!(start_perturbations, module)?)?;
    Ok(())
}
