use std::collections::BTreeMap;

use crate::error::SimError;
use crate::model::{GENE_PREFIX, ModelSpec, PROTEIN_PREFIX};

pub const DEFAULT_GENE_LEVEL: f64 = 1.0;
pub const DEFAULT_PROTEIN_LEVEL: f64 = 20.0;
pub const UNSPECIFIED_LEVEL: f64 = 0.01;

#[derive(Clone, Debug, PartialEq)]
pub enum InitialConditions {
    SharedTemplate(Vec<f64>),
    PerCell(Vec<Vec<f64>>),
}

impl InitialConditions {
    pub fn from_override(
        spec: &ModelSpec,
        overrides: Option<&IcsOverride>,
    ) -> Result<Self, SimError> {
        steady_state_template(spec, overrides).map(Self::SharedTemplate)
    }

    pub fn is_multi_steady_state(&self) -> bool {
        matches!(self, Self::PerCell(_))
    }

    pub(crate) fn for_cell(&self, cell: usize) -> &[f64] {
        match self {
            Self::SharedTemplate(template) => template,
            Self::PerCell(states) => &states[cell],
        }
    }

    pub(crate) fn validate(&self, n_species: usize, num_cells: usize) -> Result<(), SimError> {
        match self {
            Self::SharedTemplate(template) => {
                if template.len() != n_species {
                    return Err(SimError::Shape(format!(
                        "initial template length {} does not match number of species {}",
                        template.len(),
                        n_species
                    )));
                }
            }
            Self::PerCell(states) => {
                if states.len() != num_cells {
                    return Err(SimError::Shape(format!(
                        "per-cell initial states count {} does not match number of cells {}",
                        states.len(),
                        num_cells
                    )));
                }
                if let Some((cell, state)) = states
                    .iter()
                    .enumerate()
                    .find(|(_, state)| state.len() != n_species)
                {
                    return Err(SimError::Shape(format!(
                        "initial state for cell {} has length {}, expected {}",
                        cell,
                        state.len(),
                        n_species
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IcsOverride {
    values: BTreeMap<String, f64>,
}

impl IcsOverride {
    pub fn from_pairs(names: Vec<String>, values: Vec<f64>) -> Result<Self, SimError> {
        if names.len() != values.len() {
            return Err(SimError::Input(format!(
                "initial condition table lists {} names but {} values",
                names.len(),
                values.len()
            )));
        }
        Ok(Self {
            values: names.into_iter().zip(values).collect(),
        })
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

}

pub fn steady_state_template(
    spec: &ModelSpec,
    overrides: Option<&IcsOverride>,
) -> Result<Vec<f64>, SimError> {
    let mut ss: Vec<f64> = spec
        .varmapper
        .iter()
        .map(|name| {
            if name.starts_with(GENE_PREFIX) {
                DEFAULT_GENE_LEVEL
            } else if name
                .strip_prefix(PROTEIN_PREFIX)
                .is_some_and(|p| spec.proteinlist.iter().any(|q| q == p))
            {
                DEFAULT_PROTEIN_LEVEL
            } else {
                // Slots outside the gene and protein lists start from the
                // model's own defaults.
                spec.ics.get(name).copied().unwrap_or(0.0)
            }
        })
        .collect();

    let Some(overrides) = overrides else {
        return Ok(ss);
    };
    let index = spec.revvarmapper();
    let lookup = |prefix: &str, name: &str| {
        let key = format!("{prefix}{name}");
        index.get(key.as_str()).copied().ok_or_else(|| {
            SimError::InvalidArgument(format!("no state variable named {key}"))
        })
    };
    for protein in &spec.proteinlist {
        ss[lookup(PROTEIN_PREFIX, protein)?] = overrides.get(protein).unwrap_or(UNSPECIFIED_LEVEL);
    }
    for gene in &spec.genelist {
        ss[lookup(GENE_PREFIX, gene)?] = overrides.get(gene).unwrap_or(UNSPECIFIED_LEVEL);
    }
    Ok(ss)
}

pub fn adjust_initial_condition(spec: &ModelSpec, ss: &[f64]) -> Vec<f64> {
    let index = spec.revvarmapper();
    let mut y0 = ss.to_vec();
    for (idx, name) in spec.varmapper.iter().enumerate() {
        if let Some(gene) = name.strip_prefix(PROTEIN_PREFIX) {
            let translation = spec.pars.get(&format!("r_{gene}"));
            let decay = spec.pars.get(&format!("l_p_{gene}"));
            let mrna = index.get(format!("{GENE_PREFIX}{gene}").as_str());
            if let (Some(&r), Some(&l), Some(&m)) = (translation, decay, mrna) {
                if l > 0.0 {
                    y0[idx] = ss[m] * r / l;
                }
            }
            y0[idx] = y0[idx].max(UNSPECIFIED_LEVEL);
        } else if name.starts_with(GENE_PREFIX) {
            y0[idx] = y0[idx].max(UNSPECIFIED_LEVEL);
        }
    }
    y0
}
