use meval::{Context, ContextProvider, Expr};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

use crate::error::SimError;

pub const GENE_PREFIX: &str = "x_";
pub const PROTEIN_PREFIX: &str = "p_";

const DEFAULT_X_MAX: f64 = 2.0;

// Identifiers `meval` resolves on its own.
const BUILTIN_CONSTANTS: [&str; 2] = ["pi", "e"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub pars: BTreeMap<String, f64>,
    pub varmapper: Vec<String>,
    pub genelist: Vec<String>,
    pub proteinlist: Vec<String>,
    pub ics: BTreeMap<String, f64>,
    pub x_max: f64,
}

impl ModelSpec {
    pub fn n_species(&self) -> usize {
        self.varmapper.len()
    }

    pub fn rna_indices(&self) -> Vec<usize> {
        self.indices_with_prefix(GENE_PREFIX)
    }

    pub fn protein_indices(&self) -> Vec<usize> {
        self.indices_with_prefix(PROTEIN_PREFIX)
    }

    fn indices_with_prefix(&self, prefix: &str) -> Vec<usize> {
        self.varmapper
            .iter()
            .enumerate()
            .filter_map(|(idx, name)| name.starts_with(prefix).then_some(idx))
            .collect()
    }

    pub fn revvarmapper(&self) -> HashMap<&str, usize> {
        self.varmapper
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect()
    }

    pub fn index_of(&self, species: &str) -> Option<usize> {
        self.varmapper.iter().position(|name| name == species)
    }

    pub fn par_names(&self) -> Vec<String> {
        self.pars.keys().cloned().collect()
    }

    pub fn par_vector(&self) -> Vec<f64> {
        self.pars.values().copied().collect()
    }

    // Bare gene names in gene-list order, with their `x_` slot.
    pub fn named_gene_rows(&self) -> Vec<(&str, usize)> {
        self.genelist
            .iter()
            .filter_map(|gene| {
                self.index_of(&format!("{GENE_PREFIX}{gene}"))
                    .map(|idx| (gene.as_str(), idx))
            })
            .collect()
    }

    fn validate(&self) -> Result<(), SimError> {
        let index = self.revvarmapper();
        if index.len() != self.varmapper.len() {
            return Err(SimError::InvalidArgument(format!(
                "model {} declares duplicate species names",
                self.name
            )));
        }
        for gene in &self.genelist {
            if !index.contains_key(format!("{GENE_PREFIX}{gene}").as_str()) {
                return Err(SimError::InvalidArgument(format!(
                    "gene {gene} has no {GENE_PREFIX}{gene} state variable"
                )));
            }
        }
        for protein in &self.proteinlist {
            if !index.contains_key(format!("{PROTEIN_PREFIX}{protein}").as_str()) {
                return Err(SimError::InvalidArgument(format!(
                    "protein {protein} has no {PROTEIN_PREFIX}{protein} state variable"
                )));
            }
        }
        if !(self.x_max > 0.0) {
            return Err(SimError::InvalidArgument("x_max must be positive".into()));
        }
        Ok(())
    }
}

pub trait OdeModel: Sync {
    fn n_species(&self) -> usize;

    fn n_parameters(&self) -> usize;

    fn propensities(
        &self,
        state: &[f64],
        pars: &[f64],
        production: &mut [f64],
        degradation: &mut [f64],
    );
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Species(usize),
    Parameter(usize),
}

#[derive(Clone, Debug)]
struct SpeciesTerms {
    production: Expr,
    degradation: Expr,
}

struct ModelContext<'a> {
    slots: &'a HashMap<String, Slot>,
    state: &'a [f64],
    pars: &'a [f64],
}

impl<'a> ContextProvider for ModelContext<'a> {
    fn get_var(&self, name: &str) -> Option<f64> {
        match *self.slots.get(name)? {
            Slot::Species(idx) => Some(self.state[idx]),
            Slot::Parameter(idx) => Some(self.pars[idx]),
        }
    }
}

thread_local! {
    static BUILTINS: Context<'static> = Context::new();
}

#[derive(Clone, Debug)]
pub struct ExpressionModel {
    n_species: usize,
    n_parameters: usize,
    slots: HashMap<String, Slot>,
    terms: Vec<SpeciesTerms>,
}

impl ExpressionModel {
    pub fn compile(
        species: &[SpeciesDefinition],
        par_names: &[String],
    ) -> Result<Self, SimError> {
        let mut slots = HashMap::with_capacity(species.len() + par_names.len());
        for (idx, def) in species.iter().enumerate() {
            if slots.insert(def.name.clone(), Slot::Species(idx)).is_some() {
                return Err(SimError::InvalidArgument(format!(
                    "species {} is declared twice",
                    def.name
                )));
            }
        }
        for (idx, name) in par_names.iter().enumerate() {
            if slots.insert(name.clone(), Slot::Parameter(idx)).is_some() {
                return Err(SimError::InvalidArgument(format!(
                    "parameter {name} shadows another identifier"
                )));
            }
        }
        let mut terms = Vec::with_capacity(species.len());
        for def in species {
            terms.push(SpeciesTerms {
                production: parse_term(&def.name, "production", &def.production, &slots)?,
                degradation: parse_term(&def.name, "degradation", &def.degradation, &slots)?,
            });
        }
        Ok(Self {
            n_species: species.len(),
            n_parameters: par_names.len(),
            slots,
            terms,
        })
    }
}

impl OdeModel for ExpressionModel {
    fn n_species(&self) -> usize {
        self.n_species
    }

    fn n_parameters(&self) -> usize {
        self.n_parameters
    }

    fn propensities(
        &self,
        state: &[f64],
        pars: &[f64],
        production: &mut [f64],
        degradation: &mut [f64],
    ) {
        debug_assert_eq!(state.len(), self.n_species);
        debug_assert_eq!(pars.len(), self.n_parameters);
        BUILTINS.with(|builtins| {
            let context = ModelContext {
                slots: &self.slots,
                state,
                pars,
            };
            for (idx, terms) in self.terms.iter().enumerate() {
                // Identifiers are checked at compile time; anything left is a
                // numerical failure and should surface as one.
                production[idx] = terms
                    .production
                    .eval_with_context((&context, builtins))
                    .unwrap_or(f64::NAN);
                degradation[idx] = terms
                    .degradation
                    .eval_with_context((&context, builtins))
                    .unwrap_or(f64::NAN);
            }
        });
    }
}

fn parse_term(
    species: &str,
    kind: &str,
    source: &str,
    slots: &HashMap<String, Slot>,
) -> Result<Expr, SimError> {
    let expr = Expr::from_str(source).map_err(|err| {
        SimError::InvalidArgument(format!("{species} {kind} term parse error: {err}"))
    })?;
    for ident in collect_identifiers(source) {
        if !slots.contains_key(ident) && !BUILTIN_CONSTANTS.contains(&ident) {
            return Err(SimError::InvalidArgument(format!(
                "{species} {kind} term references unknown identifier '{ident}'"
            )));
        }
    }
    Ok(expr)
}

pub(crate) fn collect_identifiers(source: &str) -> Vec<&str> {
    let bytes = source.as_bytes();
    let mut refs: Vec<&str> = Vec::new();
    let mut idx = 0;
    while idx < bytes.len() {
        let ch = bytes[idx];
        if ch.is_ascii_digit() || ch == b'.' {
            idx += 1;
            while idx < bytes.len() && (bytes[idx].is_ascii_digit() || bytes[idx] == b'.') {
                idx += 1;
            }
            if idx < bytes.len() && (bytes[idx] == b'e' || bytes[idx] == b'E') {
                let mut end = idx + 1;
                if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
                    end += 1;
                }
                if end < bytes.len() && bytes[end].is_ascii_digit() {
                    idx = end;
                    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
                        idx += 1;
                    }
                }
            }
        } else if ch.is_ascii_alphabetic() || ch == b'_' {
            let start = idx;
            while idx < bytes.len() && (bytes[idx].is_ascii_alphanumeric() || bytes[idx] == b'_')
            {
                idx += 1;
            }
            let mut lookahead = idx;
            while lookahead < bytes.len() && bytes[lookahead].is_ascii_whitespace() {
                lookahead += 1;
            }
            let is_call = lookahead < bytes.len() && bytes[lookahead] == b'(';
            let ident = &source[start..idx];
            if !is_call && !refs.contains(&ident) {
                refs.push(ident);
            }
        } else {
            idx += 1;
        }
    }
    refs
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeciesDefinition {
    pub name: String,
    pub production: String,
    pub degradation: String,
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    name: String,
    species: Vec<SpeciesDefinition>,
    parameters: BTreeMap<String, f64>,
    genes: Vec<String>,
    #[serde(default)]
    proteins: Vec<String>,
    #[serde(default)]
    ics: BTreeMap<String, f64>,
    #[serde(default = "default_x_max")]
    x_max: f64,
}

fn default_x_max() -> f64 {
    DEFAULT_X_MAX
}

#[derive(Clone, Debug)]
pub struct GeneratedModel {
    pub spec: ModelSpec,
    pub model: ExpressionModel,
}

impl GeneratedModel {
    pub fn from_json_str(source: &str) -> Result<Self, SimError> {
        let file: ModelFile = serde_json::from_str(source)?;
        let spec = ModelSpec {
            name: file.name,
            pars: file.parameters,
            varmapper: file.species.iter().map(|def| def.name.clone()).collect(),
            genelist: file.genes,
            proteinlist: file.proteins,
            ics: file.ics,
            x_max: file.x_max,
        };
        spec.validate()?;
        let model = ExpressionModel::compile(&file.species, &spec.par_names())?;
        Ok(Self { spec, model })
    }

    pub fn load(path: &Path) -> Result<Self, SimError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json_str(&source)
    }
}
