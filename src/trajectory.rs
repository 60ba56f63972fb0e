use std::ops::Range;

use crate::error::SimError;

#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    data: Vec<f64>,
    n_species: usize,
    n_times: usize,
}

impl Trajectory {
    pub fn zeros(n_species: usize, n_times: usize) -> Self {
        Self {
            data: vec![0.0; n_species * n_times],
            n_species,
            n_times,
        }
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, SimError> {
        let n_times = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * n_times);
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != n_times {
                return Err(SimError::Shape(format!(
                    "trajectory row {} has {} time points, expected {}",
                    idx,
                    row.len(),
                    n_times
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            data,
            n_species: rows.len(),
            n_times,
        })
    }

    pub fn n_species(&self) -> usize {
        self.n_species
    }

    pub fn n_times(&self) -> usize {
        self.n_times
    }

    #[inline]
    pub fn get(&self, species: usize, time: usize) -> f64 {
        self.data[species * self.n_times + time]
    }

    pub fn row(&self, species: usize) -> &[f64] {
        let start = species * self.n_times;
        &self.data[start..start + self.n_times]
    }

    pub fn column(&self, time: usize) -> Vec<f64> {
        (0..self.n_species).map(|s| self.get(s, time)).collect()
    }

    pub fn last_column(&self) -> Vec<f64> {
        match self.n_times {
            0 => Vec::new(),
            n => self.column(n - 1),
        }
    }

    pub(crate) fn set_column(&mut self, time: usize, values: &[f64]) {
        debug_assert_eq!(values.len(), self.n_species);
        for (species, &value) in values.iter().enumerate() {
            self.data[species * self.n_times + time] = value;
        }
    }

    pub fn select(&self, species: &[usize], times: Range<usize>) -> Trajectory {
        let n_times = times.len();
        let mut data = Vec::with_capacity(species.len() * n_times);
        for &s in species {
            data.extend_from_slice(&self.row(s)[times.clone()]);
        }
        Trajectory {
            data,
            n_species: species.len(),
            n_times,
        }
    }

    pub fn after_start(&self) -> Trajectory {
        let all: Vec<usize> = (0..self.n_species).collect();
        self.select(&all, 1usize.min(self.n_times)..self.n_times)
    }

    pub fn every_other_time(&self) -> Trajectory {
        let n_times = self.n_times.div_ceil(2);
        let mut data = Vec::with_capacity(self.n_species * n_times);
        for s in 0..self.n_species {
            data.extend(self.row(s).iter().step_by(2));
        }
        Trajectory {
            data,
            n_species: self.n_species,
            n_times,
        }
    }

    pub fn add_scaled(&mut self, other: &Trajectory, factor: f64) -> Result<(), SimError> {
        if other.n_species != self.n_species || other.n_times != self.n_times {
            return Err(SimError::Shape(format!(
                "cannot add a {}x{} trajectory to a {}x{} one",
                other.n_species, other.n_times, self.n_species, self.n_times
            )));
        }
        for (dst, &src) in self.data.iter_mut().zip(other.data.iter()) {
            *dst += src * factor;
        }
        Ok(())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn into_rows(self) -> Vec<Vec<f64>> {
        if self.n_times == 0 {
            return vec![Vec::new(); self.n_species];
        }
        self.data
            .chunks(self.n_times)
            .map(<[f64]>::to_vec)
            .collect()
    }
}
