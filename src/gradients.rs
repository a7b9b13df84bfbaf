//! Gradient scheme builder
//!
//! Directions are spread over the hemisphere by electrostatic repulsion
//! between antipodally symmetric charges, then paired with shell b-values.

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::RtkError;

/// Initial step of the charge dispersion, relative to the largest force.
pub const DEFAULT_DISPERSION_STEP: f64 = 0.2;

/// b-values (s/mm²) paired with unit gradient directions.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientTable {
    pub bvals: Vec<f64>,
    pub bvecs: Vec<Vector3<f64>>,
}

impl GradientTable {
    /// Directions of zero-b rows are replaced by the zero vector.
    pub fn new(bvals: Vec<f64>, bvecs: Vec<Vector3<f64>>) -> Result<Self, RtkError> {
        if bvals.len() != bvecs.len() {
            return Err(RtkError::LengthMismatch {
                context: "gradient table bvecs",
                expected: bvals.len(),
                got: bvecs.len(),
            });
        }
        if bvals.iter().any(|b| !b.is_finite() || *b < 0.0) {
            return Err(RtkError::InvalidConfig(
                "b-values must be finite and >= 0".to_string(),
            ));
        }

        let bvecs = bvals
            .iter()
            .zip(bvecs)
            .map(|(&b, v)| if b == 0.0 { Vector3::zeros() } else { v })
            .collect();
        Ok(Self { bvals, bvecs })
    }

    pub fn len(&self) -> usize {
        self.bvals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bvals.is_empty()
    }

    pub fn b0_count(&self) -> usize {
        self.bvals.iter().filter(|b| **b == 0.0).count()
    }
}

/// Result of [`disperse_charges`].
#[derive(Debug, Clone)]
pub struct DispersedCharges {
    pub points: Vec<Vector3<f64>>,
    /// Potential after every iteration (index 0 is the starting potential).
    pub potential: Vec<f64>,
}

/// `n` random unit vectors on the upper hemisphere.
pub fn random_hemisphere<R: Rng>(n: usize, rng: &mut R) -> Vec<Vector3<f64>> {
    (0..n)
        .map(|_| {
            let theta = std::f64::consts::PI * rng.gen::<f64>();
            let phi = std::f64::consts::TAU * rng.gen::<f64>();
            let v = Vector3::new(
                theta.sin() * phi.cos(),
                theta.sin() * phi.sin(),
                theta.cos(),
            );
            if v.z < 0.0 { -v } else { v }
        })
        .collect()
}

/// Tangential Coulomb forces on each charge (images at `-x` included) and the
/// total potential of the configuration.
fn charge_forces(charges: &[Vector3<f64>]) -> (Vec<Vector3<f64>>, f64) {
    let mut forces = vec![Vector3::zeros(); charges.len()];
    let mut potential = 0.0;

    for (i, ci) in charges.iter().enumerate() {
        let mut force = Vector3::zeros();
        for (j, cj) in charges.iter().enumerate() {
            for other in [*cj, -*cj] {
                if i == j && other == *cj {
                    continue;
                }
                let r = ci - other;
                let r_mag = r.norm();
                force += r / (r_mag * r_mag * r_mag);
                potential += 1.0 / r_mag;
            }
        }
        let radial = ci.dot(&force);
        forces[i] = force - ci * radial;
    }

    (forces, 2.0 * potential)
}

/// Spread charges over the hemisphere by gradient steps on the Coulomb
/// potential. A step that raises the potential is rejected and the step size
/// halved, so the potential history never increases.
pub fn disperse_charges(
    points: &[Vector3<f64>],
    iterations: usize,
    step: f64,
) -> DispersedCharges {
    let mut charges: Vec<Vector3<f64>> = points.iter().map(|p| p.normalize()).collect();
    let (mut forces, v0) = charge_forces(&charges);
    let mut potential = Vec::with_capacity(iterations + 1);
    potential.push(v0);

    let max_force = forces.iter().map(|f| f.norm()).fold(0.0, f64::max);
    if charges.len() < 2 || max_force == 0.0 {
        return DispersedCharges {
            points: charges,
            potential,
        };
    }

    let mut step = step / max_force;
    let mut current = v0;

    for _ in 0..iterations {
        let candidate: Vec<Vector3<f64>> = charges
            .iter()
            .zip(forces.iter())
            .map(|(c, f)| (c + f * step).normalize())
            .collect();
        let (new_forces, v) = charge_forces(&candidate);
        if v <= current {
            charges = candidate;
            forces = new_forces;
            current = v;
        } else {
            step /= 2.0;
        }
        potential.push(current);
    }

    debug!(
        charges = charges.len(),
        iterations,
        start = v0,
        end = current,
        "dispersed gradient directions"
    );

    DispersedCharges {
        points: charges,
        potential,
    }
}

/// Multi-shell acquisition: `b0_count` unweighted rows followed by every
/// dispersed direction repeated for each shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientScheme {
    pub directions: usize,
    pub iterations: usize,
    pub b0_count: usize,
    pub shells: Vec<f64>,
    pub seed: u64,
}

impl Default for GradientScheme {
    fn default() -> Self {
        Self {
            directions: 64,
            iterations: 5000,
            b0_count: 1,
            shells: vec![1000.0, 2000.0],
            seed: 0x0D1C_2026,
        }
    }
}

impl GradientScheme {
    pub fn validate(&self) -> Result<(), RtkError> {
        if self.directions == 0 {
            return Err(RtkError::InvalidConfig(
                "scheme.directions must be greater than zero".to_string(),
            ));
        }
        if self.shells.is_empty() {
            return Err(RtkError::InvalidConfig(
                "scheme.shells must contain at least one b-value".to_string(),
            ));
        }
        if self.shells.iter().any(|b| !b.is_finite() || *b <= 0.0) {
            return Err(RtkError::InvalidConfig(
                "scheme.shells must contain only finite b-values > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build(&self) -> Result<GradientTable, RtkError> {
        self.validate()?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let initial = random_hemisphere(self.directions, &mut rng);
        let dispersed = disperse_charges(&initial, self.iterations, DEFAULT_DISPERSION_STEP);

        let total = self.b0_count + self.directions * self.shells.len();
        let mut bvals = Vec::with_capacity(total);
        let mut bvecs = Vec::with_capacity(total);

        for _ in 0..self.b0_count {
            bvals.push(0.0);
            bvecs.push(Vector3::zeros());
        }
        for &b in &self.shells {
            for dir in &dispersed.points {
                bvals.push(b);
                bvecs.push(*dir);
            }
        }

        GradientTable::new(bvals, bvecs)
    }
}
