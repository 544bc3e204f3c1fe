//! Structural deviation between a predicted model and the target structure.
//!
//! CA RMSD after optimal rigid superposition, using the quaternion formulation:
//! the largest eigenvalue of the 4x4 key matrix built from the cross-covariance
//! of the centred point sets gives the minimal residual directly, so no rotation
//! matrix has to be formed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Fewer matched residues than this and a candidate is excluded, not scored.
pub const MIN_MATCHED_RESIDUES: usize = 3;

const JACOBI_MAX_SWEEPS: usize = 64;
const JACOBI_REL_TOLERANCE: f64 = 1e-30;

type Mat4 = [[f64; 4]; 4];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Deviation {
    Scored { rmsd: f64, matched: usize },
    Insufficient { matched: usize, required: usize },
}

impl Deviation {
    pub fn rmsd(&self) -> Option<f64> {
        match self {
            Deviation::Scored { rmsd, .. } => Some(*rmsd),
            Deviation::Insufficient { .. } => None,
        }
    }
}

/// Compare CA coordinates keyed by residue ordinal, over ordinals present in both.
pub fn ca_deviation(
    model: &BTreeMap<usize, [f64; 3]>,
    reference: &BTreeMap<usize, [f64; 3]>,
    min_matched: usize,
) -> Deviation {
    let (a, b): (Vec<[f64; 3]>, Vec<[f64; 3]>) = model
        .iter()
        .filter_map(|(k, p)| reference.get(k).map(|q| (*p, *q)))
        .unzip();
    let required = min_matched.max(1);
    if a.len() < required {
        return Deviation::Insufficient { matched: a.len(), required };
    }
    Deviation::Scored { rmsd: superposed_rmsd(&a, &b), matched: a.len() }
}

fn centroid(points: &[[f64; 3]]) -> [f64; 3] {
    let n = points.len() as f64;
    let mut c = [0.0; 3];
    for p in points {
        for k in 0..3 {
            c[k] += p[k];
        }
    }
    c.map(|v| v / n)
}

fn centered(points: &[[f64; 3]]) -> Vec<[f64; 3]> {
    let c = centroid(points);
    points.iter().map(|p| [p[0] - c[0], p[1] - c[1], p[2] - c[2]]).collect()
}

/// Minimal RMSD over all rotations and translations. `a` and `b` are paired.
pub fn superposed_rmsd(a: &[[f64; 3]], b: &[[f64; 3]]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let a = centered(&a[..n]);
    let b = centered(&b[..n]);

    let mut s = [[0.0f64; 3]; 3];
    let mut ga = 0.0;
    let mut gb = 0.0;
    for (p, q) in a.iter().zip(b.iter()) {
        for i in 0..3 {
            for j in 0..3 {
                s[i][j] += p[i] * q[j];
            }
            ga += p[i] * p[i];
            gb += q[i] * q[i];
        }
    }

    let (sxx, sxy, sxz) = (s[0][0], s[0][1], s[0][2]);
    let (syx, syy, syz) = (s[1][0], s[1][1], s[1][2]);
    let (szx, szy, szz) = (s[2][0], s[2][1], s[2][2]);
    let k: Mat4 = [
        [sxx + syy + szz, syz - szy, szx - sxz, sxy - syx],
        [syz - szy, sxx - syy - szz, sxy + syx, szx + sxz],
        [szx - sxz, sxy + syx, -sxx + syy - szz, syz + szy],
        [sxy - syx, szx + sxz, syz + szy, -sxx - syy + szz],
    ];
    let lambda = jacobi_eigenvalues(k).into_iter().fold(f64::NEG_INFINITY, f64::max);

    let msd = (ga + gb - 2.0 * lambda) / n as f64;
    msd.max(0.0).sqrt()
}

/// Eigenvalues of a symmetric 4x4 matrix by cyclic Jacobi rotations.
fn jacobi_eigenvalues(mut a: Mat4) -> [f64; 4] {
    let norm2: f64 = a.iter().flatten().map(|v| v * v).sum();
    for _ in 0..JACOBI_MAX_SWEEPS {
        let off: f64 = (0..4)
            .flat_map(|i| (0..4).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[i][j] * a[i][j])
            .sum();
        if off <= JACOBI_REL_TOLERANCE * norm2 {
            break;
        }
        for p in 0..3 {
            for q in (p + 1)..4 {
                if a[p][q].abs() < f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..4 {
                    let (akp, akq) = (a[k][p], a[k][q]);
                    a[k][p] = c * akp - s * akq;
                    a[k][q] = s * akp + c * akq;
                }
                for k in 0..4 {
                    let (apk, aqk) = (a[p][k], a[q][k]);
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
            }
        }
    }
    [a[0][0], a[1][1], a[2][2], a[3][3]]
}
