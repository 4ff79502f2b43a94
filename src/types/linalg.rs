//! Linear algebra aliases for the calibration solvers
//!
//! The solver itself works on dynamically sized vectors so one implementation
//! serves every residual model; the constants document each model's layout.

use nalgebra::{DMatrix, DVector};

// ===== Unknown counts =====
pub const SEQUENCE_UNKNOWNS: usize = 4; // (D, W, ml, mr)
pub const TURNAROUND_UNKNOWNS: usize = 3; // (ml, mr, W)
pub const TURNAROUND_BIAS_UNKNOWNS: usize = 5; // (ml, mr, al, ar, W)

// ===== Solver types =====
pub type ParamVec = DVector<f64>;
pub type ResidualVec = DVector<f64>;
pub type Jacobian = DMatrix<f64>; // residuals × unknowns
pub type NormalMatrix = DMatrix<f64>; // unknowns × unknowns
