//! Probability building blocks for marginal-force.
//!
//! This crate hosts reusable probability math used by the inference crate:
//! - small numeric helpers (stable sigmoid / logit primitives)
//! - tail probabilities of the Normal and Student-t distributions
//! - rank transforms for signed-rank statistics

pub mod math;
pub mod normal;
pub mod rank;
pub mod student_t;
