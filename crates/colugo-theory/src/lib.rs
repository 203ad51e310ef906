#![doc = include_str!("../README.md")]

pub mod term;
pub mod theory;

pub use term::{Subst, Term};
pub use theory::{Equation, FunctionSymbol, Theory, TheoryError};
