//! Page classification: normalisation, rules, and the whole-job driver.

pub mod auto;
pub mod rules;

pub use auto::{AutoClassification, AutoClassifier};
pub use rules::{classify_text, normalize};
