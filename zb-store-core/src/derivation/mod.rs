mod basic_derivation;
mod derivation_output;

pub use basic_derivation::{BasicDerivation, Derivation, DerivationInputs, DerivationT, OutputInputs, StructuredAttrs};
pub use derivation_output::{DerivationOutput, DerivationOutputs};
