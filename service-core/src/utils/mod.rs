pub mod signature;

pub use signature::{HmacAlgorithm, constant_time_eq, generate_signature};
