pub mod encoder;
pub mod instructions;
pub mod proposal;
