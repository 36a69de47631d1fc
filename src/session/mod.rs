pub mod counters;
pub mod input;
pub mod result;
pub mod sprint;
pub mod text;
