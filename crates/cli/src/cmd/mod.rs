pub mod analyze;
pub mod predict;
