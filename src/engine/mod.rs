pub mod heatmap;
pub mod metrics;
pub mod weak_keys;
