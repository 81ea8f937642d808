pub mod adapters;

pub use adapters::KyklosDomain;
