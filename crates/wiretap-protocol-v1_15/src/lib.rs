mod adapter;
pub mod shapes;

pub use adapter::V1_15Adapter;
