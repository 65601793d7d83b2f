pub mod consts;
pub mod demons;
pub mod error;
pub mod filters;
pub mod image;
pub mod io;
pub mod manager;
pub mod metric;
pub mod multires;
pub mod observer;
pub mod optimizer;
pub mod params;
pub mod progress;
pub mod pyramid;
pub mod region;
pub mod resample;
pub mod strategy;
pub mod tag;
pub mod transform;
