pub mod kf_4d;

pub use kf_4d::{Kf4d, Kf4dState};
