pub mod moments;
pub mod multi_index;
pub mod profile;
pub mod sample;
