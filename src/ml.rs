pub mod clustering;
pub mod features;
pub mod output;
pub mod pipeline;
pub mod stats;
