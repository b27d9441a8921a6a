// Routines for choosing new indices and sample counts
pub mod allocation;
// Routines for estimating the bias and statistical error
pub mod estimation;
// Routines for evaluating samples
pub mod evaluation;
// Routines for managing the index set
pub mod indexset;
// Routines for logging
pub mod logger;
// Routines for output
pub mod output;
// Routines for checkpoints
pub mod persistence;
// Routines for settings
pub mod settings;
// Routines for storing samples
pub mod store;
