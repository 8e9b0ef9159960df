//! CLI command implementations.
//!
//! | Module     | Commands handled   |
//! |------------|--------------------|
//! | `run`      | `Run` (default)    |
//! | `steps`    | `Steps`            |
//! | `template` | `InputsTemplate`   |

pub mod run;
pub mod steps;
pub mod template;

pub use run::cmd_run;
pub use steps::cmd_steps;
pub use template::cmd_inputs_template;
