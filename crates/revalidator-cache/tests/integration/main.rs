// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod bugs_tab;
pub mod deep_reblame;
pub mod utils;

pub use utils::*;
