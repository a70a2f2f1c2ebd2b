pub mod cost;
pub mod run;
pub mod stream;
