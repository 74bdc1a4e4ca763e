pub mod ops;
pub mod repl;
pub mod run;
