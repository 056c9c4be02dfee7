pub mod batch;
pub mod report;
pub mod run;
pub mod submit;
pub mod worker;
