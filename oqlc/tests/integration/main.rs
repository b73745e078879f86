mod fixtures;

mod dml;
mod queries;
