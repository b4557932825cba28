pub mod underwriting;
