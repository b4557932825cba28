mod assembler;
mod common;
mod reports;
mod routing;
