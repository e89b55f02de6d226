// Whole-device surface procedures

pub mod zero_fill;

pub use read_test::ReadTest;
pub use zero_fill::ZeroFill;
