pub mod convert;
pub mod wav;
