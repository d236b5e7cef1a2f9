pub mod counter;
pub mod timebase;
