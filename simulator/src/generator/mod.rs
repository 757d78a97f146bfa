pub mod emulator;
pub mod profile;
