pub mod cpu;
pub mod hardware;

#[allow(clippy::module_name_repetitions)]
pub mod io;

#[cfg(test)]
mod testing;
