pub use log::Level;
use simple_logger::SimpleLogger;

/// Initialize the logging facility at the given level. Panics if called
/// more than once, matching the one-shot initialization contract of the
/// underlying `log` facade.
pub fn init_log(lvl: Level) {
    SimpleLogger::new().with_level(lvl.to_level_filter()).init().unwrap()
}

#[inline]
pub fn set_max_level(lvl: Level) {
    log::set_max_level(lvl.to_level_filter())
}
