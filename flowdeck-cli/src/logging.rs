use env_logger::{Builder, Env, Target};
use log::SetLoggerError;

/// Install the stderr logger. `RUST_LOG` overrides `default_filter`.
pub fn init(default_filter: &str) -> Result<(), SetLoggerError> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));
    builder.target(Target::Stderr);
    builder.format_timestamp_millis();
    builder.try_init()
}
