//! C10 — Logging: a process-wide `env_logger`-backed `log` facade
//! initializer honoring a `ROLL_LOG` environment variable, the way the
//! teacher's CLI logger honors `DENO_LOG` (`cli/lib/util/logger.rs`).
//!
//! Only compiled when the `logging` feature is enabled (default-on); the
//! core itself instruments with the `log` facade macros regardless of this
//! feature, since installing a logger and emitting log records are
//! independent concerns.

/// Installs a global logger reading its filter from `ROLL_LOG`, falling
/// back to `default_level` when unset. Call once, before `App::serve`.
/// A second call is a no-op (mirrors `env_logger::Builder::try_init`'s
/// "already initialized" tolerance rather than panicking).
pub fn init(default_level: log::LevelFilter) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::new().filter_or("ROLL_LOG", default_level.to_string()).write_style("ROLL_LOG_STYLE"),
    )
    .format_timestamp_millis()
    .try_init();
}

/// Convenience for `init(log::LevelFilter::Info)`, the common case.
pub fn init_default() {
    init(log::LevelFilter::Info);
}
