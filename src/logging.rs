use chrono::{DateTime, FixedOffset, Offset, Utc};
use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

const DEFAULT_TIMEZONE_OFFSET_SECS: i32 = 3600;

fn timezone_offset() -> FixedOffset {
    let offset_seconds = env::var("TIMEZONE_OFFSET")
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .unwrap_or(DEFAULT_TIMEZONE_OFFSET_SECS);
    FixedOffset::east_opt(offset_seconds).unwrap_or_else(|| Utc.fix())
}

/// Builder honouring full `RUST_LOG` directives (`info,pairtrade::engine=debug`).
/// Without `RUST_LOG` everything logs at info.
fn builder(offset: FixedOffset) -> Builder {
    let mut builder = Builder::from_default_env();
    builder.format(move |buf, record| {
        let utc_now: DateTime<Utc> = Utc::now();
        let local_now = utc_now.with_timezone(&offset);
        writeln!(
            buf,
            "{} [{}] - {}",
            local_now.format("%Y-%m-%dT%H:%M:%S%z"),
            record.level(),
            record.args()
        )
    });
    let has_directives = env::var("RUST_LOG")
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);
    if !has_directives {
        builder.filter_level(LevelFilter::Info);
    }
    builder
}

/// Installs an `env_logger` writing local timestamps. `TIMEZONE_OFFSET`
/// (seconds east of UTC) shifts the clock. Calling it again after a logger is
/// installed is a no-op.
pub fn init_logging() {
    if builder(timezone_offset()).try_init().is_ok() {
        log::debug!("logging initialised");
    }
}
