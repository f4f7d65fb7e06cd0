use once_cell::sync::OnceCell;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Install a console subscriber filtered by `RUST_LOG` (default `info`).
/// Later calls, or a subscriber installed elsewhere, leave things as they are.
pub fn init() {
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let ansi = std::env::var_os("NO_COLOR").is_none();
        let registry =
            tracing_subscriber::registry().with(fmt::layer().with_ansi(ansi).with_filter(filter));
        let _ = registry.try_init();
    });
}
