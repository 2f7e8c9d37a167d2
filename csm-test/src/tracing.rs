use tracing_subscriber::EnvFilter;

/// Workspace crates whose logs are captured at `TRACE` level.
const WORKSPACE_CRATES: &[&str] = &["csm_loadtest", "csm_client", "csm_types", "csm_test"];

/// Initialize the logger for tests.
///
/// Logs go to the writer captured by the Rust test runner, so they only show up for failing tests
/// or with `--nocapture`. Workspace crates log at `TRACE`, dependencies only at `WARN`. If
/// `RUST_LOG` is set, it replaces these defaults.
///
/// Calling this more than once is fine; only the first call installs a subscriber.
///
/// # Example
///
/// ```
/// csm_test::tracing::init();
/// ```
pub fn init() {
    let env_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => WORKSPACE_CRATES
            .iter()
            .fold(EnvFilter::new("WARN"), |filter, name| {
                filter.add_directive(format!("{name}=TRACE").parse().unwrap())
            }),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
