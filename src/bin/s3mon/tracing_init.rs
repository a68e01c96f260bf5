// Initializes the tracing subscriber for the CLI binary.

use std::env;
use std::io::IsTerminal;

use tracing_subscriber::fmt::format::FmtSpan;

use s3mon_rs::config::TracingConfig;

const EVENT_FILTER_ENV_VAR: &str = "RUST_LOG";
const AWS_SDK_TARGETS: [&str; 3] = ["aws_smithy_runtime", "aws_config", "aws_sigv4"];

pub fn init_tracing(config: &TracingConfig) {
    let fmt_span = if config.span_events_tracing {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let (filter, show_target) = event_filter(config, env::var(EVENT_FILTER_ENV_VAR).ok());

    let subscriber_builder = tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .compact()
        .with_ansi(!config.disable_color_tracing && std::io::stdout().is_terminal())
        .with_span_events(fmt_span)
        .with_thread_names(true)
        .with_env_filter(filter)
        .with_target(show_target);

    if config.json_tracing {
        subscriber_builder.json().init();
    } else {
        subscriber_builder.init();
    }
}

/// Filter directive and whether event targets are worth showing.
///
/// AWS SDK tracing wins over `RUST_LOG`; without either only the monitor's
/// own crates are enabled.
fn event_filter(config: &TracingConfig, env_filter: Option<String>) -> (String, bool) {
    let level = config.tracing_level;
    let own = format!("s3mon_rs={level},s3mon={level}");

    if config.aws_sdk_tracing {
        let sdk = AWS_SDK_TARGETS
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect::<Vec<_>>()
            .join(",");
        return (format!("{own},{sdk}"), true);
    }

    match env_filter {
        Some(filter) => (filter, true),
        None => (own, false),
    }
}
