use tracing_subscriber::{
    filter::Directive,
    fmt::{format, time::ChronoLocal},
    EnvFilter,
};

pub fn init_log(crate_directive: &str) {
    let format = format::format()
        .with_level(true)
        .with_target(false)
        .with_timer(ChronoLocal::new("[%m-%d %H:%M:%S%.3f]".to_string()))
        .compact();

    let mut env_filter = EnvFilter::from_default_env();
    for directive in [crate_directive, "info"] {
        match directive.parse::<Directive>() {
            Ok(d) => env_filter = env_filter.add_directive(d),
            Err(err) => eprintln!("ignoring log directive `{directive}`: {err}"),
        }
    }
    tracing_subscriber::fmt().with_env_filter(env_filter).event_format(format).init();
}
