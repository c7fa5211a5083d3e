use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(debug: bool) -> Result<()> {
    let mut filter = EnvFilter::from_default_env()
        .add_directive("hyper=warn".parse()?)
        .add_directive("rustls=warn".parse()?);
    if debug {
        filter = filter.add_directive("insights_cluster_monitor=debug".parse()?);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}
