//! Metric name constants.

use std::net::SocketAddr;

use anyhow::Context;
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;

pub const POSTS_CREATED: &str = "textboard.posts.created"; // Counter.
pub const POSTS_REJECTED: &str = "textboard.posts.rejected"; // Counter.
pub const POSTS_DELETED: &str = "textboard.posts.deleted"; // Counter.
pub const MODERATION_ACTIONS: &str = "textboard.moderation.actions"; // Counter.

/// Run once on startup. Installs a Prometheus scrape listener when an
/// address is given.
pub fn setup(listen: Option<&str>) -> anyhow::Result<()> {
    describe_counter!(POSTS_CREATED, "Threads and replies accepted, by kind.");
    describe_counter!(POSTS_REJECTED, "Submissions refused by the gate, by reason.");
    describe_counter!(POSTS_DELETED, "Rows soft- or hard-deleted, by mode.");
    describe_counter!(MODERATION_ACTIONS, "Moderator actions performed, by action.");

    if let Some(addr) = listen {
        let addr: SocketAddr = addr.parse().with_context(|| format!("invalid METRICS_ADDR '{addr}'"))?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install metrics exporter")?;
    }

    Ok(())
}
